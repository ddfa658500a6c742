//! Command template placeholders
//!
//! A template such as `FOO={{token}} run-server` carries `{{name}}` tokens that are
//! substituted with runtime values before the child is launched.

use std::{collections::HashMap, sync::OnceLock};

use regex::{Captures, Regex};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("placeholder regex is valid"))
}

/// Distinct placeholder names in order of first appearance, whitespace-trimmed.
pub fn extract(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in placeholder_pattern().captures_iter(template) {
        let name = captures[1].trim();
        if !names.iter().any(|known| known == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Substitutes known values; unknown placeholders are left verbatim.
pub fn render(template: &str, values: &HashMap<String, String>) -> String {
    placeholder_pattern()
        .replace_all(template, |captures: &Captures| {
            match values.get(captures[1].trim()) {
                Some(value) => value.clone(),
                None => captures[0].to_string(),
            }
        })
        .into_owned()
}
