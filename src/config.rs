use std::{env, time::Duration};

use thiserror::Error;

pub const DEFAULT_UPDATE_TOOL_NAME: &str = "update_args";

#[derive(Debug, Clone)]
pub struct Config {
    pub command_template: String,
    pub update_tool_name: String,
    pub call_timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a command template is required (first argument or RELAY_COMMAND)")]
    MissingCommand,
    #[error("RELAY_UPDATE_TOOL_NAME must not be empty")]
    EmptyToolName,
    #[error("RELAY_CALL_TIMEOUT_SECS must be a positive integer")]
    InvalidTimeout,
}

impl Config {
    /// Reads the launch configuration; `command_arg` is the first positional
    /// CLI argument and takes precedence over `RELAY_COMMAND`.
    pub fn from_env(command_arg: Option<String>) -> Result<Self, ConfigError> {
        Self::from_values(
            command_arg.or_else(|| env::var("RELAY_COMMAND").ok()),
            env::var("RELAY_UPDATE_TOOL_NAME").ok(),
            env::var("RELAY_CALL_TIMEOUT_SECS").ok(),
        )
    }

    pub fn from_values(
        command: Option<String>,
        update_tool_name: Option<String>,
        call_timeout_secs: Option<String>,
    ) -> Result<Self, ConfigError> {
        let command_template = command
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingCommand)?;

        let update_tool_name = match update_tool_name {
            None => DEFAULT_UPDATE_TOOL_NAME.to_string(),
            Some(value) => {
                let value = value.trim().to_string();
                if value.is_empty() {
                    return Err(ConfigError::EmptyToolName);
                }
                value
            }
        };

        let call_timeout = call_timeout_secs
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .ok_or(ConfigError::InvalidTimeout)
            })
            .transpose()?;

        Ok(Self {
            command_template,
            update_tool_name,
            call_timeout,
        })
    }
}
