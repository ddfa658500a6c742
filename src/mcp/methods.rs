//! Forwarded protocol methods and their pre-configuration fallbacks

use serde_json::{json, Map, Value};

/// What to answer when a forwarded call fails before the first args update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// A tool list containing only the args-update tool.
    UpdateToolOnly,
    /// An object holding one empty list under the given key.
    EmptyList(&'static str),
    EmptySuccess,
}

impl Fallback {
    pub fn payload(self, update_tool: &Value) -> Value {
        match self {
            Self::UpdateToolOnly => json!({ "tools": [update_tool] }),
            Self::EmptyList(key) => {
                Value::Object(Map::from_iter([(key.to_string(), Value::Array(Vec::new()))]))
            }
            Self::EmptySuccess => json!({}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardedMethod {
    ToolsList,
    ToolsCall,
    PromptsList,
    PromptsGet,
    ResourcesList,
    ResourcesRead,
    ResourcesSubscribe,
    ResourcesUnsubscribe,
    ResourceTemplatesList,
    SamplingCreateMessage,
    RootsList,
    Ping,
    CompletionComplete,
    LoggingSetLevel,
}

impl ForwardedMethod {
    pub const ALL: [ForwardedMethod; 14] = [
        Self::ToolsList,
        Self::ToolsCall,
        Self::PromptsList,
        Self::PromptsGet,
        Self::ResourcesList,
        Self::ResourcesRead,
        Self::ResourcesSubscribe,
        Self::ResourcesUnsubscribe,
        Self::ResourceTemplatesList,
        Self::SamplingCreateMessage,
        Self::RootsList,
        Self::Ping,
        Self::CompletionComplete,
        Self::LoggingSetLevel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::PromptsList => "prompts/list",
            Self::PromptsGet => "prompts/get",
            Self::ResourcesList => "resources/list",
            Self::ResourcesRead => "resources/read",
            Self::ResourcesSubscribe => "resources/subscribe",
            Self::ResourcesUnsubscribe => "resources/unsubscribe",
            Self::ResourceTemplatesList => "resources/templates/list",
            Self::SamplingCreateMessage => "sampling/createMessage",
            Self::RootsList => "roots/list",
            Self::Ping => "ping",
            Self::CompletionComplete => "completion/complete",
            Self::LoggingSetLevel => "logging/setLevel",
        }
    }

    pub fn fallback(self) -> Option<Fallback> {
        match self {
            Self::ToolsList => Some(Fallback::UpdateToolOnly),
            Self::PromptsList => Some(Fallback::EmptyList("prompts")),
            Self::ResourcesList => Some(Fallback::EmptyList("resources")),
            Self::ResourceTemplatesList => Some(Fallback::EmptyList("resourceTemplates")),
            Self::RootsList => Some(Fallback::EmptyList("roots")),
            Self::Ping => Some(Fallback::EmptySuccess),
            Self::ToolsCall
            | Self::PromptsGet
            | Self::ResourcesRead
            | Self::ResourcesSubscribe
            | Self::ResourcesUnsubscribe
            | Self::SamplingCreateMessage
            | Self::CompletionComplete
            | Self::LoggingSetLevel => None,
        }
    }

    pub fn from_name(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.name() == method)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::{Fallback, ForwardedMethod};

    #[test]
    fn names_are_unique_and_resolve_back() {
        let names = ForwardedMethod::ALL
            .iter()
            .map(|method| method.name())
            .collect::<HashSet<_>>();
        assert_eq!(names.len(), ForwardedMethod::ALL.len());

        for method in ForwardedMethod::ALL {
            assert_eq!(ForwardedMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(ForwardedMethod::from_name("initialize"), None);
        assert_eq!(ForwardedMethod::from_name("tools/unknown"), None);
    }

    #[test]
    fn only_listings_and_ping_have_fallbacks() {
        let with_fallback = ForwardedMethod::ALL
            .into_iter()
            .filter(|method| method.fallback().is_some())
            .map(ForwardedMethod::name)
            .collect::<Vec<_>>();

        assert_eq!(
            with_fallback,
            vec![
                "tools/list",
                "prompts/list",
                "resources/list",
                "resources/templates/list",
                "roots/list",
                "ping"
            ]
        );
    }

    #[test]
    fn fallback_payloads() {
        let update_tool = json!({"name": "update_args"});

        assert_eq!(
            Fallback::UpdateToolOnly.payload(&update_tool),
            json!({"tools": [{"name": "update_args"}]})
        );
        assert_eq!(
            Fallback::EmptyList("resourceTemplates").payload(&update_tool),
            json!({"resourceTemplates": []})
        );
        assert_eq!(Fallback::EmptySuccess.payload(&update_tool), json!({}));
    }
}
