use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub result: Value,
}

impl ToolResultPart {
    /// True when the payload carries nothing usable (null, false, 0, or "").
    ///
    /// Objects and arrays count as present even when empty.
    pub fn is_empty_payload(&self) -> bool {
        match &self.result {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0 || f.is_nan()),
            Value::String(s) => s.is_empty(),
            Value::Array(_) | Value::Object(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text { text: String },
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Part>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn parts(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }

    /// Concatenated text parts (tool parts are skipped).
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallPart> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::ToolCall(c) => Some(c),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn tool_results(&self) -> Vec<&ToolResultPart> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::ToolResult(r) => Some(r),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Whether the history already carries a tool response.
pub fn has_tool_response(messages: &[Message]) -> bool {
    messages.iter().any(|m| m.role == Role::Tool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parts_serialize_with_kebab_case_tags() {
        let m = Message::parts(
            Role::Assistant,
            vec![
                Part::Text {
                    text: "hi".to_string(),
                },
                Part::ToolCall(ToolCallPart {
                    call_id: "c1".to_string(),
                    tool_name: "search".to_string(),
                    args: json!({"query": "cats"}),
                }),
            ],
        );
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][1]["type"], "tool-call");
        assert_eq!(v["content"][1]["callId"], "c1");
        assert_eq!(v["content"][1]["toolName"], "search");
    }

    #[test]
    fn plain_string_content_parses_as_text() {
        let m: Message = serde_json::from_str(r#"{"role":"user","content":"hello"}"#).unwrap();
        assert_eq!(m.role, Role::User);
        assert_eq!(m.text(), "hello");
        assert!(m.tool_calls().is_empty());
    }

    #[test]
    fn empty_payload_follows_falsy_rules() {
        let mk = |v: Value| ToolResultPart {
            call_id: "c".to_string(),
            tool_name: "search".to_string(),
            result: v,
        };
        assert!(mk(Value::Null).is_empty_payload());
        assert!(mk(json!(false)).is_empty_payload());
        assert!(mk(json!(0)).is_empty_payload());
        assert!(mk(json!("")).is_empty_payload());
        assert!(!mk(json!({})).is_empty_payload());
        assert!(!mk(json!([])).is_empty_payload());
        assert!(!mk(json!("x")).is_empty_payload());
    }

    #[test]
    fn has_tool_response_checks_roles() {
        let mut msgs = vec![Message::user("q")];
        assert!(!has_tool_response(&msgs));
        msgs.push(Message::parts(Role::Tool, vec![]));
        assert!(has_tool_response(&msgs));
    }
}
