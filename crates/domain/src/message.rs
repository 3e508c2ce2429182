use serde::{Deserialize, Serialize};

/// Conversation role, shared by message groups and provider messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One block of provider message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// An inline binary rendition (image, native PDF, other file),
    /// base64-encoded.
    #[serde(rename = "inline")]
    Inline { media_type: String, data: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Empty text blocks are dropped before a request is sent.
    pub fn is_empty_text(&self) -> bool {
        matches!(self, ContentBlock::Text { text } if text.is_empty())
    }
}

/// A tool invocation carried by an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as streamed by the model.
    pub arguments: String,
}

/// A message in the provider request (provider-agnostic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    /// Set on `tool` messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

// ── Convenience constructors ───────────────────────────────────────

impl ProviderMessage {
    pub fn new(role: Role) -> Self {
        Self { role, content: Vec::new(), tool_calls: Vec::new(), tool_call_id: None }
    }
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System).with_text(text)
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User).with_text(text)
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant).with_text(text)
    }
    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentBlock::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content.push(ContentBlock::text(text));
        self
    }

    /// No content blocks and no tool calls.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty()
    }

    /// Concatenate all text blocks, newline-separated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Inline { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_carries_call_id() {
        let m = ProviderMessage::tool_result("call_1", "42");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(m.text(), "42");
    }

    #[test]
    fn empty_message_detection() {
        let mut m = ProviderMessage::new(Role::Assistant);
        assert!(m.is_empty());
        m.tool_calls.push(ToolCallRef { id: "a".into(), name: "f".into(), arguments: "{}".into() });
        assert!(!m.is_empty());
    }

    #[test]
    fn content_block_tagging() {
        let json = serde_json::to_value(ContentBlock::text("hi")).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hi");
    }
}
