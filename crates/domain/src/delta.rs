//! Raw streaming deltas as received from a model provider.
//!
//! The shape follows the OpenAI chat-completions chunk, extended with the
//! roles the tool runtime injects (`info`, `command`, `tool`) and an optional
//! provider grounding payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One incremental chunk of a streamed completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Grounding / citation metadata (Vertex-style providers).
    #[serde(
        default,
        rename = "groundingMetadata",
        alias = "grounding_metadata",
        skip_serializing_if = "Option::is_none"
    )]
    pub grounding_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: DeltaBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool-call chunk. Only the first chunk of a call carries `id`;
/// continuation chunks carry argument text only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of a non-streaming token count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCount {
    pub total_tokens: u32,
    pub total_billable_characters: u64,
}

impl std::ops::AddAssign for TokenCount {
    fn add_assign(&mut self, rhs: Self) {
        self.total_tokens += rhs.total_tokens;
        self.total_billable_characters += rhs.total_billable_characters;
    }
}

impl Delta {
    /// The first non-empty finish reason across choices.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .iter()
            .filter_map(|c| c.finish_reason.as_deref())
            .find(|r| !r.is_empty())
    }

    fn single(delta: DeltaBody, finish_reason: Option<String>) -> Self {
        Self {
            choices: vec![Choice { index: 0, delta, finish_reason }],
            grounding_metadata: None,
            usage: None,
        }
    }

    // ── Convenience constructors ───────────────────────────────────

    pub fn text(content: impl Into<String>) -> Self {
        Self::single(DeltaBody { content: Some(content.into()), ..Default::default() }, None)
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self::single(DeltaBody::default(), Some(reason.into()))
    }

    /// A tool-runtime bootstrap delta (`role: info`) with a JSON body.
    pub fn info(body: &Value) -> Self {
        Self::with_role("info", body.to_string())
    }

    /// A tool-runtime command delta (`role: command`) with a JSON body.
    pub fn command(body: &Value) -> Self {
        Self::with_role("command", body.to_string())
    }

    fn with_role(role: &str, content: String) -> Self {
        Self::single(
            DeltaBody { content: Some(content), role: Some(role.into()), ..Default::default() },
            None,
        )
    }

    /// The opening chunk of a tool call.
    pub fn tool_call_start(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::tool_calls(vec![ToolCallDelta {
            index: Some(0),
            id: Some(id.into()),
            kind: Some("function".into()),
            function: Some(FunctionDelta {
                name: Some(name.into()),
                arguments: Some(arguments.into()),
            }),
        }])
    }

    /// A continuation chunk carrying only argument text.
    pub fn tool_call_args(arguments: impl Into<String>) -> Self {
        Self::tool_calls(vec![ToolCallDelta {
            index: Some(0),
            id: None,
            kind: None,
            function: Some(FunctionDelta { name: None, arguments: Some(arguments.into()) }),
        }])
    }

    pub fn tool_calls(calls: Vec<ToolCallDelta>) -> Self {
        Self::single(DeltaBody { tool_calls: Some(calls), ..Default::default() }, None)
    }

    /// A tool result delta (`role: tool`).
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::single(
            DeltaBody {
                content: Some(content.into()),
                role: Some("tool".into()),
                tool_call_id: Some(tool_call_id.into()),
                ..Default::default()
            },
            None,
        )
    }

    pub fn grounding(metadata: Value) -> Self {
        Self { choices: Vec::new(), grounding_metadata: Some(metadata), usage: None }
    }
}
