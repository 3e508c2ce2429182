//! Conversation entities as the store persists them.
//!
//! A thread group owns threads; each thread owns a chain of message groups
//! linked through `previous_message_group_id`; each message group owns one
//! or more message versions; each message owns ordered content parts.
//! Tool usage lives beside that tree in tool-call groups and their parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Role;

pub type Id = String;

/// Mint a fresh entity id.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Normal,
    Deleted,
}

impl Status {
    pub fn is_live(self) -> bool {
        self == Status::Normal
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread groups and threads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A conversation container for one project topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadGroup {
    pub id: Id,
    pub project_id: Id,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reference to a provider-side context cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRef {
    pub name: String,
    pub expire_time: DateTime<Utc>,
}

/// The stored request configuration of a thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    /// `"provider_id/model"`. `None` falls back to the configured default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// At most one context cache per thread.
    #[serde(default)]
    pub cached_content: Option<CacheRef>,
}

impl RequestConfig {
    /// The context cache, if it has not expired at `now`.
    pub fn live_cache(&self, now: DateTime<Utc>) -> Option<&CacheRef> {
        self.cached_content
            .as_ref()
            .filter(|c| c.expire_time > now)
    }
}

/// One provider-request configuration within a thread group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Id,
    pub thread_group_id: Id,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub request_config: RequestConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message groups, messages, content parts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A turn: one role at one branch point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageGroup {
    pub id: Id,
    pub thread_id: Id,
    pub role: Role,
    #[serde(default)]
    pub previous_message_group_id: Option<Id>,
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageGroup {
    /// Ordering key for "latest group wins": `updated_at`, then `seq`.
    pub fn recency_key(&self) -> (DateTime<Utc>, i64) {
        (self.updated_at, self.seq)
    }
}

/// One version of a turn's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Id,
    pub message_group_id: Id,
    /// The first message of the edit lineage this version belongs to.
    #[serde(default)]
    pub edited_root_message_id: Option<Id>,
    /// Messages sharing `sub_seq` within a group are versions of each other.
    #[serde(default)]
    pub sub_seq: i32,
    #[serde(default)]
    pub seq: i32,
    /// Short label derived from the message text.
    #[serde(default)]
    pub label: String,
    /// Set when this message is already summarized by a context cache.
    #[serde(default)]
    pub cache_id: Option<String>,
    #[serde(default)]
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Ordering key for active-version selection: `updated_at`, then `seq`.
    pub fn activity_key(&self) -> (DateTime<Utc>, i32) {
        (self.updated_at, self.seq)
    }
}

/// Pick the active version among messages that share a `sub_seq`.
pub fn pick_active<'a, I>(versions: I) -> Option<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    versions
        .into_iter()
        .filter(|m| m.status.is_live())
        .max_by_key(|m| m.activity_key())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentPartType {
    Text,
    File,
    Tool,
    Error,
    Meta,
}

impl ContentPartType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentPartType::Text => "text",
            ContentPartType::File => "file",
            ContentPartType::Tool => "tool",
            ContentPartType::Error => "error",
            ContentPartType::Meta => "meta",
        }
    }
}

/// One ordered piece of a message's content.
///
/// `link_id` points at a file group for `file` parts and at a tool-call
/// group for `tool` parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    pub id: Id,
    pub message_id: Id,
    #[serde(rename = "type")]
    pub kind: ContentPartType,
    #[serde(default)]
    pub link_id: Option<Id>,
    pub seq: i32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub token_count: Option<u32>,
    #[serde(default)]
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentPart {
    /// An empty text part, used as the write target for the next chunk.
    pub fn placeholder(message_id: &str, seq: i32) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            message_id: message_id.to_owned(),
            kind: ContentPartType::Text,
            link_id: None,
            seq,
            text: String::new(),
            token_count: None,
            status: Status::Normal,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ToolCallPartType {
    Info,
    Call,
    Result,
    Command,
}

/// One fragment of a tool call's lifecycle.
///
/// Body shapes:
/// - `INFO` / `COMMAND`: the bootstrap object, at least `{"toolCallId": ..}`
/// - `CALL`: `{"id", "type": "function", "function": {"name", "arguments"}}`
/// - `RESULT`: `{"tool_call_id", "content"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: Id,
    pub tool_call_group_id: Id,
    pub tool_call_id: String,
    #[serde(rename = "type")]
    pub kind: ToolCallPartType,
    pub body: serde_json::Value,
    pub seq: i32,
    pub created_at: DateTime<Utc>,
}

impl ToolCallPart {
    /// Function name of a `CALL` fragment.
    pub fn function_name(&self) -> Option<&str> {
        self.body.get("function")?.get("name")?.as_str()
    }

    /// Accumulated argument string of a `CALL` fragment.
    pub fn function_arguments(&self) -> Option<&str> {
        self.body.get("function")?.get("arguments")?.as_str()
    }

    /// Result text of a `RESULT` fragment.
    pub fn result_text(&self) -> String {
        match self.body.get("content") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// All tool-call parts of one round of tool usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallGroup {
    pub id: Id,
    pub project_id: Id,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Membership
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl ProjectRole {
    /// Viewers can read history but cannot start model runs.
    pub fn can_run(self) -> bool {
        !matches!(self, ProjectRole::Viewer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMember {
    pub project_id: Id,
    pub user_id: String,
    pub role: ProjectRole,
}

/// The authenticated caller, as established by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }
}
