//! Client-visible stream events and their line format.
//!
//! Each event is one envelope tagged with its stream and message:
//!
//! - `data: {json}\n\n` for everything in flight
//! - `data: [DONE] {json}\n\n` once per stream on completion
//! - `error: {json}\n\n` once per stream on failure

use serde::Serialize;

use tl_domain::delta::Delta;
use tl_domain::entity::Id;
use tl_domain::error::Error;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub stream_id: String,
    pub message_id: Id,
    #[serde(flatten)]
    pub body: EventBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    /// The target message and its first placeholder exist.
    #[serde(rename_all = "camelCase")]
    Started {
        message_group_id: Id,
        content_part_id: Id,
        model: String,
    },
    /// A raw provider delta, forwarded as received.
    Delta { delta: Delta },
    /// Buffered output was committed.
    #[serde(rename_all = "camelCase")]
    Flushed {
        content_part_ids: Vec<Id>,
        placeholder_id: Id,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_call_group_ids: Vec<Id>,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
    Error { kind: String, message: String },
}

impl EventBody {
    pub fn error(err: &Error) -> Self {
        EventBody::Error {
            kind: err.kind().to_owned(),
            message: err.to_string(),
        }
    }
}

impl WireEvent {
    pub fn new(stream_id: impl Into<String>, message_id: impl Into<Id>, body: EventBody) -> Self {
        Self {
            stream_id: stream_id.into(),
            message_id: message_id.into(),
            body,
        }
    }

    /// Last event of its stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.body, EventBody::Done { .. } | EventBody::Error { .. })
    }

    pub fn to_sse_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        match self.body {
            EventBody::Done { .. } => format!("data: [DONE] {json}\n\n"),
            EventBody::Error { .. } => format!("error: {json}\n\n"),
            _ => format!("data: {json}\n\n"),
        }
    }
}
