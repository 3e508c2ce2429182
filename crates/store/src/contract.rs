//! The persistence contract the engine depends on.
//!
//! Reads are batched by id or by owning id so a whole request can be
//! resolved with a handful of round trips. Writes go through a
//! [`Transaction`] that stages every change and applies them atomically on
//! [`Transaction::commit`]; dropping an uncommitted transaction discards it.
//!
//! Every read excludes soft-deleted rows.

use tl_domain::entity::{
    ContentPart, Id, Message, MessageGroup, ProjectMember, Thread, ThreadGroup, ToolCallGroup,
    ToolCallPart,
};
use tl_domain::error::Result;

#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn thread_groups(&self, ids: &[Id]) -> Result<Vec<ThreadGroup>>;

    async fn threads(&self, ids: &[Id]) -> Result<Vec<Thread>>;

    async fn threads_in_groups(&self, thread_group_ids: &[Id]) -> Result<Vec<Thread>>;

    async fn message_groups(&self, ids: &[Id]) -> Result<Vec<MessageGroup>>;

    async fn message_groups_in_threads(&self, thread_ids: &[Id]) -> Result<Vec<MessageGroup>>;

    async fn messages(&self, ids: &[Id]) -> Result<Vec<Message>>;

    async fn messages_in_groups(&self, message_group_ids: &[Id]) -> Result<Vec<Message>>;

    /// The active version for `(message_group_id, sub_seq)`: greatest
    /// `updated_at`, ties broken by greatest `seq`.
    async fn active_message(&self, message_group_id: &str, sub_seq: i32)
        -> Result<Option<Message>>;

    async fn content_parts(&self, ids: &[Id]) -> Result<Vec<ContentPart>>;

    /// Content parts of the given messages, ordered by message then `seq`.
    async fn content_parts_of_messages(&self, message_ids: &[Id]) -> Result<Vec<ContentPart>>;

    async fn tool_call_groups(&self, ids: &[Id]) -> Result<Vec<ToolCallGroup>>;

    /// Tool-call parts of the given groups, ordered by group then `seq`.
    async fn tool_call_parts(&self, tool_call_group_ids: &[Id]) -> Result<Vec<ToolCallPart>>;

    async fn member(&self, project_id: &str, user_id: &str) -> Result<Option<ProjectMember>>;

    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// A unit of work. All `put_*` calls are upserts keyed by id.
#[async_trait::async_trait]
pub trait Transaction: Send {
    async fn put_thread_group(&mut self, group: ThreadGroup) -> Result<()>;

    async fn put_thread(&mut self, thread: Thread) -> Result<()>;

    async fn put_member(&mut self, member: ProjectMember) -> Result<()>;

    async fn put_message_group(&mut self, group: MessageGroup) -> Result<()>;

    async fn put_message(&mut self, message: Message) -> Result<()>;

    async fn put_content_part(&mut self, part: ContentPart) -> Result<()>;

    async fn put_tool_call_group(&mut self, group: ToolCallGroup) -> Result<()>;

    async fn put_tool_call_part(&mut self, part: ToolCallPart) -> Result<()>;

    /// Apply every staged write atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}
