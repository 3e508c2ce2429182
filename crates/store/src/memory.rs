//! In-process conversation store.
//!
//! All tables live behind one `RwLock` so a commit is applied under a single
//! write guard and readers never observe half a transaction. When opened with
//! a state path the tables are loaded from and flushed to
//! `conversations.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tl_domain::entity::{
    pick_active, ContentPart, Id, Message, MessageGroup, ProjectMember, Thread, ThreadGroup,
    ToolCallGroup, ToolCallPart,
};
use tl_domain::error::{Error, Result};
use tl_domain::trace::TraceEvent;

use crate::contract::{ConversationStore, Transaction};

const SNAPSHOT_FILE: &str = "conversations.json";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    thread_groups: HashMap<Id, ThreadGroup>,
    #[serde(default)]
    threads: HashMap<Id, Thread>,
    #[serde(default)]
    message_groups: HashMap<Id, MessageGroup>,
    #[serde(default)]
    messages: HashMap<Id, Message>,
    #[serde(default)]
    content_parts: HashMap<Id, ContentPart>,
    #[serde(default)]
    tool_call_groups: HashMap<Id, ToolCallGroup>,
    #[serde(default)]
    tool_call_parts: HashMap<Id, ToolCallPart>,
    #[serde(default)]
    members: Vec<ProjectMember>,
}

/// A staged write.
#[derive(Debug)]
enum WriteOp {
    ThreadGroup(ThreadGroup),
    Thread(Thread),
    Member(ProjectMember),
    MessageGroup(MessageGroup),
    Message(Message),
    ContentPart(ContentPart),
    ToolCallGroup(ToolCallGroup),
    ToolCallPart(ToolCallPart),
}

impl Tables {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::ThreadGroup(g) => {
                self.thread_groups.insert(g.id.clone(), g);
            }
            WriteOp::Thread(t) => {
                self.threads.insert(t.id.clone(), t);
            }
            WriteOp::Member(m) => {
                self.members
                    .retain(|x| !(x.project_id == m.project_id && x.user_id == m.user_id));
                self.members.push(m);
            }
            WriteOp::MessageGroup(g) => {
                self.message_groups.insert(g.id.clone(), g);
            }
            WriteOp::Message(m) => {
                self.messages.insert(m.id.clone(), m);
            }
            WriteOp::ContentPart(p) => {
                self.content_parts.insert(p.id.clone(), p);
            }
            WriteOp::ToolCallGroup(g) => {
                self.tool_call_groups.insert(g.id.clone(), g);
            }
            WriteOp::ToolCallPart(p) => {
                self.tool_call_parts.insert(p.id.clone(), p);
            }
        }
    }
}

fn by_ids<T: Clone>(table: &HashMap<Id, T>, ids: &[Id], live: impl Fn(&T) -> bool) -> Vec<T> {
    ids.iter()
        .filter_map(|id| table.get(id))
        .filter(|row| live(row))
        .cloned()
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
    snapshot_on_commit: bool,
    /// Number of upcoming commits that should fail.
    failing_commits: AtomicUsize,
}

/// Conversation store held in memory, optionally snapshotted to disk.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store with no snapshot file.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                snapshot_path: None,
                snapshot_on_commit: false,
                failing_commits: AtomicUsize::new(0),
            }),
        }
    }

    /// Load or create the store at `state_path/conversations.json`.
    pub fn open(state_path: &Path, snapshot_on_commit: bool) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;

        let path = state_path.join(SNAPSHOT_FILE);
        let tables: Tables = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::Persistence(format!("corrupt snapshot {}: {e}", path.display()))
            })?
        } else {
            Tables::default()
        };

        tracing::info!(
            thread_groups = tables.thread_groups.len(),
            messages = tables.messages.len(),
            path = %path.display(),
            "conversation store loaded"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(tables),
                snapshot_path: Some(path),
                snapshot_on_commit,
                failing_commits: AtomicUsize::new(0),
            }),
        })
    }

    /// Write the snapshot file. A store without a state path is a no-op.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Make the next `n` commits fail with a persistence error.
    pub fn fail_next_commits(&self, n: usize) {
        self.inner.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Every tool-call group, including ones no content part links to yet.
    pub fn all_tool_call_groups(&self) -> Vec<ToolCallGroup> {
        let mut groups: Vec<_> = self.inner.tables.read().tool_call_groups.values().cloned().collect();
        groups.sort_by_key(|g| g.created_at);
        groups
    }

    /// All messages of a group regardless of status, oldest first.
    pub fn message_versions(&self, message_group_id: &str) -> Vec<Message> {
        let tables = self.inner.tables.read();
        let mut out: Vec<_> = tables
            .messages
            .values()
            .filter(|m| m.message_group_id == message_group_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.sub_seq, m.seq));
        out
    }
}

impl Inner {
    fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let json = {
            let tables = self.tables.read();
            serde_json::to_string_pretty(&*tables)?
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, path)?;

        TraceEvent::StoreSnapshot {
            path: path.display().to_string(),
            bytes: json.len(),
        }
        .emit();
        Ok(())
    }

    fn take_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn thread_groups(&self, ids: &[Id]) -> Result<Vec<ThreadGroup>> {
        let tables = self.inner.tables.read();
        Ok(by_ids(&tables.thread_groups, ids, |g| g.status.is_live()))
    }

    async fn threads(&self, ids: &[Id]) -> Result<Vec<Thread>> {
        let tables = self.inner.tables.read();
        Ok(by_ids(&tables.threads, ids, |t| t.status.is_live()))
    }

    async fn threads_in_groups(&self, thread_group_ids: &[Id]) -> Result<Vec<Thread>> {
        let tables = self.inner.tables.read();
        let mut out: Vec<_> = tables
            .threads
            .values()
            .filter(|t| t.status.is_live() && thread_group_ids.contains(&t.thread_group_id))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn message_groups(&self, ids: &[Id]) -> Result<Vec<MessageGroup>> {
        let tables = self.inner.tables.read();
        Ok(by_ids(&tables.message_groups, ids, |g| g.status.is_live()))
    }

    async fn message_groups_in_threads(&self, thread_ids: &[Id]) -> Result<Vec<MessageGroup>> {
        let tables = self.inner.tables.read();
        let mut out: Vec<_> = tables
            .message_groups
            .values()
            .filter(|g| g.status.is_live() && thread_ids.contains(&g.thread_id))
            .cloned()
            .collect();
        out.sort_by_key(|g| g.seq);
        Ok(out)
    }

    async fn messages(&self, ids: &[Id]) -> Result<Vec<Message>> {
        let tables = self.inner.tables.read();
        Ok(by_ids(&tables.messages, ids, |m| m.status.is_live()))
    }

    async fn messages_in_groups(&self, message_group_ids: &[Id]) -> Result<Vec<Message>> {
        let tables = self.inner.tables.read();
        let mut out: Vec<_> = tables
            .messages
            .values()
            .filter(|m| m.status.is_live() && message_group_ids.contains(&m.message_group_id))
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.sub_seq, m.seq));
        Ok(out)
    }

    async fn active_message(
        &self,
        message_group_id: &str,
        sub_seq: i32,
    ) -> Result<Option<Message>> {
        let tables = self.inner.tables.read();
        let versions = tables
            .messages
            .values()
            .filter(|m| m.message_group_id == message_group_id && m.sub_seq == sub_seq);
        Ok(pick_active(versions).cloned())
    }

    async fn content_parts(&self, ids: &[Id]) -> Result<Vec<ContentPart>> {
        let tables = self.inner.tables.read();
        Ok(by_ids(&tables.content_parts, ids, |p| p.status.is_live()))
    }

    async fn content_parts_of_messages(&self, message_ids: &[Id]) -> Result<Vec<ContentPart>> {
        let tables = self.inner.tables.read();
        let mut out: Vec<_> = tables
            .content_parts
            .values()
            .filter(|p| p.status.is_live() && message_ids.contains(&p.message_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            let ai = message_ids.iter().position(|id| *id == a.message_id);
            let bi = message_ids.iter().position(|id| *id == b.message_id);
            ai.cmp(&bi).then(a.seq.cmp(&b.seq))
        });
        Ok(out)
    }

    async fn tool_call_groups(&self, ids: &[Id]) -> Result<Vec<ToolCallGroup>> {
        let tables = self.inner.tables.read();
        Ok(by_ids(&tables.tool_call_groups, ids, |_| true))
    }

    async fn tool_call_parts(&self, tool_call_group_ids: &[Id]) -> Result<Vec<ToolCallPart>> {
        let tables = self.inner.tables.read();
        let mut out: Vec<_> = tables
            .tool_call_parts
            .values()
            .filter(|p| tool_call_group_ids.contains(&p.tool_call_group_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            let ai = tool_call_group_ids.iter().position(|id| *id == a.tool_call_group_id);
            let bi = tool_call_group_ids.iter().position(|id| *id == b.tool_call_group_id);
            ai.cmp(&bi).then(a.seq.cmp(&b.seq))
        });
        Ok(out)
    }

    async fn member(&self, project_id: &str, user_id: &str) -> Result<Option<ProjectMember>> {
        let tables = self.inner.tables.read();
        Ok(tables
            .members
            .iter()
            .find(|m| m.project_id == project_id && m.user_id == user_id)
            .cloned())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            ops: Vec::new(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MemoryTransaction {
    inner: Arc<Inner>,
    ops: Vec<WriteOp>,
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction {
    async fn put_thread_group(&mut self, group: ThreadGroup) -> Result<()> {
        self.ops.push(WriteOp::ThreadGroup(group));
        Ok(())
    }

    async fn put_thread(&mut self, thread: Thread) -> Result<()> {
        self.ops.push(WriteOp::Thread(thread));
        Ok(())
    }

    async fn put_member(&mut self, member: ProjectMember) -> Result<()> {
        self.ops.push(WriteOp::Member(member));
        Ok(())
    }

    async fn put_message_group(&mut self, group: MessageGroup) -> Result<()> {
        self.ops.push(WriteOp::MessageGroup(group));
        Ok(())
    }

    async fn put_message(&mut self, message: Message) -> Result<()> {
        self.ops.push(WriteOp::Message(message));
        Ok(())
    }

    async fn put_content_part(&mut self, part: ContentPart) -> Result<()> {
        self.ops.push(WriteOp::ContentPart(part));
        Ok(())
    }

    async fn put_tool_call_group(&mut self, group: ToolCallGroup) -> Result<()> {
        self.ops.push(WriteOp::ToolCallGroup(group));
        Ok(())
    }

    async fn put_tool_call_part(&mut self, part: ToolCallPart) -> Result<()> {
        self.ops.push(WriteOp::ToolCallPart(part));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { inner, ops } = *self;

        if inner.take_failure() {
            return Err(Error::Persistence(format!(
                "commit of {} staged writes rejected",
                ops.len()
            )));
        }

        {
            let mut tables = inner.tables.write();
            for op in ops {
                tables.apply(op);
            }
        }

        if inner.snapshot_on_commit {
            if let Err(e) = inner.flush() {
                tracing::warn!(error = %e, "snapshot after commit failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tl_domain::entity::{new_id, Status};
    use tl_domain::message::Role;

    fn group(thread_id: &str) -> MessageGroup {
        let now = Utc::now();
        MessageGroup {
            id: new_id(),
            thread_id: thread_id.into(),
            role: Role::User,
            previous_message_group_id: None,
            seq: 0,
            status: Status::Normal,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(group_id: &str, sub_seq: i32, seq: i32) -> Message {
        let now = Utc::now();
        Message {
            id: new_id(),
            message_group_id: group_id.into(),
            edited_root_message_id: None,
            sub_seq,
            seq,
            label: String::new(),
            cache_id: None,
            status: Status::Normal,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let store = MemoryStore::new();
        let g = group("t1");
        {
            let mut tx = store.begin().await.unwrap();
            tx.put_message_group(g.clone()).await.unwrap();
        }
        assert!(store.message_groups(&[g.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let g = group("t1");
        let mut tx = store.begin().await.unwrap();
        tx.put_message_group(g.clone()).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), "persistence_error");
        assert!(store.message_groups(&[g.id.clone()]).await.unwrap().is_empty());

        // The failure budget is spent; the next commit goes through.
        let mut tx = store.begin().await.unwrap();
        tx.put_message_group(g.clone()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.message_groups(&[g.id]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn active_message_prefers_latest_then_seq() {
        let store = MemoryStore::new();
        let g = group("t1");
        let older = message(&g.id, 0, 0);
        let mut newer = message(&g.id, 0, 1);
        newer.updated_at = older.updated_at + Duration::seconds(5);
        let mut tie = message(&g.id, 0, 2);
        tie.updated_at = older.updated_at;

        let mut tx = store.begin().await.unwrap();
        for m in [older, newer.clone(), tie] {
            tx.put_message(m).await.unwrap();
        }
        tx.commit().await.unwrap();

        let active = store.active_message(&g.id, 0).await.unwrap().unwrap();
        assert_eq!(active.id, newer.id);
    }

    #[tokio::test]
    async fn deleted_rows_are_hidden() {
        let store = MemoryStore::new();
        let mut m = message("g1", 0, 0);
        m.status = Status::Deleted;
        let mut tx = store.begin().await.unwrap();
        tx.put_message(m.clone()).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.messages(&[m.id]).await.unwrap().is_empty());
        assert!(store.active_message("g1", 0).await.unwrap().is_none());
        assert_eq!(store.message_versions("g1").len(), 1);
    }

    #[tokio::test]
    async fn content_parts_follow_requested_message_order() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for (msg, seq) in [("b", 1), ("a", 0), ("b", 0), ("a", 1)] {
            let mut p = ContentPart::placeholder(msg, seq);
            p.text = format!("{msg}{seq}");
            tx.put_content_part(p).await.unwrap();
        }
        tx.commit().await.unwrap();

        let parts = store
            .content_parts_of_messages(&["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        let texts: Vec<_> = parts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["b0", "b1", "a0", "a1"]);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let g = group("t1");
        {
            let store = MemoryStore::open(dir.path(), true).unwrap();
            let mut tx = store.begin().await.unwrap();
            tx.put_message_group(g.clone()).await.unwrap();
            tx.commit().await.unwrap();
        }
        assert!(dir.path().join(SNAPSHOT_FILE).exists());

        let reopened = MemoryStore::open(dir.path(), false).unwrap();
        let groups = reopened.message_groups(&[g.id.clone()]).await.unwrap();
        assert_eq!(groups[0].thread_id, "t1");
    }

    #[test]
    fn corrupt_snapshot_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), "{not json").unwrap();
        let err = MemoryStore::open(dir.path(), false).err().unwrap();
        assert_eq!(err.kind(), "persistence_error");
    }
}
