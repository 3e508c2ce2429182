//! History resolution: selector → linear message chains.
//!
//! Every entity the request touches is loaded once into id-keyed maps and
//! the chains are walked by key lookup. Nothing here writes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use tl_domain::entity::{
    pick_active, ContentPart, Id, Message, MessageGroup, Principal, Thread, ThreadGroup,
};
use tl_domain::error::{Error, Result};
use tl_domain::trace::TraceEvent;
use tl_store::ConversationStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Selector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    ThreadGroup,
    Thread,
    MessageGroup,
    Message,
    ContentPart,
}

impl SelectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectorKind::ThreadGroup => "thread_group",
            SelectorKind::Thread => "thread",
            SelectorKind::MessageGroup => "message_group",
            SelectorKind::Message => "message",
            SelectorKind::ContentPart => "content_part",
        }
    }
}

/// What to linearize: a kind plus one or more ids of that kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub kind: SelectorKind,
    pub ids: Vec<Id>,
}

impl Selector {
    pub fn new(kind: SelectorKind, ids: impl IntoIterator<Item = impl Into<Id>>) -> Self {
        Self {
            kind,
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.ids.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// A model run: membership is checked and cached messages are trimmed.
    #[default]
    Run,
    /// Token counting: no membership check.
    CountOnly,
    /// Building a context cache: cached messages are kept.
    CacheCreation,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolved chains
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub message_group: MessageGroup,
    pub message: Message,
    /// Live parts ordered by `seq`.
    pub content_parts: Vec<ContentPart>,
}

/// One linear conversation, oldest entry first.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    pub thread_group: ThreadGroup,
    pub thread: Thread,
    pub entries: Vec<ChainEntry>,
}

impl ResolvedChain {
    pub fn tail(&self) -> Option<&ChainEntry> {
        self.entries.last()
    }
}

/// Where a chain ends.
enum Anchor {
    /// The tail group of the thread, all of its sub-sequences.
    ThreadTail(Id),
    /// A specific group, all of its sub-sequences.
    Group(Id),
    /// A specific message version.
    Message(Message),
}

/// Pick the tail of a thread: live groups no other live group points back
/// to; the most recent one wins.
pub fn tail_group<'a>(groups: impl IntoIterator<Item = &'a MessageGroup>) -> Option<&'a MessageGroup> {
    let live: Vec<&MessageGroup> = groups.into_iter().filter(|g| g.status.is_live()).collect();
    let referenced: HashSet<&str> = live
        .iter()
        .filter_map(|g| g.previous_message_group_id.as_deref())
        .collect();
    live.into_iter()
        .filter(|g| !referenced.contains(g.id.as_str()))
        .max_by(|a, b| a.recency_key().cmp(&b.recency_key()).then(a.id.cmp(&b.id)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HistoryResolver {
    store: Arc<dyn ConversationStore>,
}

impl HistoryResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Resolve `selector` to one chain per requested id (one per live
    /// thread for thread-group selectors).
    ///
    /// `principal` may only be absent in [`ResolveMode::CountOnly`].
    pub async fn resolve(
        &self,
        selector: &Selector,
        principal: Option<&Principal>,
        mode: ResolveMode,
    ) -> Result<Vec<ResolvedChain>> {
        let anchors = self.anchors(selector).await?;

        // ── Upward: owning threads and thread groups ───────────────
        let thread_ids = dedup(anchors.iter().map(|(t, _)| t.clone()));
        let threads: HashMap<Id, Thread> = self
            .store
            .threads(&thread_ids)
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let group_ids = dedup(threads.values().map(|t| t.thread_group_id.clone()));
        let thread_groups: HashMap<Id, ThreadGroup> = self
            .store
            .thread_groups(&group_ids)
            .await?
            .into_iter()
            .map(|g| (g.id.clone(), g))
            .collect();

        if mode != ResolveMode::CountOnly {
            let principal = principal
                .ok_or_else(|| Error::Forbidden("an authenticated user is required".into()))?;
            let projects = dedup(thread_groups.values().map(|g| g.project_id.clone()));
            for project_id in projects {
                self.authorize(&project_id, principal).await?;
            }
        }

        // ── Laterally: every group and message of those threads ────
        let live_thread_ids: Vec<Id> = threads.keys().cloned().collect();
        let groups: HashMap<Id, MessageGroup> = self
            .store
            .message_groups_in_threads(&live_thread_ids)
            .await?
            .into_iter()
            .map(|g| (g.id.clone(), g))
            .collect();
        let all_group_ids: Vec<Id> = groups.keys().cloned().collect();
        let mut versions: HashMap<Id, BTreeMap<i32, Vec<Message>>> = HashMap::new();
        for m in self.store.messages_in_groups(&all_group_ids).await? {
            versions
                .entry(m.message_group_id.clone())
                .or_default()
                .entry(m.sub_seq)
                .or_default()
                .push(m);
        }
        let arena = Arena { groups, versions };

        // ── Walk each anchor back to the root ──────────────────────
        let now = Utc::now();
        let mut chains = Vec::new();
        let mut cache_trimmed = 0;
        for (thread_id, anchor) in anchors {
            let Some(thread) = threads.get(&thread_id) else {
                continue;
            };
            let Some(thread_group) = thread_groups.get(&thread.thread_group_id) else {
                continue;
            };

            let mut entries = arena.walk(&thread_id, &anchor);
            if entries.is_empty() {
                continue;
            }

            if mode != ResolveMode::CacheCreation && thread.request_config.live_cache(now).is_some() {
                let before = entries.len();
                entries.retain(|(_, m)| m.cache_id.is_none());
                cache_trimmed += before - entries.len();
            }

            chains.push((thread_group.clone(), thread.clone(), entries));
        }

        if chains.is_empty() {
            return Err(Error::NotFound(format!("nothing to resolve for {selector}")));
        }

        // ── Content parts, one batch for every chain ───────────────
        let message_ids = dedup(
            chains
                .iter()
                .flat_map(|(_, _, entries)| entries.iter().map(|(_, m)| m.id.clone())),
        );
        let mut parts_by_message: HashMap<Id, Vec<ContentPart>> = HashMap::new();
        for part in self.store.content_parts_of_messages(&message_ids).await? {
            parts_by_message
                .entry(part.message_id.clone())
                .or_default()
                .push(part);
        }

        let resolved: Vec<ResolvedChain> = chains
            .into_iter()
            .map(|(thread_group, thread, entries)| ResolvedChain {
                thread_group,
                thread,
                entries: entries
                    .into_iter()
                    .map(|(message_group, message)| {
                        let mut content_parts =
                            parts_by_message.get(&message.id).cloned().unwrap_or_default();
                        content_parts.sort_by_key(|p| p.seq);
                        ChainEntry {
                            message_group,
                            message,
                            content_parts,
                        }
                    })
                    .collect(),
            })
            .collect();

        TraceEvent::HistoryResolved {
            selector: selector.to_string(),
            chains: resolved.len(),
            entries: resolved.iter().map(|c| c.entries.len()).sum(),
            cache_trimmed,
        }
        .emit();

        Ok(resolved)
    }

    /// Fetch the most specific entities and turn them into chain anchors,
    /// each paired with its owning thread id.
    async fn anchors(&self, selector: &Selector) -> Result<Vec<(Id, Anchor)>> {
        let ids = &selector.ids;
        let anchors = match selector.kind {
            SelectorKind::ThreadGroup => {
                let groups = self.store.thread_groups(ids).await?;
                let live: Vec<Id> = groups.into_iter().map(|g| g.id).collect();
                self.store
                    .threads_in_groups(&live)
                    .await?
                    .into_iter()
                    .map(|t| (t.id.clone(), Anchor::ThreadTail(t.id)))
                    .collect()
            }
            SelectorKind::Thread => self
                .store
                .threads(ids)
                .await?
                .into_iter()
                .map(|t| (t.id.clone(), Anchor::ThreadTail(t.id)))
                .collect(),
            SelectorKind::MessageGroup => self
                .store
                .message_groups(ids)
                .await?
                .into_iter()
                .map(|g| (g.thread_id.clone(), Anchor::Group(g.id)))
                .collect(),
            SelectorKind::Message => {
                let messages = self.store.messages(ids).await?;
                self.message_anchors(messages).await?
            }
            SelectorKind::ContentPart => {
                let parts = self.store.content_parts(ids).await?;
                let message_ids = dedup(parts.into_iter().map(|p| p.message_id));
                let messages = self.store.messages(&message_ids).await?;
                self.message_anchors(messages).await?
            }
        };

        if anchors.is_empty() {
            return Err(Error::NotFound(format!("no live entity for {selector}")));
        }
        Ok(anchors)
    }

    async fn message_anchors(&self, messages: Vec<Message>) -> Result<Vec<(Id, Anchor)>> {
        let group_ids = dedup(messages.iter().map(|m| m.message_group_id.clone()));
        let thread_of: HashMap<Id, Id> = self
            .store
            .message_groups(&group_ids)
            .await?
            .into_iter()
            .map(|g| (g.id, g.thread_id))
            .collect();
        Ok(messages
            .into_iter()
            .filter_map(|m| {
                let thread_id = thread_of.get(&m.message_group_id)?.clone();
                Some((thread_id, Anchor::Message(m)))
            })
            .collect())
    }

    /// Require `principal` to hold a role in `project_id` that may start
    /// model runs.
    pub async fn authorize(&self, project_id: &str, principal: &Principal) -> Result<()> {
        match self.store.member(project_id, &principal.user_id).await? {
            Some(m) if m.role.can_run() => Ok(()),
            Some(m) => Err(Error::Forbidden(format!(
                "user {} has role {:?} in project {project_id}",
                principal.user_id, m.role
            ))),
            None => Err(Error::Forbidden(format!(
                "user {} is not a member of project {project_id}",
                principal.user_id
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arena walk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Arena {
    groups: HashMap<Id, MessageGroup>,
    /// group id → sub_seq → versions
    versions: HashMap<Id, BTreeMap<i32, Vec<Message>>>,
}

impl Arena {
    /// Active version of every sub-sequence of a group, ascending.
    fn active_in(&self, group_id: &str) -> Vec<Message> {
        self.versions
            .get(group_id)
            .map(|subs| {
                subs.values()
                    .filter_map(|v| pick_active(v.iter()).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn walk(&self, thread_id: &str, anchor: &Anchor) -> Vec<(MessageGroup, Message)> {
        let (tail, tail_messages) = match anchor {
            Anchor::ThreadTail(_) => {
                let in_thread = self.groups.values().filter(|g| g.thread_id == thread_id);
                match tail_group(in_thread) {
                    Some(g) => (g.clone(), self.active_in(&g.id)),
                    None => return Vec::new(),
                }
            }
            Anchor::Group(id) => match self.groups.get(id) {
                Some(g) => (g.clone(), self.active_in(id)),
                None => return Vec::new(),
            },
            Anchor::Message(m) => match self.groups.get(&m.message_group_id) {
                Some(g) => (g.clone(), vec![m.clone()]),
                None => return Vec::new(),
            },
        };

        let mut visited: HashSet<Id> = HashSet::new();
        visited.insert(tail.id.clone());
        let mut reversed: Vec<Vec<(MessageGroup, Message)>> = vec![tail_messages
            .into_iter()
            .map(|m| (tail.clone(), m))
            .collect()];

        let mut prev = tail.previous_message_group_id.clone();
        while let Some(id) = prev {
            if !visited.insert(id.clone()) {
                tracing::warn!(message_group_id = %id, "message group chain loops, stopping walk");
                break;
            }
            let Some(group) = self.groups.get(&id) else {
                tracing::warn!(message_group_id = %id, "predecessor group missing or deleted, stopping walk");
                break;
            };
            reversed.push(
                self.active_in(&id)
                    .into_iter()
                    .map(|m| (group.clone(), m))
                    .collect(),
            );
            prev = group.previous_message_group_id.clone();
        }

        reversed.into_iter().rev().flatten().collect()
    }
}

fn dedup(ids: impl Iterator<Item = Id>) -> Vec<Id> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}
