//! Stream commit coordination.
//!
//! A flush turns the stock into a [`FlushPlan`] (pure), applies the plan in
//! one transaction, and only then clears the stock and records the new
//! tool-call bindings. A failed commit leaves the stock untouched so the
//! next flush retries the same writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use tl_domain::entity::{
    new_id, ContentPart, ContentPartType, Id, Message, ToolCallGroup, ToolCallPart,
};
use tl_domain::error::{Error, Result};
use tl_domain::message::ProviderMessage;
use tl_domain::trace::TraceEvent;
use tl_providers::ModelProvider;
use tl_store::ConversationStore;

use crate::accumulate::StreamStock;

/// Writes one flush will perform.
#[derive(Debug, Clone)]
pub struct FlushPlan {
    /// Groups for tool-call ids that have none yet, one per tool chunk.
    pub new_groups: Vec<NewGroup>,
    pub tool_call_parts: Vec<ToolCallPart>,
    /// Content parts written with buffered chunks, in order.
    pub content_parts: Vec<ContentPart>,
    /// The empty part subsequent output goes into.
    pub next_placeholder: ContentPart,
}

/// A tool-call group a flush creates and the ids bound to it.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub group: ToolCallGroup,
    pub tool_call_ids: Vec<String>,
}

/// What a committed flush made visible.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    pub content_part_ids: Vec<Id>,
    pub placeholder_id: Id,
    pub tool_call_group_ids: Vec<Id>,
    pub tool_call_parts: usize,
}

/// Persists one stream's output into its owning message.
pub struct CommitCoordinator {
    store: Arc<dyn ConversationStore>,
    stream_id: String,
    project_id: Id,
    message: Message,
    /// The pre-allocated empty part the next chunk overwrites.
    placeholder: ContentPart,
    flushes: usize,
}

impl CommitCoordinator {
    /// `placeholder` must already be committed.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        stream_id: impl Into<String>,
        project_id: impl Into<Id>,
        message: Message,
        placeholder: ContentPart,
    ) -> Self {
        Self {
            store,
            stream_id: stream_id.into(),
            project_id: project_id.into(),
            message,
            placeholder,
            flushes: 0,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn placeholder(&self) -> &ContentPart {
        &self.placeholder
    }

    /// Number of committed, non-empty flushes.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Build the writes for the current stock without touching anything.
    ///
    /// Every tool chunk gets its own group for the ids it introduces, so
    /// one tool content part links exactly one round of tool usage.
    /// Fragments whose id no chunk covers share one extra group.
    pub fn plan(&self, stock: &StreamStock) -> FlushPlan {
        let now = Utc::now();

        let mut new_groups: Vec<NewGroup> = Vec::new();
        let mut planned: HashMap<String, Id> = HashMap::new();
        let mut open_group = |ids: Vec<String>, planned: &mut HashMap<String, Id>| {
            if ids.is_empty() {
                return;
            }
            let group = ToolCallGroup {
                id: new_id(),
                project_id: self.project_id.clone(),
                created_at: now,
            };
            for id in &ids {
                planned.insert(id.clone(), group.id.clone());
            }
            new_groups.push(NewGroup {
                group,
                tool_call_ids: ids,
            });
        };

        for chunk in stock.chunks() {
            let mut ids: Vec<String> = Vec::new();
            for id in chunk.tool_call_ids() {
                if stock.group_of(id).is_none()
                    && !planned.contains_key(id)
                    && !ids.iter().any(|i| i == id)
                {
                    ids.push(id.to_owned());
                }
            }
            open_group(ids, &mut planned);
        }
        let stray: Vec<String> = stock
            .unbound_ids()
            .into_iter()
            .filter(|id| !planned.contains_key(id))
            .collect();
        open_group(stray, &mut planned);

        let group_for = |tool_call_id: &str| -> Option<Id> {
            stock
                .group_of(tool_call_id)
                .or_else(|| planned.get(tool_call_id))
                .cloned()
        };

        let tool_call_parts = stock
            .fragments()
            .iter()
            .filter_map(|f| {
                Some(ToolCallPart {
                    id: new_id(),
                    tool_call_group_id: group_for(f.tool_call_id.as_str())?,
                    tool_call_id: f.tool_call_id.clone(),
                    kind: f.kind,
                    body: f.body.clone(),
                    seq: f.seq,
                    created_at: now,
                })
            })
            .collect();

        let mut content_parts = Vec::with_capacity(stock.chunks().len());
        let mut slot = self.placeholder.clone();
        for chunk in stock.chunks() {
            slot.kind = chunk.kind();
            slot.text = chunk.text();
            slot.link_id = chunk.tool_call_ids().first().and_then(|id| group_for(*id));
            slot.updated_at = now;
            let next_seq = slot.seq + 1;
            let kind = slot.kind;
            content_parts.push(slot);

            slot = ContentPart::placeholder(&self.message.id, next_seq);
            slot.kind = kind;
        }

        FlushPlan {
            new_groups,
            tool_call_parts,
            content_parts,
            next_placeholder: slot,
        }
    }

    /// Persist the stock. A no-op for an empty stock.
    pub async fn flush(&mut self, stock: &mut StreamStock) -> Result<Option<FlushReport>> {
        if stock.is_empty() {
            return Ok(None);
        }
        let started = Instant::now();
        let plan = self.plan(stock);

        let mut tx = self.store.begin().await?;
        for new in &plan.new_groups {
            tx.put_tool_call_group(new.group.clone()).await?;
        }
        for part in &plan.tool_call_parts {
            tx.put_tool_call_part(part.clone()).await?;
        }
        for part in &plan.content_parts {
            tx.put_content_part(part.clone()).await?;
        }
        if !plan.content_parts.is_empty() {
            tx.put_content_part(plan.next_placeholder.clone()).await?;
        }
        tx.commit().await?;

        // Committed: now the stock can forget what it held.
        stock.clear();
        for new in &plan.new_groups {
            stock.bind(&new.tool_call_ids, &new.group.id);
        }
        if !plan.content_parts.is_empty() {
            self.placeholder = plan.next_placeholder.clone();
        }
        self.flushes += 1;

        TraceEvent::StockFlushed {
            stream_id: self.stream_id.clone(),
            content_parts: plan.content_parts.len(),
            tool_call_parts: plan.tool_call_parts.len(),
            new_tool_call_groups: plan.new_groups.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        Ok(Some(FlushReport {
            content_part_ids: plan.content_parts.iter().map(|p| p.id.clone()).collect(),
            placeholder_id: self.placeholder.id.clone(),
            tool_call_group_ids: plan.new_groups.into_iter().map(|n| n.group.id).collect(),
            tool_call_parts: plan.tool_call_parts.len(),
        }))
    }

    /// Final flush, then label the message and count tokens of its
    /// non-empty parts. Returns the label.
    pub async fn complete(
        &mut self,
        stock: &mut StreamStock,
        provider: &dyn ModelProvider,
        model: &str,
        label_max_chars: usize,
    ) -> Result<String> {
        self.flush(stock).await?;

        let parts = self
            .store
            .content_parts_of_messages(std::slice::from_ref(&self.message.id))
            .await?;
        let label: String = parts
            .iter()
            .filter(|p| p.kind == ContentPartType::Text)
            .map(|p| p.text.as_str())
            .collect::<String>()
            .chars()
            .take(label_max_chars)
            .collect();

        let mut counted = Vec::new();
        for mut part in parts.into_iter().filter(|p| !p.is_empty()) {
            if let Some(tokens) = count_part(provider, model, &part).await {
                part.token_count = Some(tokens);
                counted.push(part);
            }
        }

        let mut message = self.message.clone();
        message.label = label.clone();
        message.updated_at = Utc::now();

        let mut tx = self.store.begin().await?;
        tx.put_message(message.clone()).await?;
        for part in counted {
            tx.put_content_part(part).await?;
        }
        tx.commit().await?;

        self.message = message;
        Ok(label)
    }

    /// Failure path: best-effort final flush, then write the formatted
    /// error into the message's open placeholder. Returns the error to
    /// surface.
    pub async fn fail(
        &mut self,
        stock: &mut StreamStock,
        error: Error,
        provider: &dyn ModelProvider,
        model: &str,
    ) -> Error {
        let mut surfaced = error;

        if let Err(flush_err) = self.flush(stock).await {
            tracing::warn!(
                stream_id = %self.stream_id,
                error = %flush_err,
                "final flush after stream failure failed"
            );
            surfaced = surfaced.more_specific(flush_err);
        }

        let mut part = self.placeholder.clone();
        part.kind = ContentPartType::Error;
        part.text = surfaced.to_content_text();
        part.link_id = None;
        part.updated_at = Utc::now();
        part.token_count = count_part(provider, model, &part).await;

        let written: Result<()> = async {
            let mut tx = self.store.begin().await?;
            tx.put_content_part(part.clone()).await?;
            tx.commit().await
        }
        .await;

        match written {
            Ok(()) => {
                // The error occupies the placeholder; open a fresh one in
                // memory only, nothing will write to it.
                self.placeholder = ContentPart::placeholder(&self.message.id, part.seq + 1);
            }
            Err(write_err) => {
                tracing::error!(
                    stream_id = %self.stream_id,
                    message_id = %self.message.id,
                    error = %write_err,
                    "could not persist error content part"
                );
                surfaced = surfaced.more_specific(write_err);
            }
        }
        surfaced
    }
}

async fn count_part(provider: &dyn ModelProvider, model: &str, part: &ContentPart) -> Option<u32> {
    let probe = [ProviderMessage::user(part.text.clone())];
    match provider.count_tokens(&probe, Some(model)).await {
        Ok(count) => Some(count.total_tokens),
        Err(e) => {
            tracing::warn!(
                content_part_id = %part.id,
                error = %e,
                "token count failed, leaving it unset"
            );
            None
        }
    }
}
