//! Stream orchestration.
//!
//! `start` resolves a selector, prepares one target message per chain and
//! spawns one task per chain. Each task owns its stock and commit
//! coordinator; tasks share nothing but the store.

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tl_domain::capability::ModelCapabilities;
use tl_domain::config::{LlmConfig, StreamConfig};
use tl_domain::delta::TokenCount;
use tl_domain::entity::{
    new_id, ContentPart, Id, Message, MessageGroup, Principal, RequestConfig, Status, Thread,
    ThreadGroup,
};
use tl_domain::error::{Error, Result};
use tl_domain::message::{ProviderMessage, Role};
use tl_domain::trace::TraceEvent;
use tl_providers::{CompletionRequest, ModelProvider, ProviderRegistry};
use tl_store::{ConversationStore, FileGroupResolver, Transaction};

use crate::accumulate::StreamStock;
use crate::assemble::ContentAssembler;
use crate::commit::CommitCoordinator;
use crate::events::{EventBody, WireEvent};
use crate::history::{
    tail_group, ChainEntry, HistoryResolver, ResolveMode, ResolvedChain, Selector,
};

/// A running stream, one per resolved chain.
pub struct StreamHandle {
    pub stream_id: String,
    pub thread_id: Id,
    pub message_id: Id,
    pub events: mpsc::Receiver<WireEvent>,
    pub task: JoinHandle<()>,
}

/// What `post_user_message` wrote.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub message_group: MessageGroup,
    pub message: Message,
    pub content_part: ContentPart,
}

/// The message a stream writes into, and the history it answers.
struct Target {
    group: MessageGroup,
    message: Message,
    placeholder: ContentPart,
    history: Vec<ChainEntry>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StreamEngine {
    store: Arc<dyn ConversationStore>,
    resolver: HistoryResolver,
    assembler: Arc<ContentAssembler>,
    providers: Arc<ProviderRegistry>,
    llm: LlmConfig,
    config: StreamConfig,
}

impl StreamEngine {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        files: Arc<dyn FileGroupResolver>,
        providers: Arc<ProviderRegistry>,
        llm: LlmConfig,
        config: StreamConfig,
    ) -> Self {
        Self {
            resolver: HistoryResolver::new(store.clone()),
            assembler: Arc::new(ContentAssembler::new(
                store.clone(),
                files,
                config.pdf_end_marker.clone(),
            )),
            store,
            providers,
            llm,
            config,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Start one stream per chain `selector` resolves to.
    ///
    /// Everything that can be rejected up front (resolution, membership,
    /// model routing) fails here, before any write. Later failures arrive
    /// as the stream's terminal error event.
    pub async fn start(&self, selector: &Selector, principal: &Principal) -> Result<Vec<StreamHandle>> {
        let chains = self
            .resolver
            .resolve(selector, Some(principal), ResolveMode::Run)
            .await?;

        let mut routed = Vec::with_capacity(chains.len());
        for chain in chains {
            let spec = self.model_spec(&chain.thread.request_config)?;
            let (provider, model) = self.providers.resolve(Some(&spec))?;
            routed.push((chain, spec, provider, model));
        }

        // Every target lands in one commit; nothing runs unless all do.
        let mut tx = self.store.begin().await?;
        let mut prepared = Vec::with_capacity(routed.len());
        for (chain, spec, provider, model) in routed {
            let target = self.prepare_target(&chain, tx.as_mut()).await?;
            prepared.push((chain, target, spec, provider, model));
        }
        tx.commit().await?;

        Ok(prepared
            .into_iter()
            .map(|(chain, target, spec, provider, model)| {
                self.spawn(chain, target, spec, provider, model)
            })
            .collect())
    }

    /// Count the tokens of every chain `selector` resolves to. No
    /// membership check, nothing written.
    pub async fn count_tokens(&self, selector: &Selector) -> Result<TokenCount> {
        let chains = self
            .resolver
            .resolve(selector, None, ResolveMode::CountOnly)
            .await?;

        let mut total = TokenCount::default();
        for chain in chains {
            let spec = self.model_spec(&chain.thread.request_config)?;
            let (provider, model) = self.providers.resolve(Some(&spec))?;
            let caps = self.llm.capabilities_for(&spec);
            let messages = provider_messages(
                &self.assembler,
                &chain.entries,
                &caps,
                &chain.thread.request_config,
            )
            .await?;
            total += provider.count_tokens(&messages, Some(&model)).await?;
        }
        Ok(total)
    }

    /// Append a user turn with one text part to the end of a thread.
    pub async fn post_user_message(
        &self,
        principal: &Principal,
        thread_id: &str,
        text: impl Into<String>,
    ) -> Result<PostedMessage> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::Invalid("message text is empty".into()));
        }

        let thread = self.live_thread(thread_id).await?;
        let thread_group = self
            .store
            .thread_groups(std::slice::from_ref(&thread.thread_group_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("thread group {}", thread.thread_group_id)))?;
        self.resolver.authorize(&thread_group.project_id, principal).await?;

        let groups = self
            .store
            .message_groups_in_threads(std::slice::from_ref(&thread.id))
            .await?;
        let tail = tail_group(groups.iter());

        let now = Utc::now();
        let message_group = MessageGroup {
            id: new_id(),
            thread_id: thread.id.clone(),
            role: Role::User,
            previous_message_group_id: tail.map(|g| g.id.clone()),
            seq: tail.map_or(0, |g| g.seq + 1),
            status: Status::Normal,
            created_at: now,
            updated_at: now,
        };
        let message = new_message(&message_group.id, None, 0, 0);
        let mut content_part = ContentPart::placeholder(&message.id, 0);
        content_part.text = text;

        let mut tx = self.store.begin().await?;
        tx.put_message_group(message_group.clone()).await?;
        tx.put_message(message.clone()).await?;
        tx.put_content_part(content_part.clone()).await?;
        tx.commit().await?;

        Ok(PostedMessage {
            message_group,
            message,
            content_part,
        })
    }

    /// Create a thread group with a single thread in `project_id`.
    pub async fn create_thread(
        &self,
        principal: &Principal,
        project_id: &str,
        title: impl Into<String>,
        request_config: RequestConfig,
    ) -> Result<(ThreadGroup, Thread)> {
        self.resolver.authorize(project_id, principal).await?;
        if let Some(spec) = request_config.model.as_deref() {
            self.providers.resolve(Some(spec))?;
        }

        let now = Utc::now();
        let group = ThreadGroup {
            id: new_id(),
            project_id: project_id.to_owned(),
            title: title.into(),
            status: Status::Normal,
            created_at: now,
            updated_at: now,
        };
        let thread = Thread {
            id: new_id(),
            thread_group_id: group.id.clone(),
            status: Status::Normal,
            request_config,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.put_thread_group(group.clone()).await?;
        tx.put_thread(thread.clone()).await?;
        tx.commit().await?;
        Ok((group, thread))
    }

    // ── Internals ──────────────────────────────────────────────────

    fn model_spec(&self, request_config: &RequestConfig) -> Result<String> {
        self.providers
            .effective_spec(request_config.model.as_deref())
            .ok_or_else(|| Error::Invalid("no model given and no default_model configured".into()))
    }

    async fn live_thread(&self, thread_id: &str) -> Result<Thread> {
        self.store
            .threads(&[thread_id.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("thread {thread_id}")))
    }

    /// Stage the message the stream writes into, with its placeholder, in
    /// `tx`.
    ///
    /// An assistant tail is re-run: a new version of the tail message
    /// answering the history before it. Anything else gets a fresh
    /// assistant group after the tail.
    async fn prepare_target(
        &self,
        chain: &ResolvedChain,
        tx: &mut dyn Transaction,
    ) -> Result<Target> {
        let Some(tail) = chain.tail() else {
            return Err(Error::NotFound(format!("thread {} is empty", chain.thread.id)));
        };

        let (group, message, history) = if tail.message_group.role == Role::Assistant {
            let versions = self
                .store
                .messages_in_groups(std::slice::from_ref(&tail.message_group.id))
                .await?;
            let seq = versions
                .iter()
                .filter(|m| m.sub_seq == tail.message.sub_seq)
                .map(|m| m.seq)
                .max()
                .unwrap_or(tail.message.seq)
                + 1;
            let root = tail
                .message
                .edited_root_message_id
                .clone()
                .unwrap_or_else(|| tail.message.id.clone());

            let mut group = tail.message_group.clone();
            group.updated_at = Utc::now();
            let message = new_message(&group.id, Some(root), tail.message.sub_seq, seq);
            let history = chain.entries[..chain.entries.len() - 1].to_vec();
            (group, message, history)
        } else {
            let now = Utc::now();
            let group = MessageGroup {
                id: new_id(),
                thread_id: chain.thread.id.clone(),
                role: Role::Assistant,
                previous_message_group_id: Some(tail.message_group.id.clone()),
                seq: tail.message_group.seq + 1,
                status: Status::Normal,
                created_at: now,
                updated_at: now,
            };
            let message = new_message(&group.id, None, 0, 0);
            (group, message, chain.entries.clone())
        };
        let placeholder = ContentPart::placeholder(&message.id, 0);

        tx.put_message_group(group.clone()).await?;
        tx.put_message(message.clone()).await?;
        tx.put_content_part(placeholder.clone()).await?;

        Ok(Target {
            group,
            message,
            placeholder,
            history,
        })
    }

    fn spawn(
        &self,
        chain: ResolvedChain,
        target: Target,
        model_spec: String,
        provider: Arc<dyn ModelProvider>,
        model: String,
    ) -> StreamHandle {
        let stream_id = new_id();
        let message_id = target.message.id.clone();
        let thread_id = chain.thread.id.clone();
        let (tx, rx) = mpsc::channel::<WireEvent>(self.config.channel_capacity.max(1));

        let cached_content = chain
            .thread
            .request_config
            .live_cache(Utc::now())
            .map(|c| c.name.clone());
        let run = StreamRun {
            stream_id: stream_id.clone(),
            project_id: chain.thread_group.project_id.clone(),
            caps: self.llm.capabilities_for(&model_spec),
            request_config: chain.thread.request_config,
            cached_content,
            model_spec,
            provider,
            model,
            store: self.store.clone(),
            assembler: self.assembler.clone(),
            label_max_chars: self.config.label_max_chars,
        };

        let span = tracing::info_span!(
            "stream",
            %stream_id,
            %message_id,
            %thread_id,
        );
        let task = tokio::spawn(tracing::Instrument::instrument(run.run(target, tx), span));

        StreamHandle {
            stream_id,
            thread_id,
            message_id,
            events: rx,
            task,
        }
    }
}

fn new_message(group_id: &str, edited_root: Option<Id>, sub_seq: i32, seq: i32) -> Message {
    let now = Utc::now();
    Message {
        id: new_id(),
        message_group_id: group_id.to_owned(),
        edited_root_message_id: edited_root,
        sub_seq,
        seq,
        label: String::new(),
        cache_id: None,
        status: Status::Normal,
        created_at: now,
        updated_at: now,
    }
}

/// Assemble a chain and prepend the thread's system prompt.
async fn provider_messages(
    assembler: &ContentAssembler,
    entries: &[ChainEntry],
    caps: &ModelCapabilities,
    request_config: &RequestConfig,
) -> Result<Vec<ProviderMessage>> {
    let mut messages = assembler.assemble(entries, caps).await?;
    if let Some(prompt) = request_config
        .system_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
    {
        messages.insert(0, ProviderMessage::system(prompt));
    }
    Ok(messages)
}

/// Fan the events of several streams into one receiver. The receiver
/// closes once every stream has sent its terminal event.
pub fn merge(handles: Vec<StreamHandle>, capacity: usize) -> mpsc::Receiver<WireEvent> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    for mut handle in handles {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = handle.events.recv().await {
                if tx.send(event).await.is_err() {
                    // Keep draining so the stream task never blocks on a
                    // full channel.
                    while handle.events.recv().await.is_some() {}
                    break;
                }
            }
        });
    }
    rx
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StreamRun {
    stream_id: String,
    project_id: Id,
    caps: ModelCapabilities,
    request_config: RequestConfig,
    cached_content: Option<String>,
    model_spec: String,
    provider: Arc<dyn ModelProvider>,
    model: String,
    store: Arc<dyn ConversationStore>,
    assembler: Arc<ContentAssembler>,
    label_max_chars: usize,
}

impl StreamRun {
    async fn run(self, target: Target, tx: mpsc::Sender<WireEvent>) {
        let Target {
            group,
            message,
            placeholder,
            history,
        } = target;
        let message_id = message.id.clone();
        let mut sink = EventSink::new(tx, self.stream_id.clone(), message_id.clone());

        sink.send(EventBody::Started {
            message_group_id: group.id.clone(),
            content_part_id: placeholder.id.clone(),
            model: self.model_spec.clone(),
        })
        .await;

        let mut stock = StreamStock::new();
        let mut coordinator = CommitCoordinator::new(
            self.store.clone(),
            self.stream_id.clone(),
            self.project_id.clone(),
            message,
            placeholder,
        );
        let mut deltas = 0usize;

        let outcome = match self
            .drive(&history, &mut stock, &mut coordinator, &mut sink, &mut deltas)
            .await
        {
            Ok(finish_reason) => coordinator
                .complete(&mut stock, self.provider.as_ref(), &self.model, self.label_max_chars)
                .await
                .map(|label| (label, finish_reason)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((label, finish_reason)) => {
                tracing::info!(deltas, flushes = coordinator.flushes(), "stream completed");
                TraceEvent::StreamCompleted {
                    stream_id: self.stream_id.clone(),
                    message_id: message_id.clone(),
                    deltas,
                    flushes: coordinator.flushes(),
                }
                .emit();
                sink.send(EventBody::Done {
                    label,
                    finish_reason,
                })
                .await;
            }
            Err(error) => {
                let surfaced = coordinator
                    .fail(&mut stock, error, self.provider.as_ref(), &self.model)
                    .await;
                tracing::warn!(kind = surfaced.kind(), error = %surfaced, deltas, "stream failed");
                TraceEvent::StreamFailed {
                    stream_id: self.stream_id.clone(),
                    message_id,
                    kind: surfaced.kind().to_owned(),
                    error: surfaced.to_string(),
                }
                .emit();
                sink.send(EventBody::error(&surfaced)).await;
            }
        }
    }

    /// Send the request and fold every delta. Returns the finish reason.
    async fn drive(
        &self,
        history: &[ChainEntry],
        stock: &mut StreamStock,
        coordinator: &mut CommitCoordinator,
        sink: &mut EventSink,
        deltas: &mut usize,
    ) -> Result<Option<String>> {
        let messages =
            provider_messages(&self.assembler, history, &self.caps, &self.request_config).await?;

        TraceEvent::StreamStarted {
            stream_id: self.stream_id.clone(),
            message_id: coordinator.message().id.clone(),
            model: self.model_spec.clone(),
            provider_messages: messages.len(),
        }
        .emit();

        let request = CompletionRequest {
            messages,
            model: Some(self.model.clone()),
            temperature: self.request_config.temperature,
            max_tokens: self.request_config.max_tokens,
            cached_content: self.cached_content.clone(),
        };
        let mut stream = self.provider.stream_completion(&request).await?;

        let mut finish_reason = None;
        while let Some(item) = stream.next().await {
            let delta = item?;
            *deltas += 1;

            if !stock.fold(&delta) {
                sink.send(EventBody::Delta { delta }).await;
                continue;
            }

            // Terminal delta: persist before the client sees it.
            finish_reason = delta.finish_reason().map(String::from);
            let report = coordinator.flush(stock).await?;
            sink.send(EventBody::Delta { delta }).await;
            if let Some(report) = report {
                sink.send(EventBody::Flushed {
                    content_part_ids: report.content_part_ids,
                    placeholder_id: report.placeholder_id,
                    tool_call_group_ids: report.tool_call_group_ids,
                })
                .await;
            }
        }
        Ok(finish_reason)
    }
}

/// Sends events for one stream and notices when the client is gone.
/// Persistence carries on regardless.
struct EventSink {
    tx: mpsc::Sender<WireEvent>,
    stream_id: String,
    message_id: Id,
    closed: bool,
}

impl EventSink {
    fn new(tx: mpsc::Sender<WireEvent>, stream_id: String, message_id: Id) -> Self {
        Self {
            tx,
            stream_id,
            message_id,
            closed: false,
        }
    }

    async fn send(&mut self, body: EventBody) {
        if self.closed {
            return;
        }
        let event = WireEvent::new(self.stream_id.clone(), self.message_id.clone(), body);
        if self.tx.send(event).await.is_err() {
            self.closed = true;
            tracing::debug!("event receiver dropped, continuing without a client");
        }
    }
}
