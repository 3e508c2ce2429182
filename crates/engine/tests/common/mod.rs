//! Shared fixtures: a scripted provider and a seeded in-memory store.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use tl_domain::config::{LlmConfig, StreamConfig};
use tl_domain::delta::{BoxStream, Delta, TokenCount};
use tl_domain::entity::{
    new_id, ContentPart, Message, Principal, ProjectMember, ProjectRole, RequestConfig, Status,
    Thread, ThreadGroup,
};
use tl_domain::error::{Error, Result};
use tl_domain::message::ProviderMessage;
use tl_engine::{StreamEngine, StreamHandle, WireEvent};
use tl_providers::openai_compat::estimate_tokens;
use tl_providers::{CompletionRequest, ModelProvider, ProviderRegistry};
use tl_store::{ConversationStore, DirFileGroups, FileGroupResolver, MemoryStore};

pub const PROVIDER: &str = "scripted";
pub const MODEL: &str = "scripted/echo-1";

// ── Scripted provider ──────────────────────────────────────────────

/// Plays back one script per `stream_completion` call and records the
/// requests it was given.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<Result<Delta>>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<Result<Delta>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().expect("no request recorded")
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<Delta>>> {
        self.requests.lock().unwrap().push(req.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Other("script exhausted".into()))?;
        Ok(Box::pin(futures_util::stream::iter(script)))
    }

    async fn count_tokens(
        &self,
        messages: &[ProviderMessage],
        _model: Option<&str>,
    ) -> Result<TokenCount> {
        Ok(estimate_tokens(messages))
    }

    fn provider_id(&self) -> &str {
        PROVIDER
    }
}

pub fn upstream(message: &str) -> Error {
    Error::Upstream {
        provider: PROVIDER.into(),
        message: message.into(),
    }
}

// ── Fixture ────────────────────────────────────────────────────────

pub struct Fixture {
    pub store: MemoryStore,
    pub provider: Arc<ScriptedProvider>,
    pub engine: StreamEngine,
    pub principal: Principal,
    pub project_id: String,
    pub thread_group: ThreadGroup,
    pub thread: Thread,
}

impl Fixture {
    pub async fn new(scripts: Vec<Vec<Result<Delta>>>) -> Self {
        Self::build(scripts, RequestConfig::default(), None).await
    }

    pub async fn with_config(scripts: Vec<Vec<Result<Delta>>>, request_config: RequestConfig) -> Self {
        Self::build(scripts, request_config, None).await
    }

    pub async fn with_files(scripts: Vec<Vec<Result<Delta>>>, files_root: &std::path::Path) -> Self {
        Self::build(scripts, RequestConfig::default(), Some(files_root)).await
    }

    async fn build(
        scripts: Vec<Vec<Result<Delta>>>,
        request_config: RequestConfig,
        files_root: Option<&std::path::Path>,
    ) -> Self {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::new(scripts));

        let mut registry = ProviderRegistry::default().with_default_model(MODEL);
        registry.insert(provider.clone());

        let files: Arc<dyn FileGroupResolver> = match files_root {
            Some(root) => Arc::new(DirFileGroups::new(root)),
            None => Arc::new(DirFileGroups::new(std::env::temp_dir().join("tl-no-files"))),
        };
        let engine = StreamEngine::new(
            Arc::new(store.clone()),
            files,
            Arc::new(registry),
            LlmConfig::default(),
            StreamConfig::default(),
        );

        let project_id = new_id();
        let principal = Principal::new("alice");
        let now = Utc::now();
        let thread_group = ThreadGroup {
            id: new_id(),
            project_id: project_id.clone(),
            title: "fixture".into(),
            status: Status::Normal,
            created_at: now,
            updated_at: now,
        };
        let thread = Thread {
            id: new_id(),
            thread_group_id: thread_group.id.clone(),
            status: Status::Normal,
            request_config,
            created_at: now,
            updated_at: now,
        };

        let mut tx = store.begin().await.unwrap();
        tx.put_member(ProjectMember {
            project_id: project_id.clone(),
            user_id: principal.user_id.clone(),
            role: ProjectRole::Member,
        })
        .await
        .unwrap();
        tx.put_thread_group(thread_group.clone()).await.unwrap();
        tx.put_thread(thread.clone()).await.unwrap();
        tx.commit().await.unwrap();

        Self {
            store,
            provider,
            engine,
            principal,
            project_id,
            thread_group,
            thread,
        }
    }

    pub async fn grant(&self, user_id: &str, role: ProjectRole) {
        let mut tx = self.store.begin().await.unwrap();
        tx.put_member(ProjectMember {
            project_id: self.project_id.clone(),
            user_id: user_id.into(),
            role,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    pub async fn say(&self, text: &str) -> Message {
        self.engine
            .post_user_message(&self.principal, &self.thread.id, text)
            .await
            .unwrap()
            .message
    }

    pub async fn parts_of(&self, message_id: &str) -> Vec<ContentPart> {
        self.store
            .content_parts_of_messages(&[message_id.to_owned()])
            .await
            .unwrap()
    }

    pub async fn message(&self, message_id: &str) -> Message {
        self.store
            .messages(&[message_id.to_owned()])
            .await
            .unwrap()
            .into_iter()
            .next()
            .expect("message missing")
    }
}

/// Drain a stream to its terminal event and wait for its task.
pub async fn collect(mut handle: StreamHandle) -> Vec<WireEvent> {
    let mut events = Vec::new();
    while let Some(ev) = handle.events.recv().await {
        events.push(ev);
    }
    handle.task.await.unwrap();
    events
}

/// Non-empty parts only; placeholders opened after the last write are
/// left out.
pub fn written(parts: Vec<ContentPart>) -> Vec<ContentPart> {
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}
