//! End-to-end HTTP tests against a live listener.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use tl_domain::config::Config;
use tl_domain::delta::{BoxStream, Delta, TokenCount};
use tl_domain::entity::{ProjectMember, ProjectRole};
use tl_domain::error::{Error, Result};
use tl_domain::message::ProviderMessage;
use tl_engine::StreamEngine;
use tl_gateway::api;
use tl_gateway::state::AppState;
use tl_providers::openai_compat::estimate_tokens;
use tl_providers::{CompletionRequest, ModelProvider, ProviderRegistry};
use tl_store::{ConversationStore, DirFileGroups, MemoryStore};

const PROJECT: &str = "proj-1";

struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<Result<Delta>>>>,
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream_completion(
        &self,
        _req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<Delta>>> {
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
        "scripted"
    }
}

/// Serve the API on an ephemeral port and return its base URL.
async fn spawn_server(scripts: Vec<Vec<Result<Delta>>>, token: Option<&str>) -> String {
    let config = Arc::new(Config::default());
    let store = MemoryStore::new();

    let mut tx = store.begin().await.unwrap();
    tx.put_member(ProjectMember {
        project_id: PROJECT.into(),
        user_id: "alice".into(),
        role: ProjectRole::Member,
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut registry = ProviderRegistry::default().with_default_model("scripted/echo-1");
    registry.insert(Arc::new(ScriptedProvider {
        scripts: Mutex::new(scripts.into()),
    }));
    let llm = Arc::new(registry);

    let engine = Arc::new(StreamEngine::new(
        Arc::new(store.clone()),
        Arc::new(DirFileGroups::new(std::env::temp_dir().join("tl-gateway-no-files"))),
        llm.clone(),
        config.llm.clone(),
        config.stream.clone(),
    ));

    let state = AppState {
        config,
        store,
        llm,
        engine,
        api_token_hash: token.map(|t| Sha256::digest(t.as_bytes()).to_vec()),
    };
    let app = api::router(state.clone()).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn create_thread(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .post(format!("{base}/v1/threads"))
        .header("x-user-id", "alice")
        .json(&json!({ "projectId": PROJECT, "title": "t" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["threadId"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn health_is_public() {
    let base = spawn_server(vec![], Some("secret")).await;
    let resp = reqwest::get(format!("{base}/v1/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn models_lists_registered_providers() {
    let base = spawn_server(vec![], None).await;
    let body: Value = reqwest::get(format!("{base}/v1/models"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["providers"][0], "scripted");
    assert_eq!(body["default_model"], "scripted/echo-1");
}

#[tokio::test]
async fn bearer_token_gates_protected_routes() {
    let base = spawn_server(vec![], Some("secret")).await;
    let client = reqwest::Client::new();
    let body = json!({ "projectId": PROJECT });

    let resp = client
        .post(format!("{base}/v1/threads"))
        .header("x-user-id", "alice")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base}/v1/threads"))
        .header("x-user-id", "alice")
        .bearer_auth("secret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn missing_user_header_is_unauthorized() {
    let base = spawn_server(vec![], None).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/threads"))
        .json(&json!({ "projectId": PROJECT }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn non_member_is_forbidden() {
    let base = spawn_server(vec![], None).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/threads"))
        .header("x-user-id", "mallory")
        .json(&json!({ "projectId": PROJECT }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn unknown_thread_is_not_found() {
    let base = spawn_server(vec![], None).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/stream"))
        .header("x-user-id", "alice")
        .json(&json!({ "kind": "thread", "ids": ["nope"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn post_then_stream_ends_with_done() {
    let base = spawn_server(
        vec![vec![
            Ok(Delta::text("Hel")),
            Ok(Delta::text("lo")),
            Ok(Delta::finish("stop")),
        ]],
        None,
    )
    .await;
    let client = reqwest::Client::new();
    let thread_id = create_thread(&client, &base).await;

    let resp = client
        .post(format!("{base}/v1/threads/{thread_id}/messages"))
        .header("x-user-id", "alice")
        .json(&json!({ "text": "Say hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{base}/v1/chat/stream"))
        .header("x-user-id", "alice")
        .json(&json!({ "kind": "thread", "ids": [thread_id] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert!(resp.headers().contains_key("x-stream-ids"));

    let text = resp.text().await.unwrap();
    assert!(text.contains("\"type\":\"started\""), "{text}");
    assert!(text.contains("data: [DONE]"), "{text}");
    assert!(text.contains("\"label\":\"Hello\""), "{text}");
    assert!(!text.contains("error: "), "{text}");
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let base = spawn_server(vec![], None).await;
    let client = reqwest::Client::new();
    let thread_id = create_thread(&client, &base).await;

    let resp = client
        .post(format!("{base}/v1/threads/{thread_id}/messages"))
        .header("x-user-id", "alice")
        .json(&json!({ "text": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn count_tokens_reports_a_total() {
    let base = spawn_server(vec![], None).await;
    let client = reqwest::Client::new();
    let thread_id = create_thread(&client, &base).await;

    client
        .post(format!("{base}/v1/threads/{thread_id}/messages"))
        .header("x-user-id", "alice")
        .json(&json!({ "text": "How many tokens is this sentence?" }))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{base}/v1/chat/count-tokens"))
        .json(&json!({ "kind": "thread", "ids": [thread_id] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["totalTokens"].as_u64().unwrap() > 0);
}
