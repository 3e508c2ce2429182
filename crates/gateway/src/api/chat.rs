//! Streaming endpoints.
//!
//! - `POST /v1/chat/stream`       — run the model on every chain a selector
//!   resolves to and stream the merged events
//! - `POST /v1/chat/count-tokens` — count tokens without running anything

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use tl_engine::{merge, Selector};

use crate::api::{auth, error_response};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(selector): Json<Selector>,
) -> Response {
    let principal = match auth::principal(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    // Pre-flight: reject early with 503 if no LLM providers are available.
    if let Err(resp) = require_llm_provider(&state) {
        return resp.into_response();
    }

    let handles = match state.engine.start(&selector, &principal).await {
        Ok(h) => h,
        Err(e) => return error_response(&e),
    };

    let stream_ids = handles
        .iter()
        .map(|h| format!("{}|{}", h.stream_id, h.message_id))
        .collect::<Vec<_>>()
        .join(",");
    tracing::info!(
        selector = %selector,
        user = %principal.user_id,
        streams = handles.len(),
        "chat stream started"
    );

    let mut events = merge(handles, state.config.stream.channel_capacity);
    let body = Body::from_stream(async_stream::stream! {
        while let Some(ev) = events.recv().await {
            yield Ok::<_, Infallible>(ev.to_sse_line());
        }
    });

    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(v) = HeaderValue::from_str(&stream_ids) {
        h.insert("x-stream-ids", v);
    }
    resp
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/count-tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn count_tokens(
    State(state): State<AppState>,
    Json(selector): Json<Selector>,
) -> Response {
    if let Err(resp) = require_llm_provider(&state) {
        return resp.into_response();
    }

    match state.engine.count_tokens(&selector).await {
        Ok(count) => Json(count).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn require_llm_provider(state: &AppState) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    if !state.llm.is_empty() {
        return Ok(());
    }

    Err((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": "no_llm_provider",
            "reason": "No LLM providers are available. Configure at least one \
                       provider in config.toml under [llm.providers], or check \
                       /v1/models for details.",
        })),
    ))
}
