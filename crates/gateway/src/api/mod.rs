pub mod auth;
pub mod chat;
pub mod health;
pub mod threads;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use tl_domain::error::Error;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/models", get(health::list_providers));

    let protected = Router::new()
        // Threads and user turns
        .route("/v1/threads", post(threads::create_thread))
        .route("/v1/threads/:id/messages", post(threads::post_message))
        // Streaming
        .route("/v1/chat/stream", post(chat::chat_stream))
        .route("/v1/chat/count-tokens", post(chat::count_tokens))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

/// Map an engine error to a status code and a JSON body carrying its kind.
pub fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::Invalid(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Upstream { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(kind = err.kind(), error = %err, "request failed");
    }
    (
        status,
        Json(serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
        })),
    )
        .into_response()
}
