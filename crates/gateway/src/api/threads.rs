//! Thread creation and user turns.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use tl_domain::entity::RequestConfig;

use crate::api::{auth, error_response};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub project_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub request_config: RequestConfig,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/threads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateThreadRequest>,
) -> Response {
    let principal = match auth::principal(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match state
        .engine
        .create_thread(&principal, &body.project_id, body.title, body.request_config)
        .await
    {
        Ok((group, thread)) => {
            tracing::info!(
                project_id = %group.project_id,
                thread_group_id = %group.id,
                thread_id = %thread.id,
                "thread created"
            );
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "threadGroupId": group.id,
                    "threadId": thread.id,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/threads/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn post_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PostMessageRequest>,
) -> Response {
    let principal = match auth::principal(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match state
        .engine
        .post_user_message(&principal, &thread_id, body.text)
        .await
    {
        Ok(posted) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "messageGroupId": posted.message_group.id,
                "messageId": posted.message.id,
                "contentPartId": posted.content_part.id,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}
