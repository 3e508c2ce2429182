//! Drives the OpenAI-compatible adapter against a local SSE endpoint.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use futures_util::StreamExt;

use tl_domain::config::{AuthConfig, ProviderConfig, ProviderKind};
use tl_domain::message::ProviderMessage;
use tl_providers::openai_compat::OpenAiCompatProvider;
use tl_providers::{CompletionRequest, ModelProvider};

const BODY: &str = concat!(
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: {\"choices\":[],\"groundingMetadata\":{\"webSearchQueries\":[\"q\"]}}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/v1")
}

fn provider(base_url: String) -> OpenAiCompatProvider {
    let cfg = ProviderConfig {
        id: "local".into(),
        kind: ProviderKind::OpenaiCompat,
        base_url,
        auth: AuthConfig {
            key: Some("sk-local".into()),
            ..Default::default()
        },
        default_model: Some("test-model".into()),
    };
    OpenAiCompatProvider::from_config(&cfg, 5_000).unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest {
        messages: vec![ProviderMessage::user("hi")],
        ..Default::default()
    }
}

#[tokio::test]
async fn streams_raw_deltas_in_order() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async { ([("content-type", "text/event-stream")], BODY) }),
    );
    let p = provider(serve(router).await);

    let mut stream = p.stream_completion(&request()).await.unwrap();
    let mut deltas = Vec::new();
    while let Some(item) = stream.next().await {
        deltas.push(item.unwrap());
    }

    assert_eq!(deltas.len(), 4);
    assert_eq!(deltas[0].choices[0].delta.content.as_deref(), Some("Hel"));
    assert_eq!(deltas[1].choices[0].delta.content.as_deref(), Some("lo"));
    assert!(deltas[2].grounding_metadata.is_some());
    assert_eq!(deltas[3].finish_reason(), Some("stop"));
}

#[tokio::test]
async fn http_error_is_upstream() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response() }),
    );
    let p = provider(serve(router).await);

    let err = p.stream_completion(&request()).await.err().unwrap();
    assert_eq!(err.kind(), "upstream_error");
    assert!(err.to_string().contains("429"));
}
