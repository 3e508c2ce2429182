//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio and any other
//! endpoint that follows the chat-completions streaming contract. Chunks are
//! deserialized straight into [`Delta`] so grounding metadata and extra
//! roles pass through untouched.

use crate::traits::{CompletionRequest, ModelProvider};
use crate::util::{from_reqwest, resolve_api_key};
use serde_json::Value;
use tl_domain::config::{ProviderConfig, ProviderKind};
use tl_domain::delta::{BoxStream, Delta, TokenCount};
use tl_domain::error::{Error, Result};
use tl_domain::message::{ContentBlock, ProviderMessage, Role};

/// Flat token charge for an inline image or document block.
const INLINE_BLOCK_TOKENS: u32 = 258;
/// Per-message framing overhead in the chat format.
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A model provider adapter for any OpenAI-compatible API endpoint.
///
/// Also handles Azure OpenAI, which uses the same wire format but with a
/// different URL pattern (`/openai/deployments/{model}/chat/completions`)
/// and auth header (`api-key` instead of `Authorization: Bearer`).
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    auth_header: String,
    auth_prefix: String,
    default_model: String,
    client: reqwest::Client,
    /// When true, uses Azure OpenAI URL pattern and omits `model` from body.
    is_azure: bool,
}

impl OpenAiCompatProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig, timeout_ms: u64) -> Result<Self> {
        let is_azure = cfg.kind == ProviderKind::AzureOpenai;
        let api_key = resolve_api_key(&cfg.auth)?;

        let auth_header = cfg.auth.header.clone().unwrap_or_else(|| {
            if is_azure {
                "api-key".into()
            } else {
                "Authorization".into()
            }
        });
        let auth_prefix = cfg.auth.prefix.clone().unwrap_or_else(|| {
            if is_azure {
                String::new()
            } else {
                "Bearer ".into()
            }
        });

        let default_model = cfg.default_model.clone().unwrap_or_else(|| "gpt-4o".into());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_header,
            auth_prefix,
            default_model,
            client,
            is_azure,
        })
    }

    // ── Internal: build authenticated request builder ──────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let header_value = format!("{}{}", self.auth_prefix, self.api_key);
        self.client
            .post(url)
            .header(&self.auth_header, &header_value)
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &CompletionRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn chat_url(&self, model: &str) -> String {
        if self.is_azure {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version=2024-10-21",
                self.base_url, model
            )
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn build_chat_body(&self, req: &CompletionRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        // Azure embeds the deployment name in the URL.
        if !self.is_azure {
            body["model"] = Value::String(self.effective_model(req));
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(cache) = &req.cached_content {
            body["cached_content"] = Value::String(cache.clone());
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &ProviderMessage) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.text(),
        }),
        Role::Assistant => assistant_to_openai(msg),
        Role::System | Role::User => serde_json::json!({
            "role": msg.role.as_str(),
            "content": content_to_openai(&msg.content),
        }),
    }
}

/// Plain string when every block is text, otherwise a parts array.
fn content_to_openai(blocks: &[ContentBlock]) -> Value {
    let all_text = blocks.iter().all(|b| matches!(b, ContentBlock::Text { .. }));
    if all_text {
        let text: Vec<&str> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Inline { .. } => None,
            })
            .collect();
        return Value::String(text.join("\n"));
    }

    let parts: Vec<Value> = blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
            ContentBlock::Inline { media_type, data } => {
                let url = format!("data:{media_type};base64,{data}");
                if media_type.starts_with("image/") {
                    serde_json::json!({"type": "image_url", "image_url": {"url": url}})
                } else {
                    serde_json::json!({"type": "file", "file": {"file_data": url}})
                }
            }
        })
        .collect();
    Value::Array(parts)
}

fn assistant_to_openai(msg: &ProviderMessage) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});

    let text = msg.text();
    obj["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };

    if !msg.tool_calls.is_empty() {
        let calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {"name": tc.name, "arguments": tc.arguments},
                })
            })
            .collect();
        obj["tool_calls"] = Value::Array(calls);
    }
    obj
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a single SSE data payload. The `[DONE]` sentinel yields nothing;
/// the stream ends when the body closes.
fn parse_sse_data(data: &str) -> Vec<Result<Delta>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }
    match serde_json::from_str::<Delta>(data) {
        Ok(delta) => vec![Ok(delta)],
        Err(e) => vec![Err(Error::Json(e))],
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token estimate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Estimate token usage locally: four characters per token for text, a flat
/// charge per inline block, plus per-message framing.
pub fn estimate_tokens(messages: &[ProviderMessage]) -> TokenCount {
    let mut count = TokenCount::default();
    for msg in messages {
        count.total_tokens += MESSAGE_OVERHEAD_TOKENS;
        for block in &msg.content {
            match block {
                ContentBlock::Text { text } => {
                    let chars = text.chars().count() as u32;
                    count.total_tokens += chars.div_ceil(4);
                    count.total_billable_characters +=
                        text.chars().filter(|c| !c.is_whitespace()).count() as u64;
                }
                ContentBlock::Inline { .. } => count.total_tokens += INLINE_BLOCK_TOKENS,
            }
        }
        for call in &msg.tool_calls {
            let chars = (call.name.len() + call.arguments.len()) as u32;
            count.total_tokens += chars.div_ceil(4);
        }
    }
    count
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelProvider for OpenAiCompatProvider {
    async fn stream_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<Delta>>> {
        let url = self.chat_url(&self.effective_model(req));
        let body = self.build_chat_body(req);

        tracing::debug!(
            provider = %self.id,
            url = %url,
            messages = req.messages.len(),
            "openai_compat stream request"
        );

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Upstream {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        Ok(crate::sse::sse_response_stream(resp, parse_sse_data))
    }

    async fn count_tokens(
        &self,
        messages: &[ProviderMessage],
        _model: Option<&str>,
    ) -> Result<TokenCount> {
        Ok(estimate_tokens(messages))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tl_domain::config::AuthConfig;
    use tl_domain::message::ToolCallRef;

    fn provider(kind: ProviderKind) -> OpenAiCompatProvider {
        let cfg = ProviderConfig {
            id: "test".into(),
            kind,
            base_url: "https://example.test/v1/".into(),
            auth: AuthConfig {
                key: Some("sk-test".into()),
                ..Default::default()
            },
            default_model: None,
        };
        OpenAiCompatProvider::from_config(&cfg, 5_000).unwrap()
    }

    #[test]
    fn text_only_user_message_is_a_string() {
        let v = msg_to_openai(&ProviderMessage::user("hello"));
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hello");
    }

    #[test]
    fn inline_blocks_become_data_urls() {
        let mut msg = ProviderMessage::user("look");
        msg.content.push(ContentBlock::Inline {
            media_type: "image/png".into(),
            data: "AAAA".into(),
        });
        msg.content.push(ContentBlock::Inline {
            media_type: "application/pdf".into(),
            data: "JVBE".into(),
        });
        let v = msg_to_openai(&msg);
        let parts = v["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(parts[2]["file"]["file_data"], "data:application/pdf;base64,JVBE");
    }

    #[test]
    fn assistant_tool_calls_serialize() {
        let mut msg = ProviderMessage::new(Role::Assistant);
        msg.tool_calls.push(ToolCallRef {
            id: "call_1".into(),
            name: "search".into(),
            arguments: r#"{"q":"rust"}"#.into(),
        });
        let v = msg_to_openai(&msg);
        assert!(v["content"].is_null());
        assert_eq!(v["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(v["tool_calls"][0]["function"]["arguments"], r#"{"q":"rust"}"#);
    }

    #[test]
    fn tool_result_carries_call_id() {
        let v = msg_to_openai(&ProviderMessage::tool_result("call_1", "42"));
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_1");
        assert_eq!(v["content"], "42");
    }

    #[test]
    fn azure_omits_model_and_uses_deployment_url() {
        let p = provider(ProviderKind::AzureOpenai);
        let req = CompletionRequest {
            messages: vec![ProviderMessage::user("hi")],
            model: Some("gpt-4o".into()),
            ..Default::default()
        };
        let body = p.build_chat_body(&req);
        assert!(body.get("model").is_none());
        assert_eq!(
            p.chat_url("gpt-4o"),
            "https://example.test/v1/openai/deployments/gpt-4o/chat/completions?api-version=2024-10-21"
        );
        assert_eq!(p.auth_header, "api-key");
    }

    #[test]
    fn openai_body_carries_model_and_options() {
        let p = provider(ProviderKind::OpenaiCompat);
        let req = CompletionRequest {
            messages: vec![ProviderMessage::user("hi")],
            temperature: Some(0.5),
            cached_content: Some("cachedContents/abc".into()),
            ..Default::default()
        };
        let body = p.build_chat_body(&req);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["cached_content"], "cachedContents/abc");
        assert_eq!(p.chat_url("gpt-4o"), "https://example.test/v1/chat/completions");
    }

    #[test]
    fn sse_payloads_parse_to_deltas() {
        let items = parse_sse_data(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"f","arguments":""}}]}}]}"#,
        );
        let delta = items.into_iter().next().unwrap().unwrap();
        let calls = delta.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));

        assert!(parse_sse_data("[DONE]").is_empty());
        assert!(parse_sse_data("{oops").into_iter().next().unwrap().is_err());
    }

    #[test]
    fn token_estimate_counts_text_and_inline() {
        let mut msg = ProviderMessage::user("abcd efgh");
        msg.content.push(ContentBlock::Inline {
            media_type: "image/png".into(),
            data: String::new(),
        });
        let count = estimate_tokens(&[msg]);
        assert_eq!(count.total_tokens, MESSAGE_OVERHEAD_TOKENS + 3 + INLINE_BLOCK_TOKENS);
        assert_eq!(count.total_billable_characters, 8);
    }
}
