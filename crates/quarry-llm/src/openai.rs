use async_trait::async_trait;
use serde_json::json;

use crate::{
    EmbeddingRequest, EmbeddingResponse, FinishReason, ProviderAdapter, Request, Response, Usage,
};
use quarry_types::QuarryError;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "openai/text-embedding-3-small";

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

/// Adapter for any endpoint speaking the OpenAI chat-completions and
/// embeddings protocol (OpenAI, OpenRouter, local gateways).
#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    embedding_model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Build from `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL` and
    /// `OPENAI_EMBEDDING_MODEL`.
    pub fn from_env() -> Result<Self, QuarryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, QuarryError> {
        let key = get("OPENAI_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| QuarryError::AuthError {
                provider: "openai".into(),
            })?;
        let mut adapter = Self::new(key);
        if let Some(url) = get("OPENAI_BASE_URL").filter(|v| !v.is_empty()) {
            adapter = adapter.with_base_url(url);
        }
        if let Some(model) = get("OPENAI_MODEL").filter(|v| !v.is_empty()) {
            adapter = adapter.with_model(model);
        }
        if let Some(model) = get("OPENAI_EMBEDDING_MODEL").filter(|v| !v.is_empty()) {
            adapter = adapter.with_embedding_model(model);
        }
        Ok(adapter)
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.default_model = model;
        self
    }

    pub fn with_embedding_model(mut self, model: String) -> Self {
        self.embedding_model = model;
        self
    }

    fn build_request_body(&self, request: &Request) -> serde_json::Value {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    fn parse_response(&self, body: serde_json::Value) -> Result<Response, QuarryError> {
        let choice = &body["choices"][0];
        let text = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| QuarryError::ProviderError {
                provider: "openai".into(),
                status: 200,
                message: "response has no message content".into(),
                retryable: false,
            })?
            .to_string();

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("stop") | None => FinishReason::EndTurn,
            Some("length") => FinishReason::MaxTokens,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(_) => FinishReason::Other,
        };

        Ok(Response {
            id: body["id"].as_str().unwrap_or("").to_string(),
            text,
            usage: parse_usage(&body["usage"]),
            model: body["model"].as_str().unwrap_or("").to_string(),
            finish_reason,
        })
    }

    fn parse_embeddings(
        &self,
        body: serde_json::Value,
        expected: usize,
    ) -> Result<EmbeddingResponse, QuarryError> {
        let data = body["data"].as_array().ok_or_else(|| {
            QuarryError::EmbeddingFailed("response has no data array".into())
        })?;

        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (position, item) in data.iter().enumerate() {
            let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(position);
            let vector = item["embedding"]
                .as_array()
                .ok_or_else(|| {
                    QuarryError::EmbeddingFailed(format!("item {index} has no embedding"))
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            indexed.push((index, vector));
        }
        // Providers may return items out of order; `index` is authoritative.
        indexed.sort_by_key(|(i, _)| *i);

        if indexed.len() != expected {
            return Err(QuarryError::EmbeddingFailed(format!(
                "expected {expected} embeddings, got {}",
                indexed.len()
            )));
        }
        if indexed.iter().enumerate().any(|(position, (i, _))| *i != position) {
            let seen: Vec<usize> = indexed.iter().map(|(i, _)| *i).collect();
            return Err(QuarryError::EmbeddingFailed(format!(
                "embedding indices {seen:?} are not 0..{expected}"
            )));
        }

        Ok(EmbeddingResponse {
            vectors: indexed.into_iter().map(|(_, v)| v).collect(),
            model: body["model"].as_str().unwrap_or("").to_string(),
            usage: parse_usage(&body["usage"]),
        })
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, QuarryError> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuarryError::RequestTimeout {
                        provider: "openai".into(),
                        timeout_ms: 0,
                    }
                } else {
                    QuarryError::ProviderError {
                        provider: "openai".into(),
                        status: 0,
                        message: e.to_string(),
                        retryable: true,
                    }
                }
            })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| QuarryError::ProviderError {
            provider: "openai".into(),
            status: 0,
            message: e.to_string(),
            retryable: true,
        })?;

        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        serde_json::from_str(&response_body).map_err(|e| QuarryError::ProviderError {
            provider: "openai".into(),
            status: status.as_u16(),
            message: format!("Failed to parse response JSON: {e}"),
            retryable: false,
        })
    }
}

fn parse_usage(usage: &serde_json::Value) -> Usage {
    let input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0);
    let output_tokens = usage["completion_tokens"].as_u64().unwrap_or(0);
    Usage {
        input_tokens,
        output_tokens,
        total_tokens: usage["total_tokens"]
            .as_u64()
            .unwrap_or(input_tokens + output_tokens),
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> QuarryError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            QuarryError::RateLimited {
                provider: "openai".into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => QuarryError::AuthError {
            provider: "openai".into(),
        },
        408 | 504 => QuarryError::RequestTimeout {
            provider: "openai".into(),
            timeout_ms: 0,
        },
        500 | 502 | 503 => QuarryError::ProviderError {
            provider: "openai".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => QuarryError::ProviderError {
            provider: "openai".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, QuarryError> {
        let body = self.build_request_body(request);
        let json = self.post("chat/completions", &body).await?;
        self.parse_response(json)
    }

    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, QuarryError> {
        if request.input.is_empty() {
            return Ok(EmbeddingResponse {
                vectors: Vec::new(),
                model: self.embedding_model.clone(),
                usage: Usage::default(),
            });
        }
        let model = if request.model.is_empty() {
            &self.embedding_model
        } else {
            &request.model
        };
        let body = json!({ "model": model, "input": request.input });
        let json = self.post("embeddings", &body).await?;
        self.parse_embeddings(json, request.input.len())
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn from_lookup_requires_api_key() {
        let err = OpenAiAdapter::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, QuarryError::AuthError { provider } if provider == "openai"));

        let err = OpenAiAdapter::from_lookup(lookup(&[("OPENAI_API_KEY", "")])).unwrap_err();
        assert!(matches!(err, QuarryError::AuthError { .. }));
    }

    #[test]
    fn from_lookup_applies_overrides() {
        let adapter = OpenAiAdapter::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "k"),
            ("OPENAI_BASE_URL", "https://api.openai.com/v1/"),
            ("OPENAI_MODEL", "gpt-4o"),
        ]))
        .unwrap();
        assert_eq!(adapter.base_url, "https://api.openai.com/v1");
        assert_eq!(adapter.default_model(), "gpt-4o");
        assert_eq!(adapter.embedding_model(), DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn build_request_body_uses_default_model_when_unset() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let req = Request::new(vec![Message::system("You are helpful."), Message::user("Hello")])
            .with_temperature(0.7)
            .with_max_tokens(150);

        let body = adapter.build_request_body(&req);

        assert_eq!(body["model"], DEFAULT_MODEL);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "Hello");
        assert_eq!(body["max_tokens"], 150);
        let temp = body["temperature"].as_f64().unwrap();
        assert!((temp - 0.7).abs() < 0.01);
    }

    #[test]
    fn build_request_body_without_optional_fields() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let mut req = Request::new(vec![Message::user("Hi")]);
        req.model = "gpt-4o".into();

        let body = adapter.build_request_body(&req);
        assert_eq!(body["model"], "gpt-4o");
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parse_response_handles_complete_response() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let resp = adapter
            .parse_response(json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o-mini",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "SELECT 1" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 100, "completion_tokens": 5, "total_tokens": 105 }
            }))
            .unwrap();
        assert_eq!(resp.id, "chatcmpl-1");
        assert_eq!(resp.text, "SELECT 1");
        assert_eq!(resp.finish_reason, FinishReason::EndTurn);
        assert_eq!(resp.usage.input_tokens, 100);
        assert_eq!(resp.usage.total_tokens, 105);
    }

    #[test]
    fn parse_response_maps_length_to_max_tokens() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let resp = adapter
            .parse_response(json!({
                "choices": [{ "message": { "content": "SELECT" }, "finish_reason": "length" }]
            }))
            .unwrap();
        assert_eq!(resp.finish_reason, FinishReason::MaxTokens);
        assert_eq!(resp.usage, Usage::default());
    }

    #[test]
    fn parse_response_without_content_is_error() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let err = adapter.parse_response(json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, QuarryError::ProviderError { retryable: false, .. }));
    }

    #[test]
    fn parse_embeddings_orders_by_index() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let resp = adapter
            .parse_embeddings(
                json!({
                    "model": "text-embedding-3-small",
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }),
                2,
            )
            .unwrap();
        assert_eq!(resp.vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn parse_embeddings_rejects_count_mismatch() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let err = adapter
            .parse_embeddings(json!({ "data": [{ "index": 0, "embedding": [1.0] }] }), 3)
            .unwrap_err();
        assert!(matches!(err, QuarryError::EmbeddingFailed(_)));
    }

    #[test]
    fn parse_embeddings_rejects_duplicate_index() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let err = adapter
            .parse_embeddings(
                json!({ "data": [
                    { "index": 0, "embedding": [1.0] },
                    { "index": 0, "embedding": [2.0] }
                ] }),
                2,
            )
            .unwrap_err();
        assert!(matches!(err, QuarryError::EmbeddingFailed(ref m) if m.contains("[0, 0]")));
    }

    #[test]
    fn parse_embeddings_rejects_gap_in_indices() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let err = adapter
            .parse_embeddings(
                json!({ "data": [
                    { "index": 2, "embedding": [3.0] },
                    { "index": 0, "embedding": [1.0] }
                ] }),
                2,
            )
            .unwrap_err();
        assert!(matches!(err, QuarryError::EmbeddingFailed(ref m) if m.contains("not 0..2")));
    }

    #[test]
    fn error_mapping_429_rate_limited() {
        let err = map_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "rate limited", "retry_after": 3.0}}"#,
        );
        assert!(matches!(err, QuarryError::RateLimited { retry_after_ms: 3000, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn error_mapping_401_auth() {
        let err = map_error(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"error": {"message": "invalid api key"}}"#,
        );
        assert!(matches!(err, QuarryError::AuthError { .. }));
    }

    #[test]
    fn error_mapping_500_retryable_400_not() {
        let err = map_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error": {"message": "server error"}}"#,
        );
        assert!(err.is_retryable());

        let err = map_error(reqwest::StatusCode::BAD_REQUEST, "plain text body");
        match err {
            QuarryError::ProviderError {
                retryable, message, ..
            } => {
                assert!(!retryable);
                assert_eq!(message, "plain text body");
            }
            other => panic!("expected ProviderError, got {other:?}"),
        }
    }
}
