use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quarry_types::QuarryError;

use crate::{EmbeddingRequest, EmbeddingResponse, ProviderAdapter, Request, Response};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Hooks run around every call. `before` may rewrite the request.
pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &Response) {}
    fn after_embed(&self, _request: &EmbeddingRequest, _response: &EmbeddingResponse) {}
}

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::debug!(
            model = %request.model,
            prompt_chars = request.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            temperature = ?request.temperature,
            "LLM request"
        );
    }

    fn after(&self, _request: &Request, response: &Response) {
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
    }

    fn after_embed(&self, request: &EmbeddingRequest, response: &EmbeddingResponse) {
        tracing::debug!(
            model = %response.model,
            inputs = request.input.len(),
            tokens = response.usage.total_tokens,
            "Embedding response"
        );
    }
}

/// Running token totals for a client. Clones share counters, so keep one
/// handle and pass a clone to [`LlmClient::with_middleware`].
#[derive(Clone, Default)]
pub struct UsageTrackingMiddleware {
    total_input: Arc<AtomicU64>,
    total_output: Arc<AtomicU64>,
    embedding_tokens: Arc<AtomicU64>,
    calls: Arc<AtomicU64>,
}

impl UsageTrackingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }

    pub fn embedding_tokens(&self) -> u64 {
        self.embedding_tokens.load(Ordering::Relaxed)
    }

    /// Completion and embedding calls combined.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Middleware for UsageTrackingMiddleware {
    fn after(&self, _request: &Request, response: &Response) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.total_output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }

    fn after_embed(&self, _request: &EmbeddingRequest, response: &EmbeddingResponse) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.embedding_tokens
            .fetch_add(response.usage.total_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// A provider plus its middleware chain. Cheap to share behind an `Arc`.
pub struct LlmClient {
    provider: Arc<dyn ProviderAdapter>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
            middleware: Vec::new(),
        }
    }

    /// OpenAI-compatible provider configured from `OPENAI_*` variables.
    pub fn from_env() -> Result<Self, QuarryError> {
        Ok(Self::new(crate::OpenAiAdapter::from_env()?))
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, QuarryError> {
        let mut req = request.clone();
        if req.model.is_empty() {
            req.model = self.provider.default_model().to_string();
        }
        for m in &self.middleware {
            m.before(&mut req);
        }

        let resp = self.provider.complete(&req).await?;

        for m in &self.middleware {
            m.after(&req, &resp);
        }
        Ok(resp)
    }

    pub async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, QuarryError> {
        let mut req = request.clone();
        if req.model.is_empty() {
            req.model = self.provider.embedding_model().to_string();
        }
        tracing::debug!(
            provider = self.provider.name(),
            model = %req.model,
            inputs = req.input.len(),
            "Embedding request"
        );

        let resp = self.provider.embed(&req).await?;

        for m in &self.middleware {
            m.after_embed(&req, &resp);
        }
        Ok(resp)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Echoes the resolved model back and records what it was asked.
    #[derive(Default)]
    struct EchoProvider {
        seen_models: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProviderAdapter for EchoProvider {
        async fn complete(&self, request: &Request) -> Result<Response, QuarryError> {
            self.seen_models.lock().unwrap().push(request.model.clone());
            Ok(Response {
                id: "resp-1".into(),
                text: "SELECT 1".into(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 20,
                    total_tokens: 30,
                },
                model: request.model.clone(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        async fn embed(
            &self,
            request: &EmbeddingRequest,
        ) -> Result<EmbeddingResponse, QuarryError> {
            Ok(EmbeddingResponse {
                vectors: request.input.iter().map(|s| vec![s.len() as f32]).collect(),
                model: request.model.clone(),
                usage: Usage {
                    input_tokens: 4,
                    output_tokens: 0,
                    total_tokens: 4,
                },
            })
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn default_model(&self) -> &str {
            "echo-chat"
        }

        fn embedding_model(&self) -> &str {
            "echo-embed"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ProviderAdapter for FailingProvider {
        async fn complete(&self, _request: &Request) -> Result<Response, QuarryError> {
            Err(QuarryError::RateLimited {
                provider: "failing".into(),
                retry_after_ms: 10,
            })
        }

        async fn embed(
            &self,
            _request: &EmbeddingRequest,
        ) -> Result<EmbeddingResponse, QuarryError> {
            Err(QuarryError::EmbeddingFailed("down".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }

        fn default_model(&self) -> &str {
            "none"
        }

        fn embedding_model(&self) -> &str {
            "none"
        }
    }

    #[tokio::test]
    async fn empty_model_resolves_to_provider_default() {
        let client = LlmClient::new(EchoProvider::default());
        let resp = client.complete(&Request::chat("s", "u")).await.unwrap();
        assert_eq!(resp.model, "echo-chat");
        assert_eq!(client.provider_name(), "echo");
    }

    #[tokio::test]
    async fn explicit_model_is_kept() {
        let client = LlmClient::new(EchoProvider::default());
        let resp = client
            .complete(&Request::chat("s", "u").with_model("validator-model"))
            .await
            .unwrap();
        assert_eq!(resp.model, "validator-model");
    }

    #[tokio::test]
    async fn embed_resolves_model_and_keeps_order() {
        let client = LlmClient::new(EchoProvider::default());
        let resp = client
            .embed(&EmbeddingRequest::new(vec!["a".into(), "abc".into()]))
            .await
            .unwrap();
        assert_eq!(resp.model, "echo-embed");
        assert_eq!(resp.vectors, vec![vec![1.0], vec![3.0]]);
    }

    #[tokio::test]
    async fn usage_middleware_counts_completions_and_embeddings() {
        let usage = UsageTrackingMiddleware::new();
        let client = LlmClient::new(EchoProvider::default())
            .with_middleware(LoggingMiddleware)
            .with_middleware(usage.clone());

        client.complete(&Request::chat("s", "u")).await.unwrap();
        client.complete(&Request::chat("s", "u")).await.unwrap();
        client
            .embed(&EmbeddingRequest::new(vec!["orders".into()]))
            .await
            .unwrap();

        assert_eq!(usage.calls(), 3);
        assert_eq!(usage.total_input_tokens(), 20);
        assert_eq!(usage.total_output_tokens(), 40);
        assert_eq!(usage.embedding_tokens(), 4);
    }

    #[tokio::test]
    async fn provider_errors_pass_through_untouched() {
        let usage = UsageTrackingMiddleware::new();
        let client = LlmClient::new(FailingProvider).with_middleware(usage.clone());

        let err = client.complete(&Request::chat("s", "u")).await.unwrap_err();
        assert!(err.is_retryable());
        let err = client
            .embed(&EmbeddingRequest::new(vec!["x".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::EmbeddingFailed(_)));
        assert_eq!(usage.calls(), 0);
    }
}
