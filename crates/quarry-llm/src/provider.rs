use async_trait::async_trait;

use quarry_types::QuarryError;

use crate::{EmbeddingRequest, EmbeddingResponse, Request, Response};

/// One backend that can both complete chat requests and embed text.
///
/// Adapters resolve an empty `model` field to their own defaults and map
/// transport and HTTP failures onto [`QuarryError`] so callers can decide
/// what to retry.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, QuarryError>;

    /// Must return one vector per input, in input order.
    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, QuarryError>;

    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn embedding_model(&self) -> &str;
}
