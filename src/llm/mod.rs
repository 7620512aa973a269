pub mod openai;
pub mod sglang;

use std::num::NonZeroU32;

use anyhow::Result;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde_json::Value;

/// One constrained generation call, shared read-only by every backend of a fan-out.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    /// JSON Schema the output must conform to.
    pub schema: Value,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// An inference service that can generate under a schema.
#[async_trait::async_trait]
pub trait Llm: Send + Sync {
    /// Opaque identifier reported as `model_version`.
    fn id(&self) -> &str;

    /// Raw text of the constrained completion.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

pub(crate) fn rate_limiter(requests_per_second: Option<u32>) -> Option<DefaultDirectRateLimiter> {
    requests_per_second.map(|rps| {
        let rps = NonZeroU32::new(rps).unwrap_or(nonzero!(1u32));
        RateLimiter::direct(Quota::per_second(rps))
    })
}
