//! SGLang runtime endpoint: POST {endpoint}/generate with a json_schema constraint.

use std::time::Duration;

use anyhow::{Context, Result};
use governor::DefaultDirectRateLimiter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationRequest, Llm};

#[derive(Debug, Serialize)]
struct GenerateReq<'a> {
    text: String,
    sampling_params: SamplingParams<'a>,
}

#[derive(Debug, Serialize)]
struct SamplingParams<'a> {
    max_new_tokens: u32,
    temperature: f32,
    json_schema: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResp {
    text: String,
}

pub struct SglangBackend {
    id: String,
    http: Client,
    endpoint: String,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl SglangBackend {
    pub fn new(
        id: String,
        endpoint: String,
        timeout: Option<Duration>,
        requests_per_second: Option<u32>,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            id,
            http: builder.build().context("building HTTP client")?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            limiter: super::rate_limiter(requests_per_second),
        })
    }
}

#[async_trait::async_trait]
impl Llm for SglangBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let schema = serde_json::to_string(&request.schema)?;
        let body = GenerateReq {
            text: format!("{}\n\n{}", request.system, request.prompt),
            sampling_params: SamplingParams {
                max_new_tokens: request.max_tokens,
                temperature: request.temperature,
                json_schema: &schema,
            },
        };
        let resp = self
            .http
            .post(format!("{}/generate", self.endpoint))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<GenerateResp>()
            .await
            .with_context(|| format!("decoding /generate response from `{}`", self.id))?;
        debug!(backend = %self.id, "completion: {}", resp.text);
        Ok(resp.text)
    }
}
