use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use governor::DefaultDirectRateLimiter;
use tracing::debug;

use super::{GenerationRequest, Llm};

/// OpenAI-compatible chat backend using the `json_schema` response format.
pub struct OpenAiBackend {
    id: String,
    client: Client<OpenAIConfig>,
    model: String,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl OpenAiBackend {
    pub fn new(
        id: String,
        model: String,
        base_url: Option<String>,
        api_key: Option<String>,
        requests_per_second: Option<u32>,
    ) -> Self {
        let mut cfg = OpenAIConfig::default();
        if let Some(url) = base_url {
            cfg = cfg.with_api_base(url);
        }
        if let Some(key) = api_key {
            cfg = cfg.with_api_key(key);
        }
        Self {
            id,
            client: Client::with_config(cfg),
            model,
            limiter: super::rate_limiter(requests_per_second),
        }
    }

    fn messages(request: &GenerationRequest) -> Result<Vec<ChatCompletionRequestMessage>> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system.clone())
            .build()?
            .into();
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.clone())
            .build()?
            .into();
        Ok(vec![system, user])
    }
}

#[async_trait::async_trait]
impl Llm for OpenAiBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let req = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(Self::messages(request)?)
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: "LabelingModel".to_string(),
                    schema: Some(request.schema.clone()),
                    strict: None,
                },
            })
            .build()?;

        let resp = self
            .client
            .chat()
            .create(req)
            .await
            .with_context(|| format!("chat completion for `{}`", self.id))?;
        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(backend = %self.id, "completion: {text}");
        Ok(text)
    }
}
