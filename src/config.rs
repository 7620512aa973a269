//! Settings: TOML file, legacy `llms.json` backend list, environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::llm::{openai::OpenAiBackend, sglang::SglangBackend, Llm};
use crate::scoring::MatchRules;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generation: GenerationSettings,
    pub matching: MatchRules,
    pub labelstudio: LabelStudioSettings,
    pub server: ServerSettings,
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-backend call timeout; unset leaves it to the transport.
    pub timeout_secs: Option<u64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self { max_tokens: 128, temperature: 0.0, timeout_secs: None }
    }
}

impl GenerationSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LabelStudioSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub stats_path: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: "0.0.0.0:4321".to_string(), stats_path: PathBuf::from("stats.json") }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Sglang,
    Openai,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    #[serde(default)]
    pub provider: Provider,
    /// SGLang runtime URL, or API base for OpenAI-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Model name for OpenAI-compatible services; defaults to `id`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

impl BackendConfig {
    pub fn sglang(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: Provider::Sglang,
            endpoint: Some(endpoint.into()),
            model: None,
            api_key: None,
            api_key_env: None,
            requests_per_second: None,
        }
    }

    fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| self.api_key_env.as_ref().and_then(|var| std::env::var(var).ok()))
    }

    pub fn build(&self, generation: &GenerationSettings) -> Result<Arc<dyn Llm>> {
        let backend: Arc<dyn Llm> = match self.provider {
            Provider::Sglang => {
                let endpoint = self.endpoint.clone().ok_or_else(|| {
                    ConfigurationError::Settings(format!("sglang backend `{}` needs an endpoint", self.id))
                })?;
                Arc::new(SglangBackend::new(
                    self.id.clone(),
                    endpoint,
                    generation.timeout(),
                    self.requests_per_second,
                )?)
            }
            Provider::Openai => Arc::new(OpenAiBackend::new(
                self.id.clone(),
                self.model.clone().unwrap_or_else(|| self.id.clone()),
                self.endpoint.clone(),
                self.api_key(),
                self.requests_per_second,
            )),
        };
        Ok(backend)
    }
}

impl Settings {
    /// Read `path` when given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("reading settings {}", p.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing settings {}", p.display()))?
            }
            None => Self::default(),
        };
        Ok(settings.with_env_overrides())
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Supported env vars:
    /// - `LABEL_STUDIO_BASE_URL`, `LABEL_STUDIO_API_KEY`
    /// - `LABELSCORE_MAX_TOKENS`, `LABELSCORE_TEMPERATURE`
    /// - `LABELSCORE_BIND`, `LABELSCORE_STATS_PATH`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("LABEL_STUDIO_BASE_URL") {
            self.labelstudio.base_url = Some(val);
        }
        if let Ok(val) = std::env::var("LABEL_STUDIO_API_KEY") {
            self.labelstudio.api_key = Some(val);
        }
        if let Some(n) = std::env::var("LABELSCORE_MAX_TOKENS").ok().and_then(|v| v.parse().ok()) {
            self.generation.max_tokens = n;
        }
        if let Some(t) = std::env::var("LABELSCORE_TEMPERATURE").ok().and_then(|v| v.parse().ok()) {
            self.generation.temperature = t;
        }
        if let Ok(val) = std::env::var("LABELSCORE_BIND") {
            self.server.bind = val;
        }
        if let Ok(val) = std::env::var("LABELSCORE_STATS_PATH") {
            self.server.stats_path = PathBuf::from(val);
        }
        self
    }

    /// Append backends from an `llms.json` object of `name -> sglang url`.
    pub fn add_llms_json(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        self.backends.extend(parse_llms_json(&text)?);
        Ok(())
    }

    pub fn build_backends(&self) -> Result<Vec<Arc<dyn Llm>>> {
        if self.backends.is_empty() {
            return Err(ConfigurationError::Settings("no backends configured".into()).into());
        }
        self.backends.iter().map(|b| b.build(&self.generation)).collect()
    }
}

pub fn parse_llms_json(text: &str) -> Result<Vec<BackendConfig>> {
    let map: BTreeMap<String, String> = serde_json::from_str(text).context("llms.json must map names to URLs")?;
    Ok(map.into_iter().map(|(id, url)| BackendConfig::sglang(id, url)).collect())
}
