//! Concurrent fan-out of one generation request to every configured backend.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ConfigurationError, DispatchError};
use crate::llm::{GenerationRequest, Llm};

/// Decoded JSON returned by one backend.
pub type RawOutput = Value;

/// Exactly one outcome per backend id.
pub type DispatchResults = BTreeMap<String, Result<RawOutput, DispatchError>>;

#[derive(Clone)]
pub struct Dispatcher {
    backends: Vec<Arc<dyn Llm>>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(backends: Vec<Arc<dyn Llm>>) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        for b in &backends {
            if !seen.insert(b.id().to_string()) {
                return Err(ConfigurationError::DuplicateBackend(b.id().to_string()));
            }
        }
        Ok(Self { backends, timeout: None })
    }

    /// Bound every backend call. Without one, only the transport's own limits apply.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend_ids(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|b| b.id())
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Spawn one task per backend and wait for all of them to settle.
    ///
    /// Outcomes are funnelled through a single channel; the dispatcher is the
    /// only writer of the returned map. A task that dies before reporting
    /// (panic, runtime shutdown) yields [`DispatchError::Aborted`].
    pub async fn dispatch(&self, request: Arc<GenerationRequest>) -> DispatchResults {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for backend in &self.backends {
            let backend = Arc::clone(backend);
            let request = Arc::clone(&request);
            let tx = tx.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                let outcome = call_backend(backend.as_ref(), &request, timeout).await;
                let _ = tx.send((backend.id().to_string(), outcome));
            });
        }
        drop(tx);

        let mut results = DispatchResults::new();
        while let Some((id, outcome)) = rx.recv().await {
            results.insert(id, outcome);
        }
        for id in self.backend_ids() {
            results
                .entry(id.to_string())
                .or_insert_with(|| Err(DispatchError::Aborted { backend: id.to_string() }));
        }

        let failed = results.values().filter(|r| r.is_err()).count();
        for err in results.values().filter_map(|r| r.as_ref().err()) {
            warn!("{err}");
        }
        info!(backends = results.len(), failed, "fan-out settled");
        results
    }
}

async fn call_backend(
    backend: &dyn Llm,
    request: &GenerationRequest,
    timeout: Option<Duration>,
) -> Result<RawOutput, DispatchError> {
    let id = backend.id();
    let generated = match timeout {
        Some(after) => tokio::time::timeout(after, backend.generate(request))
            .await
            .map_err(|_| DispatchError::Timeout { backend: id.to_string(), after })?,
        None => backend.generate(request).await,
    };
    let text = generated.map_err(|source| DispatchError::Transport {
        backend: id.to_string(),
        source,
    })?;
    debug!(backend = id, "raw output: {text}");
    decode(id, &text)
}

/// JSON-decode a backend's raw text.
pub fn decode(backend: &str, text: &str) -> Result<RawOutput, DispatchError> {
    serde_json::from_str(text.trim()).map_err(|source| DispatchError::Decode {
        backend: backend.to_string(),
        raw: text.to_string(),
        source,
    })
}
