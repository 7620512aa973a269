use std::time::Duration;

use thiserror::Error;

use crate::types::ControlKind;

/// Malformed or incomplete labeling configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to parse labeling config: {0}")]
    Xml(String),
    #[error("control `{name}` uses unsupported tag `{tag}`")]
    UnsupportedKind { name: String, tag: String },
    #[error("control `{name}` ({kind:?}) has no allowed values")]
    EmptyValues { name: String, kind: ControlKind },
    #[error("control name `{0}` is declared more than once")]
    DuplicateControl(String),
    #[error("labeling config declares no controls")]
    NoControls,
    #[error("backend id `{0}` is configured more than once")]
    DuplicateBackend(String),
    #[error("invalid settings: {0}")]
    Settings(String),
}

/// Failure of a single backend during fan-out. Never aborts siblings.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("backend `{backend}` request failed: {source:#}")]
    Transport {
        backend: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("backend `{backend}` returned invalid JSON ({source}): {raw}")]
    Decode {
        backend: String,
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("backend `{backend}` timed out after {after:?}")]
    Timeout { backend: String, after: Duration },
    #[error("backend `{backend}` task ended without reporting a result")]
    Aborted { backend: String },
}

impl DispatchError {
    pub fn backend(&self) -> &str {
        match self {
            Self::Transport { backend, .. }
            | Self::Decode { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::Aborted { backend } => backend,
        }
    }
}

/// A field that could not be turned into an annotation region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("raw output is not a JSON object")]
    NotAnObject,
    #[error("field `{0}` is missing from raw output")]
    MissingField(String),
    #[error("field `{field}` is malformed: {reason}")]
    Malformed { field: String, reason: String },
}

/// No matching rule is defined for this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no matching rule for {0:?} regions")]
pub struct UnsupportedKindError(pub ControlKind);
