pub mod config;
pub mod dispatch;
pub mod error;
pub mod label_config;
pub mod labelstudio;
pub mod llm;
pub mod normalize;
pub mod prompt;
pub mod schema;
pub mod scoring;
pub mod server;
pub mod session;
pub mod similarity;
pub mod stats;
pub mod types;

pub use error::{ConfigurationError, DispatchError, NormalizationError, UnsupportedKindError};
pub use label_config::LabelingSpec;
pub use schema::{compile, FieldType, OutputSchema};
pub use scoring::{AccuracyTable, MatchRules, SharedAccuracy};
pub use session::Session;
