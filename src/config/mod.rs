//! # Configuration
//!
//! Configuration documents, environment-aware merging and reconciler settings.
//!
//! - `loader`: reads YAML documents and raw text from disk
//! - `template`: `{{ path }}` substitution for parameter templates
//! - `environment`: common/environment/override merging and secret resolution
//! - `settings`: process settings loaded from environment variables

pub mod environment;
pub mod loader;
pub mod settings;
pub mod template;

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub use environment::EnvironmentConfig;
pub use loader::{ConfigLoader, FileLoader};
pub use settings::ReconcilerSettings;

/// A parsed configuration document
///
/// Merges between documents are shallow: top-level keys on the right win.
pub type ConfigDocument = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse parameter file {path}: {source}")]
    ParameterFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} must contain a mapping at the top level")]
    NotAMapping { path: PathBuf },

    #[error("Unknown template variable '{0}'")]
    UnknownVariable(String),

    #[error("Template variable '{0}' does not resolve to a scalar value")]
    NonScalar(String),

    #[error("Rendered parameter template is not valid: {0}")]
    RenderedParameters(String),
}

/// Merge `overrides` into `base`, replacing top-level keys
pub fn merge_documents(mut base: ConfigDocument, overrides: ConfigDocument) -> ConfigDocument {
    base.extend(overrides);
    base
}

/// Render a scalar YAML value as a plain string
///
/// Returns `None` for mappings, sequences and tagged values.
pub fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_)
        | serde_yaml::Value::Tagged(_) => None,
    }
}
