//! # Config Loader
//!
//! Reads configuration documents and raw text files.
//!
//! A missing file is not an error: documents load as empty mappings and raw
//! text loads as `None`. A file that exists but cannot be parsed is.

use super::{ConfigDocument, ConfigError};
use std::path::Path;
use tracing::debug;

/// Source of configuration documents
pub trait ConfigLoader: Send + Sync {
    /// Load a YAML mapping; absent or empty files yield an empty document
    fn load(&self, path: &Path) -> Result<ConfigDocument, ConfigError>;

    /// Read a file verbatim; absent files yield `None`
    fn read_text(&self, path: &Path) -> Result<Option<String>, ConfigError>;
}

/// Loads documents from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl ConfigLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<ConfigDocument, ConfigError> {
        let Some(text) = self.read_text(path)? else {
            debug!("Config document {} not found, using empty mapping", path.display());
            return Ok(ConfigDocument::new());
        };
        parse_document(path, &text)
    }

    fn read_text(&self, path: &Path) -> Result<Option<String>, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Parse YAML text as a top-level mapping
///
/// Blank documents (including a bare `---` or `~`) are empty mappings.
pub fn parse_document(path: &Path, text: &str) -> Result<ConfigDocument, ConfigError> {
    if text.trim().is_empty() {
        return Ok(ConfigDocument::new());
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    match value {
        serde_yaml::Value::Null => Ok(ConfigDocument::new()),
        serde_yaml::Value::Mapping(_) => {
            serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => Err(ConfigError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_missing_document_is_empty() {
        let dir = TempDir::new().unwrap();
        let doc = FileLoader.load(&dir.path().join("absent.yml")).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_missing_text_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(FileLoader
            .read_text(&dir.path().join("params.yml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_loads_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("common.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "instance_type: t3.small\ncount: 2").unwrap();

        let doc = FileLoader.load(&path).unwrap();
        assert_eq!(doc["instance_type"], serde_yaml::Value::from("t3.small"));
        assert_eq!(doc["count"], serde_yaml::Value::from(2));
    }

    #[test]
    fn test_blank_document_is_empty() {
        let doc = parse_document(Path::new("production.yml"), "---\n").unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_malformed_document_errors() {
        let result = parse_document(Path::new("broken.yml"), "key: [unterminated");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_sequence_document_errors() {
        let result = parse_document(Path::new("list.yml"), "- a\n- b\n");
        assert!(matches!(result, Err(ConfigError::NotAMapping { .. })));
    }
}
