//! # Parameter Resolution
//!
//! Builds the ordered parameter list handed to the control plane.
//!
//! Sources, lowest to highest precedence:
//! 1. Legacy CloudFormation parameter file (`[{"ParameterKey": .., "ParameterValue": ..}]`)
//! 2. Rendered parameter template (a YAML mapping)
//! 3. Dynamic parameters supplied by the caller
//!
//! Each key appears once. A key keeps the position where it was first seen;
//! later sources only replace its value.

use crate::config::{scalar_to_string, ConfigError};
use serde::Deserialize;
use std::path::Path;

pub use crate::provider::Parameter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyParameter {
    parameter_key: String,
    #[serde(default)]
    parameter_value: serde_json::Value,
}

/// Ordered, key-unique parameter set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterResolver {
    parameters: Vec<Parameter>,
}

impl ParameterResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer `source` over what has been merged so far
    pub fn merge<I>(&mut self, source: I) -> &mut Self
    where
        I: IntoIterator<Item = Parameter>,
    {
        for parameter in source {
            match self.parameters.iter_mut().find(|p| p.key == parameter.key) {
                Some(existing) => existing.value = parameter.value,
                None => self.parameters.push(parameter),
            }
        }
        self
    }

    #[must_use]
    pub fn into_parameters(self) -> Vec<Parameter> {
        self.parameters
    }
}

/// Resolve file, template and dynamic parameters into one list
#[must_use]
pub fn resolve(
    file: Vec<Parameter>,
    template: Vec<Parameter>,
    dynamic: Vec<Parameter>,
) -> Vec<Parameter> {
    let mut resolver = ParameterResolver::new();
    resolver.merge(file).merge(template).merge(dynamic);
    resolver.into_parameters()
}

/// Parse a legacy CloudFormation JSON parameter file
pub fn parse_parameter_file(path: &Path, text: &str) -> Result<Vec<Parameter>, ConfigError> {
    let entries: Vec<LegacyParameter> =
        serde_json::from_str(text).map_err(|source| ConfigError::ParameterFile {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let value = match entry.parameter_value {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            Parameter::new(entry.parameter_key, value)
        })
        .collect())
}

/// Convert a rendered parameter template into parameters
///
/// Scalars are stringified, sequences of scalars are joined with `,` and
/// `null` becomes the empty string. Document order is preserved.
pub fn parameters_from_document(
    document: &serde_yaml::Value,
) -> Result<Vec<Parameter>, ConfigError> {
    let mapping = match document {
        serde_yaml::Value::Null => return Ok(Vec::new()),
        serde_yaml::Value::Mapping(mapping) => mapping,
        _ => {
            return Err(ConfigError::RenderedParameters(
                "expected a mapping of parameter names to values".to_string(),
            ))
        }
    };

    mapping
        .iter()
        .map(|(key, value)| {
            let key = scalar_to_string(key).ok_or_else(|| {
                ConfigError::RenderedParameters("parameter names must be scalars".to_string())
            })?;
            let value = parameter_value(value).ok_or_else(|| {
                ConfigError::RenderedParameters(format!("parameter '{key}' is not a scalar or list"))
            })?;
            Ok(Parameter::new(key, value))
        })
        .collect()
}

fn parameter_value(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Option<Vec<_>>>()
            .map(|items| items.join(",")),
        other => scalar_to_string(other),
    }
}
