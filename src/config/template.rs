//! # Parameter Templates
//!
//! `{{ path }}` substitution over a fixed namespace. No expressions, filters
//! or code are evaluated; a placeholder is a dotted path and nothing else.
//!
//! ## Namespace
//!
//! - `config.<key>[.<key>...]` - merged environment configuration
//! - `secrets.<key>` - decrypted secrets
//! - `app_name`, `env_name`, `deploy_tag`

use super::{scalar_to_string, ConfigDocument, ConfigError};
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
        .expect("Failed to compile placeholder regex - this should never happen")
});

/// Plain YAML scalar standing in for the n-th placeholder while the document is parsed
static SLOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"__stack_reconciler_slot_([0-9]+)__")
        .expect("Failed to compile slot regex - this should never happen")
});

/// Values a template may reference
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub config: &'a ConfigDocument,
    /// `None` when the template does not reference secrets and they were never decrypted
    pub secrets: Option<&'a BTreeMap<String, String>>,
    pub app_name: &'a str,
    pub env_name: &'a str,
    pub deploy_tag: &'a str,
}

impl TemplateContext<'_> {
    fn lookup(&self, path: &str) -> Result<String, ConfigError> {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or_default();
        let rest: Vec<&str> = segments.collect();

        match (root, rest.as_slice()) {
            ("app_name", []) => Ok(self.app_name.to_string()),
            ("env_name", []) => Ok(self.env_name.to_string()),
            ("deploy_tag", []) => Ok(self.deploy_tag.to_string()),
            ("secrets", [key]) => self
                .secrets
                .and_then(|secrets| secrets.get(*key))
                .cloned()
                .ok_or_else(|| ConfigError::UnknownVariable(path.to_string())),
            ("config", [first, tail @ ..]) => {
                let mut value = self
                    .config
                    .get(*first)
                    .ok_or_else(|| ConfigError::UnknownVariable(path.to_string()))?;
                for key in tail {
                    value = value
                        .get(*key)
                        .ok_or_else(|| ConfigError::UnknownVariable(path.to_string()))?;
                }
                scalar_to_string(value).ok_or_else(|| ConfigError::NonScalar(path.to_string()))
            }
            _ => Err(ConfigError::UnknownVariable(path.to_string())),
        }
    }
}

/// Whether a template reads from the `secrets` namespace
#[must_use]
pub fn references_secrets(template: &str) -> bool {
    PLACEHOLDER
        .captures_iter(template)
        .any(|caps| caps[1].starts_with("secrets."))
}

/// Render a YAML parameter template
///
/// The template is parsed before anything is substituted, and values only
/// ever land inside string scalars. A value containing `#`, `: ` or a leading
/// `[` stays one verbatim string; `"1.10"` stays `1.10`.
pub fn render(template: &str, context: &TemplateContext<'_>) -> Result<Value, ConfigError> {
    let mut paths = Vec::new();
    let slotted = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        paths.push(caps[1].to_string());
        format!("__stack_reconciler_slot_{}__", paths.len() - 1)
    });

    let values = paths
        .iter()
        .map(|path| context.lookup(path))
        .collect::<Result<Vec<_>, _>>()?;

    let document: Value = serde_yaml::from_str(&slotted)
        .map_err(|e| ConfigError::RenderedParameters(e.to_string()))?;

    Ok(fill_slots(document, &values))
}

fn fill_slots(value: Value, values: &[String]) -> Value {
    match value {
        Value::String(text) => Value::String(
            SLOT.replace_all(&text, |caps: &Captures<'_>| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| values.get(index))
                    .map_or_else(|| caps[0].to_string(), Clone::clone)
            })
            .into_owned(),
        ),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| fill_slots(item, values))
                .collect(),
        ),
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(key, item)| (fill_slots(key, values), fill_slots(item, values)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConfigDocument {
        serde_yaml::from_str(
            "image: registry/app:42\nreplicas: 3\ndb:\n  host: db.internal\nzones:\n  - a\n  - b\n",
        )
        .unwrap()
    }

    fn context<'a>(
        config: &'a ConfigDocument,
        secrets: Option<&'a BTreeMap<String, String>>,
    ) -> TemplateContext<'a> {
        TemplateContext {
            config,
            secrets,
            app_name: "billing",
            env_name: "staging",
            deploy_tag: "non-production",
        }
    }

    fn rendered(template: &str, context: &TemplateContext<'_>) -> Vec<(String, String)> {
        let document = render(template, context).unwrap();
        document
            .as_mapping()
            .unwrap()
            .iter()
            .map(|(key, value)| {
                (
                    scalar_to_string(key).unwrap(),
                    scalar_to_string(value).unwrap(),
                )
            })
            .collect()
    }

    fn pair(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn test_renders_config_and_scalars() {
        let config = config();
        let rendered = rendered(
            "Image: {{ config.image }}\nReplicas: {{config.replicas}}\nDbHost: {{ config.db.host }}\nEnv: {{ env_name }}\nTag: {{ deploy_tag }}\n",
            &context(&config, None),
        );

        assert_eq!(
            rendered,
            vec![
                pair("Image", "registry/app:42"),
                pair("Replicas", "3"),
                pair("DbHost", "db.internal"),
                pair("Env", "staging"),
                pair("Tag", "non-production"),
            ]
        );
    }

    #[test]
    fn test_renders_secrets() {
        let config = config();
        let secrets = BTreeMap::from([("db_password".to_string(), "hunter2".to_string())]);
        let rendered = rendered(
            "DbPassword: {{ secrets.db_password }}",
            &context(&config, Some(&secrets)),
        );
        assert_eq!(rendered, vec![pair("DbPassword", "hunter2")]);
    }

    #[test]
    fn test_values_with_yaml_syntax_are_kept_verbatim() {
        let config: ConfigDocument = serde_yaml::from_str(
            "version: \"1.10\"\nlabel: \"team: billing\"\nzones: \"[a, b]\"\nanchor: \"*ref\"\n",
        )
        .unwrap();
        let secrets = BTreeMap::from([("db".to_string(), "s3cr3t #42".to_string())]);

        let rendered = rendered(
            "Version: {{ config.version }}\nDbPassword: {{ secrets.db }}\nLabel: {{ config.label }}\nZones: {{ config.zones }}\nAnchor: {{ config.anchor }}\nQuoted: '{{ config.version }}'\n",
            &context(&config, Some(&secrets)),
        );

        assert_eq!(
            rendered,
            vec![
                pair("Version", "1.10"),
                pair("DbPassword", "s3cr3t #42"),
                pair("Label", "team: billing"),
                pair("Zones", "[a, b]"),
                pair("Anchor", "*ref"),
                pair("Quoted", "1.10"),
            ]
        );
    }

    #[test]
    fn test_placeholder_inside_longer_value() {
        let config = config();
        let rendered = rendered(
            "Url: https://{{ config.db.host }}/{{ app_name }} # trailing comment\n",
            &context(&config, None),
        );
        assert_eq!(rendered, vec![pair("Url", "https://db.internal/billing")]);
    }

    #[test]
    fn test_placeholders_in_sequences() {
        let config = config();
        let document = render(
            "Hosts:\n  - {{ config.db.host }}\n  - backup.internal\n",
            &context(&config, None),
        )
        .unwrap();
        assert_eq!(
            document["Hosts"],
            serde_yaml::from_str::<Value>("[db.internal, backup.internal]").unwrap()
        );
    }

    #[test]
    fn test_unknown_variable_errors() {
        let config = config();
        let result = render("X: {{ config.missing }}", &context(&config, None));
        assert!(matches!(result, Err(ConfigError::UnknownVariable(v)) if v == "config.missing"));

        let result = render("X: {{ shell.rm }}", &context(&config, None));
        assert!(matches!(result, Err(ConfigError::UnknownVariable(_))));
    }

    #[test]
    fn test_non_scalar_errors() {
        let config = config();
        let result = render("Zones: {{ config.zones }}", &context(&config, None));
        assert!(matches!(result, Err(ConfigError::NonScalar(v)) if v == "config.zones"));
    }

    #[test]
    fn test_malformed_template_errors() {
        let config = config();
        let result = render("Image: [unterminated\n", &context(&config, None));
        assert!(matches!(result, Err(ConfigError::RenderedParameters(_))));
    }

    #[test]
    fn test_template_without_placeholders_is_parsed_as_is() {
        let config = config();
        let rendered = rendered(
            "Plain: value\nBraces: '{ not a placeholder }'\n",
            &context(&config, None),
        );
        assert_eq!(
            rendered,
            vec![pair("Plain", "value"), pair("Braces", "{ not a placeholder }")]
        );
    }

    #[test]
    fn test_references_secrets() {
        assert!(references_secrets("A: {{ secrets.api_key }}"));
        assert!(!references_secrets("A: {{ config.secrets_bucket }}"));
    }
}
