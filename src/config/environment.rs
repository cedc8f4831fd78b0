//! # Environment Config
//!
//! Resolves configuration, secrets and stack parameters for one application
//! in one environment.
//!
//! ## Documents
//!
//! Given a config directory and environment `staging`:
//!
//! - configuration: `common.yml` <- `staging.yml` (or `development.yml`) <- injected overrides
//! - secrets: `common_secrets.yml` <- `staging_secrets.yml` (or `development_secrets.yml`)
//!
//! The environment document falls back to the development one when it is
//! absent or empty. Results are memoized per instance.

use super::template::{self, TemplateContext};
use super::{merge_documents, scalar_to_string, ConfigDocument, ConfigError, ConfigLoader};
use crate::constants::{
    COMMON_CONFIG_DOCUMENT, COMMON_SECRETS_DOCUMENT, DEFAULT_ENV, PRODUCTION_ENV, STAGING_ENV,
};
use crate::error::StackError;
use crate::params::{self, Parameter};
use crate::secrets::{Decryptor, SecretDecryptor};
use crate::stack::name::environment_bucket;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info_span, warn, Instrument};

pub struct EnvironmentConfig {
    app_name: String,
    env_name: String,
    config_dir: Option<PathBuf>,
    injected_config: ConfigDocument,
    params_template_path: Option<PathBuf>,
    file_params_path: Option<PathBuf>,
    dynamic_parameters: Vec<Parameter>,
    loader: Arc<dyn ConfigLoader>,
    secrets: SecretDecryptor,
    config_cache: OnceLock<ConfigDocument>,
    secrets_cache: OnceLock<BTreeMap<String, String>>,
}

impl std::fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("app_name", &self.app_name)
            .field("env_name", &self.env_name)
            .field("config_dir", &self.config_dir)
            .field("params_template_path", &self.params_template_path)
            .field("file_params_path", &self.file_params_path)
            .finish_non_exhaustive()
    }
}

impl EnvironmentConfig {
    pub fn new(
        app_name: impl Into<String>,
        env_name: impl Into<String>,
        loader: Arc<dyn ConfigLoader>,
        decryptor: Arc<dyn Decryptor>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            env_name: env_name.into(),
            config_dir: None,
            injected_config: ConfigDocument::new(),
            params_template_path: None,
            file_params_path: None,
            dynamic_parameters: Vec::new(),
            loader,
            secrets: SecretDecryptor::new(decryptor),
            config_cache: OnceLock::new(),
            secrets_cache: OnceLock::new(),
        }
    }

    /// Directory holding `common.yml`, `<env>.yml` and the secrets documents
    #[must_use]
    pub fn with_config_dir(mut self, config_dir: Option<PathBuf>) -> Self {
        self.config_dir = config_dir;
        self
    }

    #[must_use]
    pub fn with_injected_config(mut self, injected_config: ConfigDocument) -> Self {
        self.injected_config = injected_config;
        self
    }

    #[must_use]
    pub fn with_params_template(mut self, path: Option<PathBuf>) -> Self {
        self.params_template_path = path;
        self
    }

    #[must_use]
    pub fn with_params_file(mut self, path: Option<PathBuf>) -> Self {
        self.file_params_path = path;
        self
    }

    #[must_use]
    pub fn with_dynamic_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.dynamic_parameters = parameters;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn is_production(&self) -> bool {
        self.env_name == PRODUCTION_ENV
    }

    /// Anything that is neither production nor staging
    pub fn is_development(&self) -> bool {
        self.env_name != PRODUCTION_ENV && self.env_name != STAGING_ENV
    }

    pub fn deploy_tag(&self) -> &'static str {
        environment_bucket(&self.env_name)
    }

    pub fn tags(&self) -> Vec<String> {
        vec![self.deploy_tag().to_string()]
    }

    fn document_path(&self, name: &str) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|dir| dir.join(name))
    }

    fn load_document(&self, name: &str) -> Result<ConfigDocument, ConfigError> {
        match self.document_path(name) {
            Some(path) => self.loader.load(&path),
            None => Ok(ConfigDocument::new()),
        }
    }

    /// Load `<env><suffix>`, falling back to the development document
    fn load_environment_document(
        &self,
        suffix: &str,
    ) -> Result<(String, ConfigDocument), ConfigError> {
        let name = format!("{}{suffix}", self.env_name);
        let document = self.load_document(&name)?;
        if !document.is_empty() || self.env_name == DEFAULT_ENV {
            return Ok((name, document));
        }

        let fallback = format!("{DEFAULT_ENV}{suffix}");
        debug!("{} is absent or empty, falling back to {}", name, fallback);
        let document = self.load_document(&fallback)?;
        Ok((fallback, document))
    }

    /// Merged configuration: common, then environment, then injected overrides
    pub fn config(&self) -> Result<ConfigDocument, ConfigError> {
        if let Some(config) = self.config_cache.get() {
            return Ok(config.clone());
        }

        let common = self.load_document(COMMON_CONFIG_DOCUMENT)?;
        let (_, environment) = self.load_environment_document(".yml")?;
        let config = merge_documents(
            merge_documents(common, environment),
            self.injected_config.clone(),
        );

        Ok(self.config_cache.get_or_init(|| config).clone())
    }

    /// Merged secrets with every value decrypted
    ///
    /// Fails as a whole if any single value cannot be decrypted.
    pub async fn plain_text_secrets(&self) -> Result<BTreeMap<String, String>, StackError> {
        if let Some(secrets) = self.secrets_cache.get() {
            return Ok(secrets.clone());
        }

        let common = self.load_document(COMMON_SECRETS_DOCUMENT)?;
        let (environment_name, environment) = self.load_environment_document("_secrets.yml")?;

        let mut sources: BTreeMap<String, (&str, serde_yaml::Value)> = BTreeMap::new();
        for (name, value) in common {
            sources.insert(name, (COMMON_SECRETS_DOCUMENT, value));
        }
        for (name, value) in environment {
            sources.insert(name, (environment_name.as_str(), value));
        }

        let mut plain_text = BTreeMap::new();
        for (name, (document, value)) in sources {
            let value = scalar_to_string(&value)
                .ok_or_else(|| ConfigError::NonScalar(format!("secrets.{name}")))?;

            debug!("Decrypting '{}'", name);
            let plaintext = self
                .secrets
                .resolve(&value)
                .instrument(info_span!("secret.resolve", secret.name = name.as_str()))
                .await
                .map_err(|source| {
                    error!("Error decrypting secret '{}' from '{}'", name, document);
                    StackError::Decryption {
                        name: name.clone(),
                        document: document.to_string(),
                        source,
                    }
                })?;
            plain_text.insert(name, plaintext);
        }

        Ok(self.secrets_cache.get_or_init(|| plain_text).clone())
    }

    fn file_parameters(&self) -> Result<Vec<Parameter>, ConfigError> {
        let Some(path) = self.file_params_path.as_deref() else {
            return Ok(Vec::new());
        };
        match self.loader.read_text(path)? {
            Some(text) => params::parse_parameter_file(path, &text),
            None => {
                debug!("Parameter file {} not found, skipping", path.display());
                Ok(Vec::new())
            }
        }
    }

    /// Parameters from the rendered template, or `None` when there is no template
    async fn template_parameters(&self) -> Result<Option<Vec<Parameter>>, StackError> {
        let Some(path) = self.params_template_path.as_deref() else {
            return Ok(None);
        };
        let Some(text) = self.loader.read_text(path)? else {
            debug!("Parameter template {} not found", path.display());
            return Ok(None);
        };

        let document = self.render_template(&text).await?;
        Ok(Some(params::parameters_from_document(&document)?))
    }

    /// Render a parameter template against this environment
    ///
    /// Secrets are only decrypted when the template references them.
    pub async fn render_template(&self, text: &str) -> Result<serde_yaml::Value, StackError> {
        let config = self.config()?;
        let secrets = if template::references_secrets(text) {
            Some(self.plain_text_secrets().await?)
        } else {
            None
        };

        let context = TemplateContext {
            config: &config,
            secrets: secrets.as_ref(),
            app_name: &self.app_name,
            env_name: &self.env_name,
            deploy_tag: self.deploy_tag(),
        };
        Ok(template::render(text, &context)?)
    }

    /// Resolved parameters: parameter file, then template, then dynamic
    ///
    /// The parameter template gates the whole set. When none is configured or
    /// the file is missing the result is empty, file and dynamic parameters
    /// included.
    pub async fn parameters(&self) -> Result<Vec<Parameter>, StackError> {
        let Some(template) = self.template_parameters().await? else {
            if !self.dynamic_parameters.is_empty() || self.file_params_path.is_some() {
                warn!(
                    "No parameter template for {}, ignoring file and dynamic parameters",
                    self.app_name
                );
            }
            return Ok(Vec::new());
        };
        let file = self.file_parameters()?;

        Ok(params::resolve(
            file,
            template,
            self.dynamic_parameters.clone(),
        ))
    }

    /// Path a document would be loaded from, for diagnostics
    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }
}
