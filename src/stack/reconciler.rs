//! # Stack Reconciler
//!
//! Idempotent apply/destroy for a single named stack.
//!
//! ## Apply
//!
//! 1. Validate the stack name (no remote call is made for an invalid name)
//! 2. Describe the stack and classify its status
//! 3. Absent or recoverable: clean up any leftover stack, then create
//! 4. Updatable: update; "no updates" is success, a rolled-back update is an [`StackError::Update`]
//! 5. Unrecoverable or busy: fail without touching the stack
//!
//! Status is cached for the duration of one public call and refreshed before
//! every poll.

use crate::config::{ConfigDocument, ConfigLoader, EnvironmentConfig, ReconcilerSettings};
use crate::console::UserInteraction;
use crate::constants::{CAPABILITY_IAM, NO_UPDATES_MESSAGE, PARAMS_TEMPLATE_SUFFIX};
use crate::error::StackError;
use crate::observability::metrics;
use crate::provider::{
    ControlPlane, ControlPlaneError, CreateStackRequest, OnFailure, Parameter, StackDescription,
    UpdateStackRequest, WaitCondition,
};
use crate::secrets::Decryptor;
use crate::stack::{StackName, StackStatus, StatusClass};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Inputs for [`StackReconciler::apply`] and [`StackReconciler::config`]
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    /// Stack template; required for apply
    pub template_path: Option<PathBuf>,
    /// Directory with `common.yml`, `<env>.yml` and secrets documents
    pub config_path: Option<PathBuf>,
    /// Overrides merged over the loaded configuration
    pub injected_config: ConfigDocument,
    /// Environment used for config resolution; defaults to the reconciler's
    pub env_name: Option<String>,
    /// Dynamic parameters, highest precedence
    pub parameters: Vec<Parameter>,
    /// Parameter template; defaults to `<app_name>.params.yml` next to the template
    pub params_template_path: Option<PathBuf>,
    /// Legacy CloudFormation JSON parameter file
    pub file_params_path: Option<PathBuf>,
}

/// Result of a successful apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ApplyOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
        }
    }
}

/// Result of a destroy that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// Nothing to delete
    Absent,
    /// Operator did not confirm in time
    Declined,
    Deleted,
}

impl DestroyOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DestroyOutcome::Absent => "absent",
            DestroyOutcome::Declined => "declined",
            DestroyOutcome::Deleted => "deleted",
        }
    }
}

/// Result of the update step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The control plane found nothing to change
    NoChange,
    /// The update was accepted but the stack rolled back
    Failed(String),
}

pub struct StackReconciler {
    app_name: String,
    env_name: String,
    stack_name: StackName,
    control_plane: Arc<dyn ControlPlane>,
    loader: Arc<dyn ConfigLoader>,
    decryptor: Arc<dyn Decryptor>,
    console: Arc<dyn UserInteraction>,
    settings: ReconcilerSettings,
    cached_stack: Mutex<Option<Option<StackDescription>>>,
}

impl std::fmt::Debug for StackReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackReconciler")
            .field("app_name", &self.app_name)
            .field("env_name", &self.env_name)
            .field("stack_name", &self.stack_name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl StackReconciler {
    pub fn new(
        app_name: impl Into<String>,
        env_name: impl Into<String>,
        control_plane: Arc<dyn ControlPlane>,
        loader: Arc<dyn ConfigLoader>,
        decryptor: Arc<dyn Decryptor>,
        console: Arc<dyn UserInteraction>,
    ) -> Self {
        let app_name = app_name.into();
        let env_name = env_name.into();
        let stack_name = StackName::for_environment(&app_name, &env_name);

        Self {
            app_name,
            env_name,
            stack_name,
            control_plane,
            loader,
            decryptor,
            console,
            settings: ReconcilerSettings::default(),
            cached_stack: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ReconcilerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Reconcile an already-formed stack name instead of the derived one
    #[must_use]
    pub fn with_stack_name(mut self, stack_name: StackName) -> Self {
        self.stack_name = stack_name;
        self
    }

    pub fn stack_name(&self) -> &StackName {
        &self.stack_name
    }

    fn reset_cache(&self) {
        if let Ok(mut cached) = self.cached_stack.lock() {
            *cached = None;
        }
    }

    /// Describe the stack, using the per-call cache unless `refresh` is set
    async fn current_stack(&self, refresh: bool) -> Result<Option<StackDescription>, StackError> {
        if !refresh {
            if let Ok(cached) = self.cached_stack.lock() {
                if let Some(stack) = cached.as_ref() {
                    return Ok(stack.clone());
                }
            }
        }

        let stack = match self.control_plane.describe_stack(self.stack_name.as_str()).await {
            Ok(description) => Some(description),
            Err(ControlPlaneError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        if let Ok(mut cached) = self.cached_stack.lock() {
            *cached = Some(stack.clone());
        }
        Ok(stack)
    }

    fn environment(&self, config: &StackConfig) -> EnvironmentConfig {
        let params_template_path = config.params_template_path.clone().or_else(|| {
            let template = config.template_path.as_deref()?;
            let default = template
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(format!("{}{PARAMS_TEMPLATE_SUFFIX}", self.app_name));
            (default != template).then_some(default)
        });

        EnvironmentConfig::new(
            self.app_name.clone(),
            config.env_name.clone().unwrap_or_else(|| self.env_name.clone()),
            Arc::clone(&self.loader),
            Arc::clone(&self.decryptor),
        )
        .with_config_dir(config.config_path.clone())
        .with_injected_config(config.injected_config.clone())
        .with_params_template(params_template_path)
        .with_params_file(config.file_params_path.clone())
        .with_dynamic_parameters(config.parameters.clone())
    }

    fn template_body(&self, template_path: &Path) -> Result<String, StackError> {
        self.loader.read_text(template_path)?.ok_or_else(|| {
            StackError::Usage(format!(
                "Stack template {} does not exist",
                template_path.display()
            ))
        })
    }

    /// Create the stack if absent or broken, otherwise update it
    pub async fn apply(&self, config: &StackConfig) -> Result<ApplyOutcome, StackError> {
        let span = info_span!("stack.apply", stack.name = self.stack_name.as_str());
        let started = Instant::now();

        let result = self.apply_inner(config).instrument(span).await;

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(e) => e.kind(),
        };
        metrics::record_operation("apply", outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn apply_inner(&self, config: &StackConfig) -> Result<ApplyOutcome, StackError> {
        let template_path = config.template_path.as_deref().ok_or_else(|| {
            StackError::Usage("A template path is required to apply a stack".to_string())
        })?;
        self.stack_name.validate()?;
        self.reset_cache();

        let stack = self.current_stack(false).await?;
        debug!(
            "Stack {} is {}",
            self.stack_name,
            stack
                .as_ref()
                .map_or("absent", |stack| stack.status.as_str())
        );

        match stack.as_ref().map(|stack| (stack.status.classify(), &stack.status)) {
            None | Some((StatusClass::Recoverable, _)) => {
                self.ensure_deleted().await?;
                self.console
                    .write_line(&format!("Creating your new stack {}", self.stack_name));
                self.create(config, template_path).await?;
                Ok(ApplyOutcome::Created)
            }
            Some((StatusClass::Updatable, _)) => match self.update(config, template_path).await? {
                UpdateOutcome::Applied => Ok(ApplyOutcome::Updated),
                UpdateOutcome::NoChange => {
                    info!("No updates to perform for {}", self.stack_name);
                    self.console.write_line(&format!(
                        "No changes need to be applied for {}.",
                        self.stack_name
                    ));
                    Ok(ApplyOutcome::Unchanged)
                }
                UpdateOutcome::Failed(reason) => {
                    warn!("Update of {} failed: {}", self.stack_name, reason);
                    self.console.write_line(
                        "Failed to apply the environment update. The stack has been rolled back. It is still safe to apply updates.",
                    );
                    let url = self.stack_events_url().await;
                    self.console.write_line(&format!(
                        "Find error details in the AWS CloudFormation console: {url}"
                    ));
                    Err(StackError::Update(format!(
                        "Stack update failed for {}.",
                        self.stack_name
                    )))
                }
            },
            Some((StatusClass::Unrecoverable, status)) => Err(StackError::Unrecoverable {
                stack: self.stack_name.to_string(),
                status: status.to_string(),
            }),
            Some((StatusClass::Busy, status)) => Err(StackError::Busy {
                stack: self.stack_name.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Delete a leftover stack before recreating it
    async fn ensure_deleted(&self) -> Result<(), StackError> {
        let Some(stack) = self.current_stack(false).await? else {
            return Ok(());
        };
        if stack.status == StackStatus::DeleteComplete {
            return Ok(());
        }

        self.console.write_line(&format!(
            "There's a previous stack called {} that didn't create properly, I'll clean it up for you...",
            self.stack_name
        ));
        self.delete_and_wait().await
    }

    /// Delete the stack and wait for it to disappear
    ///
    /// A validation error means the stack is already gone and is not fatal.
    async fn delete_and_wait(&self) -> Result<(), StackError> {
        let name = self.stack_name.as_str();
        let result = match self.control_plane.delete_stack(name).await {
            Ok(()) => {
                self.control_plane
                    .wait_until(WaitCondition::DeleteComplete, name, &self.settings.waiter())
                    .await
            }
            Err(e) => Err(e),
        };
        self.reset_cache();

        match result {
            Ok(()) => Ok(()),
            Err(ControlPlaneError::Validation(message) | ControlPlaneError::NotFound(message)) => {
                info!("Stack {} is already gone: {}", name, message);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, config: &StackConfig, template_path: &Path) -> Result<(), StackError> {
        let template_body = self.template_body(template_path)?;
        let parameters = self.environment(config).parameters().await?;

        self.control_plane
            .create_stack(CreateStackRequest {
                stack_name: self.stack_name.to_string(),
                template_body,
                parameters,
                capabilities: vec![CAPABILITY_IAM.to_string()],
                on_failure: OnFailure::Delete,
            })
            .await?;
        self.reset_cache();

        match self
            .control_plane
            .wait_until(
                WaitCondition::CreateComplete,
                self.stack_name.as_str(),
                &self.settings.waiter(),
            )
            .await
        {
            Ok(()) => {
                info!("Created stack {}", self.stack_name);
                Ok(())
            }
            Err(ControlPlaneError::Unexpected(message)) if message.contains("does not exist") => {
                warn!("Stack {} was removed after a failed create: {}", self.stack_name, message);
                self.console.write_line(&format!(
                    "There was an error during stack creation for {}, and the stack has been cleaned up.",
                    self.stack_name
                ));
                Err(StackError::Create(
                    "There was an error during stack creation. The stack has been deleted."
                        .to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(
        &self,
        config: &StackConfig,
        template_path: &Path,
    ) -> Result<UpdateOutcome, StackError> {
        let template_body = self.template_body(template_path)?;
        let parameters = self.environment(config).parameters().await?;

        match self
            .control_plane
            .update_stack(UpdateStackRequest {
                stack_name: self.stack_name.to_string(),
                template_body,
                parameters,
                capabilities: vec![CAPABILITY_IAM.to_string()],
            })
            .await
        {
            Ok(()) => {}
            Err(ControlPlaneError::Validation(message)) if message.trim() == NO_UPDATES_MESSAGE => {
                return Ok(UpdateOutcome::NoChange);
            }
            Err(e) => return Err(e.into()),
        }
        self.reset_cache();

        match self
            .control_plane
            .wait_until(
                WaitCondition::UpdateComplete,
                self.stack_name.as_str(),
                &self.settings.waiter(),
            )
            .await
        {
            Ok(()) => {
                info!("Updated stack {}", self.stack_name);
                Ok(UpdateOutcome::Applied)
            }
            Err(e @ ControlPlaneError::FailureState(_)) => Ok(UpdateOutcome::Failed(e.to_string())),
            Err(e @ ControlPlaneError::MaxAttemptsExceeded { .. }) => {
                warn!("Gave up waiting for {} to update: {}", self.stack_name, e);
                let url = self.stack_events_url().await;
                self.console.write_line(&format!(
                    "Timed out waiting for {} to finish updating, it may still be in progress. Check the AWS CloudFormation console: {url}",
                    self.stack_name
                ));
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Console link to the stack's event log
    async fn stack_events_url(&self) -> String {
        let stack_id = match self.current_stack(true).await {
            Ok(Some(stack)) => stack.stack_id.unwrap_or_else(|| self.stack_name.to_string()),
            Ok(None) | Err(_) => self.stack_name.to_string(),
        };
        stack_events_url(&self.settings.region, &stack_id)
    }

    /// Delete the stack after operator confirmation
    pub async fn destroy(&self) -> Result<DestroyOutcome, StackError> {
        let span = info_span!("stack.destroy", stack.name = self.stack_name.as_str());
        let started = Instant::now();

        let result = self.destroy_inner().instrument(span).await;

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(e) => e.kind(),
        };
        metrics::record_operation("destroy", outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn destroy_inner(&self) -> Result<DestroyOutcome, StackError> {
        self.reset_cache();
        if self.current_stack(false).await?.is_none() {
            info!("Stack {} does not exist, nothing to destroy", self.stack_name);
            return Ok(DestroyOutcome::Absent);
        }

        self.console.flash_banner(&format!(
            "Warning! You are about to delete the CloudFormation Stack {}, enter 'yes' to continue.",
            self.stack_name
        ));
        if !self
            .console
            .prompt_yes_no(self.settings.confirmation_timeout())
            .await
        {
            info!("Destroy of {} was not confirmed", self.stack_name);
            return Ok(DestroyOutcome::Declined);
        }

        match self.wait_until_settled().await? {
            None => Ok(DestroyOutcome::Deleted),
            Some(stack) if stack.status == StackStatus::DeleteComplete => Ok(DestroyOutcome::Deleted),
            Some(_) => {
                self.console
                    .write_line(&format!("Deleting stack {}", self.stack_name));
                self.delete_and_wait().await?;
                Ok(DestroyOutcome::Deleted)
            }
        }
    }

    /// Poll until no operation is in flight on the stack
    async fn wait_until_settled(&self) -> Result<Option<StackDescription>, StackError> {
        let max_attempts = self.settings.waiter_max_attempts;
        for attempt in 1..=max_attempts {
            let Some(stack) = self.current_stack(true).await? else {
                return Ok(None);
            };
            if stack.status.is_settled() {
                return Ok(Some(stack));
            }

            self.console.write_line(&format!(
                "waiting for {} to be READY, current: {}",
                self.stack_name, stack.status
            ));
            if attempt < max_attempts {
                tokio::time::sleep(self.settings.settle_poll_duration()).await;
            }
        }

        Err(ControlPlaneError::MaxAttemptsExceeded {
            stack: self.stack_name.to_string(),
            attempts: max_attempts,
        }
        .into())
    }

    /// Value of a stack output, `None` if the stack or output is absent
    pub async fn outputs(&self, key: &str) -> Result<Option<String>, StackError> {
        self.reset_cache();
        let stack = self.current_stack(false).await?;
        Ok(stack.and_then(|stack| stack.output(key).map(ToString::to_string)))
    }

    /// Resource detail for one logical resource, keyed in CamelCase
    pub async fn logical_resource(
        &self,
        logical_id: &str,
    ) -> Result<BTreeMap<String, String>, StackError> {
        let fields = self
            .control_plane
            .describe_stack_resource(self.stack_name.as_str(), logical_id)
            .await?;

        Ok(fields
            .into_iter()
            .map(|(key, value)| (camel_case(&key), value))
            .collect())
    }

    /// Merged environment configuration
    pub fn config(&self, config: &StackConfig) -> Result<ConfigDocument, StackError> {
        if config.config_path.is_none() {
            return Err(StackError::Usage(
                "A config path is required to read the environment configuration".to_string(),
            ));
        }
        Ok(self.environment(config).config()?)
    }

    pub async fn exists(&self) -> Result<bool, StackError> {
        self.reset_cache();
        Ok(self.current_stack(true).await?.is_some())
    }
}

/// `physical_resource_id` -> `PhysicalResourceId`
#[must_use]
pub fn camel_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect()
}

/// Console URL for a stack's event log
#[must_use]
pub fn stack_events_url(region: &str, stack_id: &str) -> String {
    format!(
        "https://console.aws.amazon.com/cloudformation/home?region={region}#/stacks?filter=active&tab=events&stackId={stack_id}"
    )
}
