//! # Control Plane
//!
//! Abstract interface for the remote infrastructure control plane.
//!
//! The reconciler only depends on this trait; [`aws::CloudFormationControlPlane`]
//! is the production implementation and tests substitute recording fakes.

pub mod aws;

use crate::stack::StackStatus;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub use aws::CloudFormationControlPlane;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("Stack {0} does not exist")]
    NotFound(String),

    /// Request rejected by the control plane (`ValidationError`)
    #[error("{0}")]
    Validation(String),

    /// Waiter observed a terminal status that is not the one it waited for
    #[error("Waiter encountered a terminal failure state: {0}")]
    FailureState(String),

    /// Waiter observed something it cannot interpret, such as the stack disappearing
    #[error("Waiter encountered an unexpected error: {0}")]
    Unexpected(String),

    #[error("Waiter gave up on {stack} after {attempts} attempts")]
    MaxAttemptsExceeded { stack: String, attempts: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single named stack input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

/// Snapshot of a stack returned by `describe_stack`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_name: String,
    pub stack_id: Option<String>,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub outputs: Vec<StackOutput>,
}

impl StackDescription {
    #[must_use]
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|output| output.key == key)
            .map(|output| output.value.as_str())
    }
}

/// What to do with a stack whose creation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Delete,
    Rollback,
    DoNothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<String>,
    pub on_failure: OnFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<String>,
}

/// Target condition for [`ControlPlane::wait_until`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    CreateComplete,
    UpdateComplete,
    DeleteComplete,
}

impl WaitCondition {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitCondition::CreateComplete => "stack_create_complete",
            WaitCondition::UpdateComplete => "stack_update_complete",
            WaitCondition::DeleteComplete => "stack_delete_complete",
        }
    }

    /// Decide whether polling should stop for the observed status
    ///
    /// `None` means the stack no longer exists.
    pub fn evaluate(&self, status: Option<&StackStatus>) -> WaitVerdict {
        match (self, status) {
            (WaitCondition::DeleteComplete, None | Some(StackStatus::DeleteComplete)) => {
                WaitVerdict::Success
            }
            (WaitCondition::DeleteComplete, Some(StackStatus::DeleteFailed)) => {
                WaitVerdict::Failure(StackStatus::DeleteFailed.to_string())
            }
            (_, None | Some(StackStatus::DeleteComplete)) => WaitVerdict::Missing,
            (WaitCondition::CreateComplete, Some(StackStatus::CreateComplete))
            | (WaitCondition::UpdateComplete, Some(StackStatus::UpdateComplete)) => {
                WaitVerdict::Success
            }
            (WaitCondition::CreateComplete | WaitCondition::UpdateComplete, Some(status))
                if status.is_failure() =>
            {
                WaitVerdict::Failure(status.to_string())
            }
            _ => WaitVerdict::Retry,
        }
    }
}

/// Outcome of a single waiter poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitVerdict {
    Success,
    Retry,
    Failure(String),
    Missing,
}

/// Poll budget for waiters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterConfig {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        use crate::constants::{DEFAULT_WAITER_DELAY_SECS, DEFAULT_WAITER_MAX_ATTEMPTS};
        Self {
            delay: Duration::from_secs(DEFAULT_WAITER_DELAY_SECS),
            max_attempts: DEFAULT_WAITER_MAX_ATTEMPTS,
        }
    }
}

/// Remote infrastructure control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Describe a stack; a stack that does not exist is [`ControlPlaneError::NotFound`]
    async fn describe_stack(&self, stack_name: &str)
        -> Result<StackDescription, ControlPlaneError>;

    async fn create_stack(&self, request: CreateStackRequest) -> Result<(), ControlPlaneError>;

    /// Start an update; a no-op update is rejected with
    /// [`ControlPlaneError::Validation`] carrying the remote message
    async fn update_stack(&self, request: UpdateStackRequest) -> Result<(), ControlPlaneError>;

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ControlPlaneError>;

    /// Block until `condition` holds, a failure state is reached, or the budget runs out
    async fn wait_until(
        &self,
        condition: WaitCondition,
        stack_name: &str,
        waiter: &WaiterConfig,
    ) -> Result<(), ControlPlaneError>;

    /// Resource detail fields for one logical resource, keyed by snake_case field name
    async fn describe_stack_resource(
        &self,
        stack_name: &str,
        logical_resource_id: &str,
    ) -> Result<BTreeMap<String, String>, ControlPlaneError>;
}
