//! # Stack Names
//!
//! Derives stack names from an application and environment.
//!
//! Every environment other than `production` shares the `non-production`
//! bucket, so `billing` deployed to `staging` and to `dev` both reconcile
//! `billing-non-production`.

use crate::constants::{MAX_STACK_NAME_LEN, NON_PRODUCTION_ENV, PRODUCTION_ENV};
use crate::error::StackError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackName(String);

impl StackName {
    /// Derive the stack name for an application in an environment
    #[must_use]
    pub fn for_environment(app_name: &str, env_name: &str) -> Self {
        Self(format!("{app_name}-{}", environment_bucket(env_name)))
    }

    /// Use an already-formed stack name as-is
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject names the control plane would refuse
    pub fn validate(&self) -> Result<(), StackError> {
        if self.0.len() > MAX_STACK_NAME_LEN {
            return Err(StackError::Validation(format!(
                "The stack name needs to be {MAX_STACK_NAME_LEN} characters or shorter (got {} for '{}')",
                self.0.len(),
                self.0
            )));
        }
        Ok(())
    }
}

/// Collapse an environment name into the bucket used for stack naming
#[must_use]
pub fn environment_bucket(env_name: &str) -> &'static str {
    if env_name == PRODUCTION_ENV {
        PRODUCTION_ENV
    } else {
        NON_PRODUCTION_ENV
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StackName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
