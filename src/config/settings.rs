//! # Reconciler Settings
//!
//! Process-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_CONFIRMATION_TIMEOUT_SECS, DEFAULT_SETTLE_POLL_SECS, DEFAULT_WAITER_DELAY_SECS,
    DEFAULT_WAITER_MAX_ATTEMPTS,
};
use crate::provider::WaiterConfig;
use std::time::Duration;

/// Reconciler-level configuration
///
/// All settings have defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Delay between waiter polls (seconds)
    pub waiter_delay_secs: u64,
    /// Number of waiter polls before giving up
    pub waiter_max_attempts: u32,
    /// Delay between polls while waiting for an in-flight operation to settle (seconds)
    pub settle_poll_secs: u64,
    /// How long the destroy confirmation prompt waits for an answer (seconds)
    pub confirmation_timeout_secs: u64,
    /// Region used to build console links; empty when unknown
    pub region: String,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            waiter_delay_secs: DEFAULT_WAITER_DELAY_SECS,
            waiter_max_attempts: DEFAULT_WAITER_MAX_ATTEMPTS,
            settle_poll_secs: DEFAULT_SETTLE_POLL_SECS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            region: String::new(),
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ReconcilerSettings {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            waiter_delay_secs: env_var_or_default(
                "STACK_WAITER_DELAY_SECS",
                DEFAULT_WAITER_DELAY_SECS,
            ),
            waiter_max_attempts: env_var_or_default(
                "STACK_WAITER_MAX_ATTEMPTS",
                DEFAULT_WAITER_MAX_ATTEMPTS,
            ),
            settle_poll_secs: env_var_or_default("STACK_SETTLE_POLL_SECS", DEFAULT_SETTLE_POLL_SECS),
            confirmation_timeout_secs: env_var_or_default(
                "STACK_CONFIRMATION_TIMEOUT_SECS",
                DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            ),
            region: env_var_or_default_str("AWS_DEFAULT_REGION", ""),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }

    /// Waiter poll budget
    pub fn waiter(&self) -> WaiterConfig {
        WaiterConfig {
            delay: Duration::from_secs(self.waiter_delay_secs),
            max_attempts: self.waiter_max_attempts,
        }
    }

    pub fn settle_poll_duration(&self) -> Duration {
        Duration::from_secs(self.settle_poll_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
