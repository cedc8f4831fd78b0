//! # Constants
//!
//! Shared constants used throughout the reconciler.
//!
//! Timing values are defaults and can be overridden via environment variables
//! (see [`crate::config::ReconcilerSettings`]).

/// Maximum stack name length accepted before any remote call is issued
pub const MAX_STACK_NAME_LEN: usize = 32;

/// Environment name that keeps its own stack bucket
pub const PRODUCTION_ENV: &str = "production";

/// Bucket every other environment collapses into when deriving stack names
pub const NON_PRODUCTION_ENV: &str = "non-production";

/// Environment whose documents are used when the requested one is absent or empty
pub const DEFAULT_ENV: &str = "development";

/// Environment treated as neither production nor development
pub const STAGING_ENV: &str = "staging";

/// Marker that tags a secret value as KMS ciphertext
pub const ENCRYPTED_MARKER: &str = "[ENC,";

/// Capability granted on every create/update so templates may manage IAM resources
pub const CAPABILITY_IAM: &str = "CAPABILITY_IAM";

/// Exact message CloudFormation returns for an update that changes nothing
pub const NO_UPDATES_MESSAGE: &str = "No updates are to be performed.";

/// Default delay between waiter polls (seconds)
pub const DEFAULT_WAITER_DELAY_SECS: u64 = 20;

/// Default number of waiter polls before giving up
pub const DEFAULT_WAITER_MAX_ATTEMPTS: u32 = 45;

/// Default delay between polls while waiting for an in-flight operation to settle (seconds)
pub const DEFAULT_SETTLE_POLL_SECS: u64 = 10;

/// Default confirmation prompt timeout (seconds)
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 30;

/// Common configuration document
pub const COMMON_CONFIG_DOCUMENT: &str = "common.yml";

/// Common secrets document
pub const COMMON_SECRETS_DOCUMENT: &str = "common_secrets.yml";

/// Suffix of the parameter template looked up next to a stack template
pub const PARAMS_TEMPLATE_SUFFIX: &str = ".params.yml";
