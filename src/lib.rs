//! Stack Reconciler Library
//!
//! Idempotent apply/destroy of CloudFormation stacks, with layered
//! environment configuration, parameter templates and KMS-encrypted secrets.
//!
//! The reconciler talks to the outside world only through traits:
//! [`provider::ControlPlane`], [`config::ConfigLoader`],
//! [`secrets::Decryptor`] and [`console::UserInteraction`].

pub mod config;
pub mod console;
pub mod constants;
pub mod error;
pub mod observability;
pub mod params;
pub mod provider;
pub mod secrets;
pub mod stack;

pub use error::StackError;
pub use stack::{StackConfig, StackReconciler};
