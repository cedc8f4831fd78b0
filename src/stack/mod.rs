//! # Stack
//!
//! Stack naming, status classification and the apply/destroy reconciler.

pub mod name;
pub mod reconciler;
pub mod status;

pub use name::StackName;
pub use reconciler::{
    ApplyOutcome, DestroyOutcome, StackConfig, StackReconciler, UpdateOutcome,
};
pub use status::{StackStatus, StatusClass};
