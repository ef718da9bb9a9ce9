//! Service Module
//!
//! Business logic layer for the controller.
//! Services compose the repositories into submissions and monitor activations.

pub mod enumerator;
pub mod monitor;
pub mod planner;
pub mod provisioner;
pub mod signer;
pub mod submission;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export for convenience
pub use monitor as monitor_service;
pub use submission as submission_service;
