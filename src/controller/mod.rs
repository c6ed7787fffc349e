//! Router controller
//!
//! Exposes a backend Service through an Ingress and reports the address the
//! ingress controller publishes.

mod reconciler;
#[cfg(test)]
mod reconciler_test;
pub mod resources;

pub use reconciler::{RouterReconciler, CHECK_ADDRESS, CHECK_CLEANUP, CHECK_INGRESS, CONTROLLER_NAME};
