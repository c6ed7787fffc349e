//! kube-converge: a declarative convergence engine for Kubernetes operators
//!
//! Controllers describe reconciliation as a pipeline of steps over a
//! [`engine::Request`]. The engine persists per-step progress as checks in the
//! resource status, keeps labels and finalizers in place, cleans up owned
//! objects on deletion and decides when the next attempt runs.
//!
//! The [`controller`] module hosts the Router controller built on that API.

pub mod controller;
pub mod crd;
pub mod engine;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
