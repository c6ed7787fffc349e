//! Custom Resource Definitions
//!
//! Shared status types used by every reconciled resource, plus the Router CRD.

mod router;
pub mod types;


pub use router::{
    Router, RouterHost, RouterPath, RouterSpec, RouterStatus, SpecValidationError,
};
pub use types::*;
