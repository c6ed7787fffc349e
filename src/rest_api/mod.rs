//! Operational HTTP endpoints
//!
//! Serves `/healthz` and, with the `metrics` feature, `/metrics`.

mod handlers;
mod server;

pub use handlers::HealthResponse;
pub use server::{router, run_server, ApiState};
