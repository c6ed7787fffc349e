//! HTTP handlers for the operational endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::server::ApiState;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Whether this replica currently acts on the workqueue
    pub leader: bool,
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        leader: state.leader.is_leader(),
    })
}

/// Prometheus text exposition of the engine metrics
#[cfg(feature = "metrics")]
pub async fn metrics() -> Result<String, axum::http::StatusCode> {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    encode(&mut buffer, &crate::engine::metrics::REGISTRY).map_err(|e| {
        tracing::error!("Failed to encode metrics: {:?}", e);
        axum::http::StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LeaderState;

    #[tokio::test]
    async fn test_health_reports_leadership() {
        let state = ApiState {
            leader: LeaderState::follower(),
        };
        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "healthy");
        assert!(!body.leader);

        let state = ApiState {
            leader: LeaderState::always(),
        };
        let Json(body) = health(State(state)).await;
        assert!(body.leader);
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn test_metrics_endpoint_encodes_registry() {
        crate::engine::metrics::inc_step_result("handler-test", "halt");
        let body = metrics().await.unwrap();
        assert!(body.contains("converge_step_results_total"));
    }
}
