//! Error types for the convergence engine

use thiserror::Error;

/// Main error type for engine and controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error (fetch, update, status update, delete)
    #[error("kubernetes error: {0}")]
    KubeError(#[from] kube::Error),

    /// A named check recorded a failure
    #[error("check {check} failed: {message}")]
    CheckFailed { check: String, message: String },

    /// Invalid spec on a reconciled resource
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Operator configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Tracing/OpenTelemetry setup error
    #[error("telemetry error: {0}")]
    TelemetryError(String),
}

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Create a check failure for the given check name
    pub fn check_failed(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CheckFailed {
            check: check.into(),
            message: message.into(),
        }
    }

    /// Whether retrying soon is likely to help
    ///
    /// API errors other than client-side rejections and check failures are
    /// transient; a bad spec or a broken configuration only changes when a
    /// human edits something.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => {
                resp.code == 409 || resp.code == 429 || resp.code >= 500
            }
            Error::KubeError(_) => true,
            Error::CheckFailed { .. } => true,
            Error::ValidationError(_)
            | Error::SerializationError(_)
            | Error::ConfigError(_)
            | Error::TelemetryError(_) => false,
        }
    }

    /// Short category used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::CheckFailed { .. } => "check",
            Error::ValidationError(_) => "validation",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::TelemetryError(_) => "telemetry",
        }
    }

    /// Whether the error is a 404 from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(resp)) if resp.code == 404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::KubeError(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_conflicts_and_server_errors_are_retriable() {
        assert!(api_error(409).is_retriable());
        assert!(api_error(503).is_retriable());
        assert!(!api_error(422).is_retriable());
    }

    #[test]
    fn test_validation_is_not_retriable() {
        let err = Error::ValidationError("no hosts".to_string());
        assert!(!err.is_retriable());
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_check_failed_display() {
        let err = Error::check_failed("ingress", "waiting for address");
        assert_eq!(err.to_string(), "check ingress failed: waiting for address");
        assert!(err.is_retriable());
    }

    #[test]
    fn test_not_found() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(409).is_not_found());
    }
}
