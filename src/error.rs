//! Operator error type
//!
//! One enum covers every failure the reconcile loop can hit. Each variant
//! carries a human-readable detail string; `Display` prefixes it with a short
//! category tag so log lines and events stay grep-able.

use std::fmt;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Everything that can go wrong while reconciling an autoscaler
#[derive(Debug)]
pub enum OperatorError {
    /// The apiserver rejected or failed a request
    KubeApi(String),
    /// A referenced object does not exist
    NotFound(String),
    /// The autoscaler spec cannot be processed
    Validation(String),
    /// Metric retrieval or aggregation failed
    Metrics(String),
    /// The pod selector is missing or unconvertible
    Selector(String),
    /// A reconcile pass failed for an internal reason
    Reconciliation(String),
    /// JSON encoding or decoding failed
    Serialization(String),
}

impl OperatorError {
    /// Short category tag for the variant.
    pub fn category(&self) -> &'static str {
        match self {
            OperatorError::KubeApi(_) => "kubernetes api",
            OperatorError::NotFound(_) => "not found",
            OperatorError::Validation(_) => "invalid spec",
            OperatorError::Metrics(_) => "metrics",
            OperatorError::Selector(_) => "selector",
            OperatorError::Reconciliation(_) => "reconcile",
            OperatorError::Serialization(_) => "serialization",
        }
    }

    fn detail(&self) -> &str {
        match self {
            OperatorError::KubeApi(detail)
            | OperatorError::NotFound(detail)
            | OperatorError::Validation(detail)
            | OperatorError::Metrics(detail)
            | OperatorError::Selector(detail)
            | OperatorError::Reconciliation(detail)
            | OperatorError::Serialization(detail) => detail,
        }
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category(), self.detail())
    }
}

impl std::error::Error for OperatorError {}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                OperatorError::NotFound(response.message)
            }
            other => OperatorError::KubeApi(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    #[test]
    fn test_display_prefixes_category() {
        let cases = [
            (OperatorError::KubeApi("boom".into()), "kubernetes api"),
            (OperatorError::NotFound("gone".into()), "not found"),
            (OperatorError::Validation("bad".into()), "invalid spec"),
            (OperatorError::Metrics("empty".into()), "metrics"),
            (OperatorError::Selector("odd".into()), "selector"),
            (OperatorError::Reconciliation("loop".into()), "reconcile"),
            (OperatorError::Serialization("json".into()), "serialization"),
        ];
        for (err, category) in cases {
            assert_eq!(err.category(), category);
            let rendered = err.to_string();
            assert!(rendered.starts_with(category), "got: {}", rendered);
            assert!(rendered.contains(": "));
        }
    }

    #[test]
    fn test_display_keeps_detail() {
        let err = OperatorError::Metrics("no samples for ready pods".into());
        assert!(err.to_string().contains("no samples for ready pods"));
    }

    #[test]
    fn test_kube_404_maps_to_not_found() {
        let api_err = kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "deployments.apps \"web\" not found".into(),
            reason: "NotFound".into(),
            code: 404,
        });
        let err: OperatorError = api_err.into();
        assert!(matches!(err, OperatorError::NotFound(_)));
        assert!(err.to_string().contains("web"));
    }

    #[test]
    fn test_other_kube_errors_map_to_kube_api() {
        let api_err = kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "conflict".into(),
            reason: "Conflict".into(),
            code: 409,
        });
        let err: OperatorError = api_err.into();
        assert!(matches!(err, OperatorError::KubeApi(_)));
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: OperatorError = parse_err.into();
        assert!(matches!(err, OperatorError::Serialization(_)));
    }
}
