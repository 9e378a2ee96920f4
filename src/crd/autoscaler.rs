//! ConfigurableAutoscaler Custom Resource Definition
//!
//! Defines the autoscaler resource: which workload to scale, replica bounds,
//! the metrics driving the decision, and the stability knobs (tolerance,
//! scale-up rate limit, forbidden windows) that the stock HPA hard-codes.

use crate::conditions::AutoscalerCondition;
use crate::error::{OperatorError, Result};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ConfigurableAutoscaler is the Schema for the configurableautoscalers API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "autoscalers.chpa.dev",
    version = "v1beta1",
    kind = "ConfigurableAutoscaler",
    namespaced,
    status = "AutoscalerStatus",
    shortname = "chpa",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.scaleTargetRef.name"}"#,
    printcolumn = r#"{"name":"MinReplicas","type":"integer","jsonPath":".spec.minReplicas"}"#,
    printcolumn = r#"{"name":"MaxReplicas","type":"integer","jsonPath":".spec.maxReplicas"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".status.desiredReplicas"}"#,
    printcolumn = r#"{"name":"LastScale","type":"date","jsonPath":".status.lastScaleTime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSpec {
    /// Reference to the workload whose replica count is adjusted
    pub scale_target_ref: CrossVersionObjectReference,

    /// Lower bound for the desired replica count
    #[serde(default)]
    #[schemars(range(min = 1, max = 1000))]
    pub min_replicas: Option<i32>,

    /// Upper bound for the desired replica count
    #[schemars(range(min = 1, max = 1000))]
    pub max_replicas: i32,

    /// Minimum seconds between two consecutive downscales (default 300)
    #[serde(default)]
    #[schemars(range(min = 1, max = 600))]
    pub downscale_forbidden_window_seconds: i32,

    /// Minimum seconds between two consecutive upscales (default 300)
    #[serde(default)]
    #[schemars(range(min = 1, max = 600))]
    pub upscale_forbidden_window_seconds: i32,

    /// One reconcile pass may grow the replica count at most by this factor (default 2.0)
    #[serde(default)]
    #[schemars(range(min = 1.0, max = 10.0))]
    pub scale_up_limit_factor: f64,

    /// Floor for the one-pass scale-up limit, so small deployments can still grow (default 4)
    #[serde(default)]
    #[schemars(range(min = 1, max = 20))]
    pub scale_up_limit_minimum: i32,

    /// Dead-band around usageRatio=1 within which no scaling happens (default 0.1)
    #[serde(default)]
    pub tolerance: f64,

    /// Metric specifications used to calculate the desired replica count.
    /// The largest proposal across all metrics wins.
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

/// Identifies the referred resource across API versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    /// Kind of the referent (e.g. "Deployment")
    pub kind: String,
    /// Name of the referent
    pub name: String,
    /// API version of the referent
    #[serde(default)]
    pub api_version: Option<String>,
}

/// A single metric the autoscaler tracks, tagged by source type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum MetricSpec {
    /// Metric describing a single Kubernetes object (e.g. requests-per-second on an Ingress)
    Object { object: ObjectMetricSource },
    /// Metric averaged across the target's pods
    Pods { pods: PodsMetricSource },
    /// Resource metric (CPU or memory) from the pods' containers
    Resource { resource: ResourceMetricSource },
    /// Metric from outside the cluster (e.g. queue depth in a hosted broker)
    External { external: ExternalMetricSource },
}

/// Metric sourced from a single named object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetricSource {
    /// The object the metric describes
    pub target: CrossVersionObjectReference,
    /// Name of the metric
    pub metric_name: String,
    /// Target value of the metric (quantity, e.g. "10" or "500m")
    pub target_value: String,
}

/// Metric averaged across pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodsMetricSource {
    /// Name of the metric
    pub metric_name: String,
    /// Target per-pod average value (quantity)
    pub target_average_value: String,
}

/// Resource metric from the pods' containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetricSource {
    /// Resource name ("cpu" or "memory")
    pub name: String,
    /// Target average utilization as a percentage of the containers' requests
    #[serde(default)]
    #[schemars(range(min = 0, max = 100))]
    pub target_average_utilization: Option<i32>,
    /// Target per-pod average value (quantity); exactly one of the two targets must be set
    #[serde(default)]
    pub target_average_value: Option<String>,
}

/// Metric from outside the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricSource {
    /// Name of the metric
    pub metric_name: String,
    /// Restricts which series of the metric are summed
    #[serde(default)]
    pub metric_selector: Option<MetricSelector>,
    /// Target total value (quantity); exactly one of the two targets must be set
    #[serde(default)]
    pub target_value: Option<String>,
    /// Target per-replica average value (quantity)
    #[serde(default)]
    pub target_average_value: Option<String>,
}

/// Label selector over metric series, mirroring metav1.LabelSelector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricSelector {
    /// Labels the series must carry
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    /// Expression-based requirements
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

/// A single selector requirement (In, NotIn, Exists, DoesNotExist)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectorRequirement {
    /// Label key the requirement applies to
    pub key: String,
    /// Operator: In, NotIn, Exists, DoesNotExist
    pub operator: String,
    /// Values for In/NotIn operators
    #[serde(default)]
    pub values: Vec<String>,
}

/// Observed value for one spec metric, mirroring [`MetricSpec`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum MetricStatus {
    Object { object: ObjectMetricStatus },
    Pods { pods: PodsMetricStatus },
    Resource { resource: ResourceMetricStatus },
    External { external: ExternalMetricStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetricStatus {
    pub target: CrossVersionObjectReference,
    pub metric_name: String,
    /// Last observed value of the metric (quantity)
    pub current_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodsMetricStatus {
    pub metric_name: String,
    /// Last observed per-pod average (quantity)
    pub current_average_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetricStatus {
    pub name: String,
    /// Last observed utilization as a percentage of requests (only for utilization targets)
    #[serde(default)]
    pub current_average_utilization: Option<i32>,
    /// Last observed per-pod average value (quantity)
    pub current_average_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricStatus {
    pub metric_name: String,
    #[serde(default)]
    pub metric_selector: Option<MetricSelector>,
    /// Last observed total value (quantity, for value targets)
    #[serde(default)]
    pub current_value: Option<String>,
    /// Last observed per-replica average (quantity, for average targets)
    #[serde(default)]
    pub current_average_value: Option<String>,
}

/// Observed state of a ConfigurableAutoscaler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerStatus {
    /// Generation observed by the controller on the last pass
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// When the controller last changed the workload's replica count (RFC 3339)
    #[serde(default)]
    pub last_scale_time: Option<String>,
    /// Replica count observed on the workload
    #[serde(default)]
    pub current_replicas: i32,
    /// Replica count the controller decided on
    #[serde(default)]
    pub desired_replicas: i32,
    /// Last observed values for the spec metrics
    #[serde(default)]
    pub current_metrics: Vec<MetricStatus>,
    /// Conditions describing the controller's view of the autoscaler
    #[serde(default)]
    pub conditions: Vec<AutoscalerCondition>,
}

// Spec-wide defaults applied to zero-valued tunables
pub const DEFAULT_DOWNSCALE_FORBIDDEN_WINDOW_SECONDS: i32 = 300;
pub const DEFAULT_UPSCALE_FORBIDDEN_WINDOW_SECONDS: i32 = 300;
pub const DEFAULT_SCALE_UP_LIMIT_FACTOR: f64 = 2.0;
pub const DEFAULT_SCALE_UP_LIMIT_MINIMUM: i32 = 4;
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Replaces zero-valued tunables with the spec-wide defaults.
///
/// Zero is not a meaningful value for any of these fields, so it doubles as
/// the "absent" marker after deserialization.
pub fn apply_defaults(spec: &mut AutoscalerSpec) {
    if spec.downscale_forbidden_window_seconds == 0 {
        spec.downscale_forbidden_window_seconds = DEFAULT_DOWNSCALE_FORBIDDEN_WINDOW_SECONDS;
    }
    if spec.upscale_forbidden_window_seconds == 0 {
        spec.upscale_forbidden_window_seconds = DEFAULT_UPSCALE_FORBIDDEN_WINDOW_SECONDS;
    }
    if spec.scale_up_limit_factor == 0.0 {
        spec.scale_up_limit_factor = DEFAULT_SCALE_UP_LIMIT_FACTOR;
    }
    if spec.scale_up_limit_minimum == 0 {
        spec.scale_up_limit_minimum = DEFAULT_SCALE_UP_LIMIT_MINIMUM;
    }
    if spec.tolerance == 0.0 {
        spec.tolerance = DEFAULT_TOLERANCE;
    }
}

/// Validates an autoscaler spec against the admitted target kind.
///
/// Returns the first problem found: target kind, then metrics in declaration
/// order with their per-variant checks, then the numeric bounds.
pub fn validate(spec: &AutoscalerSpec, admitted_kind: &str) -> Result<()> {
    if spec.scale_target_ref.kind != admitted_kind {
        return Err(OperatorError::Validation(format!(
            "scaleTargetRef kind '{}' is not supported, use {} instead",
            spec.scale_target_ref.kind, admitted_kind
        )));
    }

    if spec.metrics.is_empty() {
        return Err(OperatorError::Validation(
            "at least one metric must be specified".to_string(),
        ));
    }

    for (i, metric) in spec.metrics.iter().enumerate() {
        validate_metric(metric)
            .map_err(|e| OperatorError::Validation(format!("metrics[{}]: {}", i, e)))?;
    }

    if spec.max_replicas < 1 {
        return Err(OperatorError::Validation(
            "maxReplicas must be at least 1".to_string(),
        ));
    }
    if let Some(min) = spec.min_replicas {
        if min < 1 {
            return Err(OperatorError::Validation(
                "minReplicas must be at least 1".to_string(),
            ));
        }
        if spec.max_replicas < min {
            return Err(OperatorError::Validation(format!(
                "maxReplicas ({}) must not be below minReplicas ({})",
                spec.max_replicas, min
            )));
        }
    }
    for (field, value) in [
        (
            "downscaleForbiddenWindowSeconds",
            spec.downscale_forbidden_window_seconds,
        ),
        (
            "upscaleForbiddenWindowSeconds",
            spec.upscale_forbidden_window_seconds,
        ),
    ] {
        if !(1..=600).contains(&value) {
            return Err(OperatorError::Validation(format!(
                "{} must be within 1..600, got {}",
                field, value
            )));
        }
    }
    if !(1.0..=10.0).contains(&spec.scale_up_limit_factor) {
        return Err(OperatorError::Validation(format!(
            "scaleUpLimitFactor must be within 1.0..10.0, got {}",
            spec.scale_up_limit_factor
        )));
    }
    if !(1..=20).contains(&spec.scale_up_limit_minimum) {
        return Err(OperatorError::Validation(format!(
            "scaleUpLimitMinimum must be within 1..20, got {}",
            spec.scale_up_limit_minimum
        )));
    }
    if spec.tolerance <= 0.0 || spec.tolerance >= 1.0 {
        return Err(OperatorError::Validation(format!(
            "tolerance must be within (0, 1), got {}",
            spec.tolerance
        )));
    }

    Ok(())
}

fn validate_metric(metric: &MetricSpec) -> std::result::Result<(), String> {
    match metric {
        MetricSpec::Object { object } => {
            if object.metric_name.is_empty() {
                return Err("object metric name must not be empty".to_string());
            }
            positive_quantity(&object.target_value).map_err(|e| format!("targetValue: {}", e))?;
            Ok(())
        }
        MetricSpec::Pods { pods } => {
            if pods.metric_name.is_empty() {
                return Err("pods metric name must not be empty".to_string());
            }
            positive_quantity(&pods.target_average_value)
                .map_err(|e| format!("targetAverageValue: {}", e))?;
            Ok(())
        }
        MetricSpec::Resource { resource } => {
            if resource.name.is_empty() {
                return Err("resource name must not be empty".to_string());
            }
            match (
                resource.target_average_utilization,
                &resource.target_average_value,
            ) {
                (None, None) => Err(
                    "neither a utilization target nor a value target was set".to_string(),
                ),
                (Some(pct), _) if !(0..=100).contains(&pct) => Err(format!(
                    "targetAverageUtilization must be within 0..100, got {}",
                    pct
                )),
                (_, Some(value)) => {
                    positive_quantity(value).map_err(|e| format!("targetAverageValue: {}", e))?;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
        MetricSpec::External { external } => {
            if external.metric_name.is_empty() {
                return Err("external metric name must not be empty".to_string());
            }
            match (&external.target_value, &external.target_average_value) {
                (None, None) => Err(
                    "neither a value target nor an average value target was set".to_string(),
                ),
                (Some(_), Some(_)) => Err(
                    "only one of targetValue and targetAverageValue may be set".to_string(),
                ),
                (Some(value), None) => {
                    positive_quantity(value).map_err(|e| format!("targetValue: {}", e))?;
                    Ok(())
                }
                (None, Some(value)) => {
                    positive_quantity(value).map_err(|e| format!("targetAverageValue: {}", e))?;
                    Ok(())
                }
            }
        }
    }
}

/// A quantity target must parse and be strictly positive (targets divide the
/// observed usage).
fn positive_quantity(quantity: &str) -> std::result::Result<i64, String> {
    let milli = parse_quantity_milli(quantity)?;
    if milli == 0 {
        return Err(format!("quantity '{}' must be positive", quantity));
    }
    Ok(milli)
}

/// Parses a Kubernetes quantity string into milli-units.
///
/// Covers the subset the controller needs: plain and decimal numbers, the
/// "m" milli suffix, decimal suffixes k/M/G/T and binary suffixes Ki/Mi/Gi/Ti.
pub fn parse_quantity_milli(quantity: &str) -> std::result::Result<i64, String> {
    let s = quantity.trim();
    if s.is_empty() {
        return Err("empty quantity".to_string());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid quantity '{}'", quantity))?;
    if value < 0.0 {
        return Err(format!("quantity '{}' must not be negative", quantity));
    }

    let multiplier: f64 = match suffix {
        "" => 1000.0,
        "m" => 1.0,
        "k" => 1000.0 * 1e3,
        "M" => 1000.0 * 1e6,
        "G" => 1000.0 * 1e9,
        "T" => 1000.0 * 1e12,
        "Ki" => 1000.0 * 1024.0,
        "Mi" => 1000.0 * 1024.0 * 1024.0,
        "Gi" => 1000.0 * 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1000.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => return Err(format!("unsupported quantity suffix '{}'", other)),
    };

    Ok((value * multiplier).round() as i64)
}

/// Formats a milli-unit value as a quantity string ("2" or "1500m").
pub fn format_quantity_milli(milli: i64) -> String {
    if milli % 1000 == 0 {
        format!("{}", milli / 1000)
    } else {
        format!("{}m", milli)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spec() -> AutoscalerSpec {
        serde_json::from_str(
            r#"{
                "scaleTargetRef": {"kind": "Deployment", "name": "web"},
                "maxReplicas": 10,
                "metrics": [
                    {"type": "Resource", "resource": {"name": "cpu", "targetAverageUtilization": 80}}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec = minimal_spec();
        assert_eq!(spec.scale_target_ref.kind, "Deployment");
        assert_eq!(spec.max_replicas, 10);
        assert_eq!(spec.min_replicas, None);
        assert_eq!(spec.downscale_forbidden_window_seconds, 0);
        assert_eq!(spec.tolerance, 0.0);
    }

    #[test]
    fn test_apply_defaults_fills_zero_fields() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        assert_eq!(spec.downscale_forbidden_window_seconds, 300);
        assert_eq!(spec.upscale_forbidden_window_seconds, 300);
        assert_eq!(spec.scale_up_limit_factor, 2.0);
        assert_eq!(spec.scale_up_limit_minimum, 4);
        assert_eq!(spec.tolerance, 0.1);
    }

    #[test]
    fn test_apply_defaults_preserves_explicit_values() {
        let mut spec = minimal_spec();
        spec.upscale_forbidden_window_seconds = 60;
        spec.tolerance = 0.25;
        apply_defaults(&mut spec);
        assert_eq!(spec.upscale_forbidden_window_seconds, 60);
        assert_eq!(spec.tolerance, 0.25);
        assert_eq!(spec.downscale_forbidden_window_seconds, 300);
    }

    #[test]
    fn test_metric_spec_tagged_parsing() {
        let json = r#"{
            "type": "External",
            "external": {
                "metricName": "queue_depth",
                "metricSelector": {"matchLabels": {"queue": "orders"}},
                "targetAverageValue": "30"
            }
        }"#;
        let metric: MetricSpec = serde_json::from_str(json).unwrap();
        match metric {
            MetricSpec::External { external } => {
                assert_eq!(external.metric_name, "queue_depth");
                assert_eq!(external.target_average_value.as_deref(), Some("30"));
                let selector = external.metric_selector.unwrap();
                assert_eq!(selector.match_labels["queue"], "orders");
            }
            other => panic!("expected external metric, got {:?}", other),
        }
    }

    #[test]
    fn test_metric_spec_unknown_tag_rejected() {
        let json = r#"{"type": "ContainerResource", "resource": {"name": "cpu"}}"#;
        assert!(serde_json::from_str::<MetricSpec>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.scale_target_ref.kind = "StatefulSet".to_string();
        let err = validate(&spec, "Deployment").unwrap_err();
        assert!(err.to_string().contains("StatefulSet"));
    }

    #[test]
    fn test_validate_rejects_empty_metrics() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.metrics.clear();
        let err = validate(&spec, "Deployment").unwrap_err();
        assert!(err.to_string().contains("at least one metric"));
    }

    #[test]
    fn test_validate_rejects_resource_without_target() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.metrics = vec![MetricSpec::Resource {
            resource: ResourceMetricSource {
                name: "cpu".to_string(),
                target_average_utilization: None,
                target_average_value: None,
            },
        }];
        let err = validate(&spec, "Deployment").unwrap_err();
        assert!(err.to_string().contains("metrics[0]"));
        assert!(err.to_string().contains("neither a utilization target"));
    }

    #[test]
    fn test_validate_rejects_zero_quantity_target() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.metrics = vec![MetricSpec::Pods {
            pods: PodsMetricSource {
                metric_name: "rps".to_string(),
                target_average_value: "0".to_string(),
            },
        }];
        let err = validate(&spec, "Deployment").unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_validate_rejects_external_with_both_targets() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.metrics = vec![MetricSpec::External {
            external: ExternalMetricSource {
                metric_name: "qd".to_string(),
                metric_selector: None,
                target_value: Some("10".to_string()),
                target_average_value: Some("2".to_string()),
            },
        }];
        let err = validate(&spec, "Deployment").unwrap_err();
        assert!(err.to_string().contains("only one of"));
    }

    #[test]
    fn test_validate_kind_checked_before_metrics() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.scale_target_ref.kind = "DaemonSet".to_string();
        spec.metrics.clear();
        let err = validate(&spec, "Deployment").unwrap_err();
        assert!(err.to_string().contains("DaemonSet"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_tunables() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.tolerance = 1.5;
        assert!(validate(&spec, "Deployment").is_err());

        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.scale_up_limit_factor = 11.0;
        assert!(validate(&spec, "Deployment").is_err());

        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.downscale_forbidden_window_seconds = 601;
        assert!(validate(&spec, "Deployment").is_err());
    }

    #[test]
    fn test_validate_rejects_max_below_min() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        spec.min_replicas = Some(5);
        spec.max_replicas = 3;
        let err = validate(&spec, "Deployment").unwrap_err();
        assert!(err.to_string().contains("minReplicas"));
    }

    #[test]
    fn test_validate_accepts_defaulted_spec() {
        let mut spec = minimal_spec();
        apply_defaults(&mut spec);
        assert!(validate(&spec, "Deployment").is_ok());
    }

    #[test]
    fn test_parse_quantity_milli() {
        assert_eq!(parse_quantity_milli("1").unwrap(), 1000);
        assert_eq!(parse_quantity_milli("500m").unwrap(), 500);
        assert_eq!(parse_quantity_milli("2.5").unwrap(), 2500);
        assert_eq!(parse_quantity_milli("1k").unwrap(), 1_000_000);
        assert_eq!(parse_quantity_milli("128Mi").unwrap(), 128 * 1024 * 1024 * 1000);
        assert!(parse_quantity_milli("").is_err());
        assert!(parse_quantity_milli("10x").is_err());
        assert!(parse_quantity_milli("-1").is_err());
    }

    #[test]
    fn test_format_quantity_milli() {
        assert_eq!(format_quantity_milli(2000), "2");
        assert_eq!(format_quantity_milli(1500), "1500m");
        assert_eq!(format_quantity_milli(0), "0");
    }

    #[test]
    fn test_status_roundtrip_camel_case() {
        let status = AutoscalerStatus {
            observed_generation: Some(3),
            last_scale_time: Some("2024-05-01T12:00:00Z".to_string()),
            current_replicas: 4,
            desired_replicas: 6,
            current_metrics: vec![MetricStatus::Resource {
                resource: ResourceMetricStatus {
                    name: "cpu".to_string(),
                    current_average_utilization: Some(52),
                    current_average_value: "260m".to_string(),
                },
            }],
            conditions: Vec::new(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["desiredReplicas"], 6);
        assert_eq!(json["currentMetrics"][0]["type"], "Resource");
        assert_eq!(
            json["currentMetrics"][0]["resource"]["currentAverageUtilization"],
            52
        );
        let back: AutoscalerStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
