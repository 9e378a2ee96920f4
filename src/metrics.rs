//! Metric retrieval for the replica calculator
//!
//! [`MetricsProvider`] is the port the calculator consumes: per-pod samples
//! for resource and raw metrics, a single value for object metrics, and a
//! list of values for external metrics. All values are milli-units; the
//! returned timestamps are sample times from the metrics payload, not fetch
//! times.
//!
//! [`ClusterMetricsProvider`] implements the port against the aggregated
//! metrics APIs (metrics.k8s.io, custom.metrics.k8s.io,
//! external.metrics.k8s.io) with raw API requests, since those groups ship no
//! typed client.

use crate::crd::parse_quantity_milli;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Mapping from pod name to a milli-unit sample
pub type PodMetrics = BTreeMap<String, i64>;

/// Port over the cluster's metric endpoints
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Per-pod usage of a resource (cpu/memory), summed over containers
    async fn resource_metric(
        &self,
        resource: &str,
        namespace: &str,
        selector: &str,
    ) -> Result<(PodMetrics, DateTime<Utc>)>;

    /// Per-pod samples of an arbitrary pods metric
    async fn raw_metric(
        &self,
        metric_name: &str,
        namespace: &str,
        selector: &str,
    ) -> Result<(PodMetrics, DateTime<Utc>)>;

    /// Single sample describing one named object
    async fn object_metric(
        &self,
        metric_name: &str,
        namespace: &str,
        target_kind: &str,
        target_name: &str,
    ) -> Result<(i64, DateTime<Utc>)>;

    /// Samples of a cluster-external metric, one per matching series
    async fn external_metric(
        &self,
        metric_name: &str,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<(Vec<i64>, DateTime<Utc>)>;
}

/// Aggregated usage ratio for resource metrics.
///
/// Returns `(usage_ratio, utilization_pct, raw_average_milli)` where the
/// ratio is sum(usage)·100 / sum(request) compared against the target
/// percentage. Pods present in the metrics map but absent from the requests
/// map are ignored; an empty intersection is an error.
pub fn resource_utilization_ratio(
    metrics: &PodMetrics,
    requests: &BTreeMap<String, i64>,
    target_utilization_pct: i32,
) -> Result<(f64, i32, i64)> {
    let mut metrics_total: i64 = 0;
    let mut requests_total: i64 = 0;
    let mut entries: i64 = 0;

    for (pod, value) in metrics {
        let Some(request) = requests.get(pod) else {
            continue;
        };
        metrics_total += value;
        requests_total += request;
        entries += 1;
    }

    if requests_total == 0 {
        return Err(OperatorError::Metrics(
            "no metrics returned matched known pods".to_string(),
        ));
    }

    let utilization_pct = ((metrics_total * 100) / requests_total) as i32;
    let ratio = f64::from(utilization_pct) / f64::from(target_utilization_pct);
    Ok((ratio, utilization_pct, metrics_total / entries))
}

/// Aggregated usage ratio for plain per-pod metrics: mean(usage) / target.
///
/// Returns `(usage_ratio, average_milli)`.
pub fn metric_utilization_ratio(metrics: &PodMetrics, target_milli: i64) -> (f64, i64) {
    let total: i64 = metrics.values().sum();
    let average = total / metrics.len() as i64;
    (average as f64 / target_milli as f64, average)
}

/// Metrics provider backed by the cluster's aggregated metrics APIs
pub struct ClusterMetricsProvider {
    client: Client,
}

impl ClusterMetricsProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_json(&self, path: String) -> Result<Value> {
        debug!(path = %path, "Querying metrics API");
        let request = http::Request::builder()
            .uri(path)
            .body(Vec::new())
            .map_err(|e| OperatorError::Metrics(e.to_string()))?;
        self.client
            .request::<Value>(request)
            .await
            .map_err(|e| OperatorError::Metrics(e.to_string()))
    }
}

#[async_trait]
impl MetricsProvider for ClusterMetricsProvider {
    async fn resource_metric(
        &self,
        resource: &str,
        namespace: &str,
        selector: &str,
    ) -> Result<(PodMetrics, DateTime<Utc>)> {
        let path = format!(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods?labelSelector={}",
            namespace,
            encode_query_value(selector)
        );
        parse_pod_metrics_list(self.get_json(path).await?, resource)
    }

    async fn raw_metric(
        &self,
        metric_name: &str,
        namespace: &str,
        selector: &str,
    ) -> Result<(PodMetrics, DateTime<Utc>)> {
        let path = format!(
            "/apis/custom.metrics.k8s.io/v1beta1/namespaces/{}/pods/*/{}?labelSelector={}",
            namespace,
            metric_name,
            encode_query_value(selector)
        );
        parse_custom_metrics_list(self.get_json(path).await?, metric_name)
    }

    async fn object_metric(
        &self,
        metric_name: &str,
        namespace: &str,
        target_kind: &str,
        target_name: &str,
    ) -> Result<(i64, DateTime<Utc>)> {
        let path = format!(
            "/apis/custom.metrics.k8s.io/v1beta1/namespaces/{}/{}/{}/{}",
            namespace,
            naive_plural(target_kind),
            target_name,
            metric_name
        );
        let (metrics, timestamp) = parse_custom_metrics_list(self.get_json(path).await?, metric_name)?;
        let value = metrics.values().next().copied().ok_or_else(|| {
            OperatorError::Metrics(format!(
                "no value returned for object metric {}",
                metric_name
            ))
        })?;
        Ok((value, timestamp))
    }

    async fn external_metric(
        &self,
        metric_name: &str,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<(Vec<i64>, DateTime<Utc>)> {
        let mut path = format!(
            "/apis/external.metrics.k8s.io/v1beta1/namespaces/{}/{}",
            namespace, metric_name
        );
        if let Some(selector) = selector {
            path.push_str("?labelSelector=");
            path.push_str(&encode_query_value(selector));
        }
        parse_external_metrics_list(self.get_json(path).await?, metric_name)
    }
}

/// Parses a metrics.k8s.io PodMetricsList, summing container usage of the
/// given resource per pod.
fn parse_pod_metrics_list(list: Value, resource: &str) -> Result<(PodMetrics, DateTime<Utc>)> {
    let items = list["items"].as_array().cloned().unwrap_or_default();
    if items.is_empty() {
        return Err(OperatorError::Metrics(format!(
            "no metrics returned from resource metrics API for {}",
            resource
        )));
    }

    let timestamp = item_timestamp(&items[0]);
    let mut metrics = PodMetrics::new();
    for item in &items {
        let Some(name) = item["metadata"]["name"].as_str() else {
            continue;
        };
        let mut pod_sum: i64 = 0;
        for container in item["containers"].as_array().into_iter().flatten() {
            if let Some(usage) = container["usage"][resource].as_str() {
                pod_sum += parse_quantity_milli(usage).map_err(OperatorError::Metrics)?;
            }
        }
        metrics.insert(name.to_string(), pod_sum);
    }

    Ok((metrics, timestamp))
}

/// Parses a custom.metrics.k8s.io MetricValueList into described-object name
/// to milli-value.
fn parse_custom_metrics_list(list: Value, metric_name: &str) -> Result<(PodMetrics, DateTime<Utc>)> {
    let items = list["items"].as_array().cloned().unwrap_or_default();
    if items.is_empty() {
        return Err(OperatorError::Metrics(format!(
            "no metrics returned from custom metrics API for {}",
            metric_name
        )));
    }

    let timestamp = item_timestamp(&items[0]);
    let mut metrics = PodMetrics::new();
    for item in &items {
        let Some(name) = item["describedObject"]["name"].as_str() else {
            continue;
        };
        let Some(value) = item["value"].as_str() else {
            continue;
        };
        metrics.insert(
            name.to_string(),
            parse_quantity_milli(value).map_err(OperatorError::Metrics)?,
        );
    }

    Ok((metrics, timestamp))
}

/// Parses an external.metrics.k8s.io ExternalMetricValueList into a value per
/// matching series.
fn parse_external_metrics_list(
    list: Value,
    metric_name: &str,
) -> Result<(Vec<i64>, DateTime<Utc>)> {
    let items = list["items"].as_array().cloned().unwrap_or_default();
    if items.is_empty() {
        return Err(OperatorError::Metrics(format!(
            "no metrics returned from external metrics API for {}",
            metric_name
        )));
    }

    let timestamp = item_timestamp(&items[0]);
    let mut values = Vec::with_capacity(items.len());
    for item in &items {
        if let Some(value) = item["value"].as_str() {
            values.push(parse_quantity_milli(value).map_err(OperatorError::Metrics)?);
        }
    }

    Ok((values, timestamp))
}

fn item_timestamp(item: &Value) -> DateTime<Utc> {
    item["timestamp"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Percent-encodes a query parameter value (selectors contain `=`, `,`, and
/// spaces).
fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn naive_plural(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') {
        format!("{}es", lower)
    } else {
        format!("{}s", lower)
    }
}
