//! Replica calculation from observed metrics
//!
//! Turns metric samples into a proposed replica count. The pod-based paths
//! carry the unready/missing bookkeeping: pods that are not running and ready
//! are dropped from the sample map, ready pods without a sample are tracked,
//! and both groups get conservative placeholder values before the final
//! estimate so a burst of pending pods can't stampede the scale in either
//! direction.
//!
//! All aggregation happens in milli-units; ratios are floating point and the
//! replica count is always the ceiling, never a rounding.

use crate::error::{OperatorError, Result};
use crate::metrics::{
    metric_utilization_ratio, resource_utilization_ratio, MetricsProvider, PodMetrics,
};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::{BTreeMap, BTreeSet};

/// Proposal from a value-based metric
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaProposal {
    pub replicas: i32,
    /// Observed aggregate in milli-units (average or total, per operation)
    pub utilization_milli: i64,
    pub timestamp: DateTime<Utc>,
}

/// Proposal from a resource utilization metric
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReplicaProposal {
    pub replicas: i32,
    /// Observed utilization as a percentage of summed requests
    pub utilization_pct: i32,
    /// Observed per-pod average in milli-units
    pub raw_average_milli: i64,
    pub timestamp: DateTime<Utc>,
}

/// Computes desired replica counts from metrics and pod state
pub struct ReplicaCalculator<M> {
    metrics: M,
    client: Client,
}

impl<M: MetricsProvider> ReplicaCalculator<M> {
    pub fn new(metrics: M, client: Client) -> Self {
        Self { metrics, client }
    }

    /// Desired replicas from a target resource utilization percentage.
    pub async fn get_resource_replicas(
        &self,
        current_replicas: i32,
        target_utilization_pct: i32,
        resource: &str,
        namespace: &str,
        selector: &str,
        tolerance: f64,
    ) -> Result<ResourceReplicaProposal> {
        let (mut metrics, timestamp) = self
            .metrics
            .resource_metric(resource, namespace, selector)
            .await
            .map_err(|e| {
                OperatorError::Metrics(format!(
                    "unable to get metrics for resource {}: {}",
                    resource, e
                ))
            })?;

        let pods = self.list_pods(namespace, selector).await?;
        let samples = summarize_pods(&pods, Some(resource), namespace)?;

        let (replicas, utilization_pct, raw_average_milli) = calc_resource_replicas(
            &mut metrics,
            &samples,
            current_replicas,
            target_utilization_pct,
            tolerance,
        )?;

        Ok(ResourceReplicaProposal {
            replicas,
            utilization_pct,
            raw_average_milli,
            timestamp,
        })
    }

    /// Desired replicas from a target per-pod average resource value.
    pub async fn get_raw_resource_replicas(
        &self,
        current_replicas: i32,
        target_average_milli: i64,
        resource: &str,
        namespace: &str,
        selector: &str,
        tolerance: f64,
    ) -> Result<ReplicaProposal> {
        let (mut metrics, timestamp) = self
            .metrics
            .resource_metric(resource, namespace, selector)
            .await
            .map_err(|e| {
                OperatorError::Metrics(format!(
                    "unable to get metrics for resource {}: {}",
                    resource, e
                ))
            })?;

        let pods = self.list_pods(namespace, selector).await?;
        let samples = summarize_pods(&pods, None, namespace)?;

        let (replicas, utilization_milli) = calc_plain_metric_replicas(
            &mut metrics,
            &samples,
            current_replicas,
            target_average_milli,
            tolerance,
        )?;

        Ok(ReplicaProposal {
            replicas,
            utilization_milli,
            timestamp,
        })
    }

    /// Desired replicas from a target per-pod average of a custom pods metric.
    pub async fn get_metric_replicas(
        &self,
        current_replicas: i32,
        target_average_milli: i64,
        metric_name: &str,
        namespace: &str,
        selector: &str,
        tolerance: f64,
    ) -> Result<ReplicaProposal> {
        let (mut metrics, timestamp) = self
            .metrics
            .raw_metric(metric_name, namespace, selector)
            .await
            .map_err(|e| {
                OperatorError::Metrics(format!("unable to get metric {}: {}", metric_name, e))
            })?;

        let pods = self.list_pods(namespace, selector).await?;
        let samples = summarize_pods(&pods, None, namespace)?;

        let (replicas, utilization_milli) = calc_plain_metric_replicas(
            &mut metrics,
            &samples,
            current_replicas,
            target_average_milli,
            tolerance,
        )?;

        Ok(ReplicaProposal {
            replicas,
            utilization_milli,
            timestamp,
        })
    }

    /// Desired replicas from a metric describing a single object.
    pub async fn get_object_metric_replicas(
        &self,
        current_replicas: i32,
        target_milli: i64,
        metric_name: &str,
        namespace: &str,
        target_kind: &str,
        target_name: &str,
        tolerance: f64,
    ) -> Result<ReplicaProposal> {
        let (value, timestamp) = self
            .metrics
            .object_metric(metric_name, namespace, target_kind, target_name)
            .await
            .map_err(|e| {
                OperatorError::Metrics(format!(
                    "unable to get object metric {}: {}",
                    metric_name, e
                ))
            })?;

        let replicas = single_value_replicas(current_replicas, value, target_milli, tolerance);
        Ok(ReplicaProposal {
            replicas,
            utilization_milli: value,
            timestamp,
        })
    }

    /// Desired replicas from the total of an external metric.
    pub async fn get_external_metric_replicas(
        &self,
        current_replicas: i32,
        target_milli: i64,
        metric_name: &str,
        namespace: &str,
        selector: Option<&str>,
        tolerance: f64,
    ) -> Result<ReplicaProposal> {
        let (values, timestamp) = self
            .metrics
            .external_metric(metric_name, namespace, selector)
            .await
            .map_err(|e| {
                OperatorError::Metrics(format!(
                    "unable to get external metric {}: {}",
                    metric_name, e
                ))
            })?;

        let total: i64 = values.iter().sum();
        let replicas = single_value_replicas(current_replicas, total, target_milli, tolerance);
        Ok(ReplicaProposal {
            replicas,
            utilization_milli: total,
            timestamp,
        })
    }

    /// Desired replicas from an external metric divided across replicas.
    pub async fn get_external_per_pod_metric_replicas(
        &self,
        current_replicas: i32,
        target_average_milli: i64,
        metric_name: &str,
        namespace: &str,
        selector: Option<&str>,
        tolerance: f64,
    ) -> Result<ReplicaProposal> {
        let (values, timestamp) = self
            .metrics
            .external_metric(metric_name, namespace, selector)
            .await
            .map_err(|e| {
                OperatorError::Metrics(format!(
                    "unable to get external metric {}: {}",
                    metric_name, e
                ))
            })?;

        let total: i64 = values.iter().sum();
        let (replicas, utilization_milli) =
            per_pod_value_replicas(current_replicas, total, target_average_milli, tolerance);
        Ok(ReplicaProposal {
            replicas,
            utilization_milli,
            timestamp,
        })
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| {
                OperatorError::KubeApi(format!(
                    "unable to get pods while calculating replica count: {}",
                    e
                ))
            })?;

        if list.items.is_empty() {
            return Err(OperatorError::Metrics(
                "no pods returned by selector while calculating replica count".to_string(),
            ));
        }
        Ok(list.items)
    }
}

/// Readiness and request view of one pod
#[derive(Debug, Clone)]
struct PodSample {
    name: String,
    running: bool,
    ready: bool,
    /// Summed container requests for the tracked resource, when one is tracked
    request_milli: Option<i64>,
}

/// Extracts the readiness snapshot the calculator needs from listed pods.
///
/// When a resource is tracked, every container must carry a request for it;
/// a missing request is an error rather than a silent zero.
fn summarize_pods(pods: &[Pod], resource: Option<&str>, namespace: &str) -> Result<Vec<PodSample>> {
    let mut samples = Vec::with_capacity(pods.len());

    for pod in pods {
        let name = pod.metadata.name.clone().unwrap_or_default();

        let request_milli = match resource {
            Some(resource) => {
                let mut pod_sum: i64 = 0;
                let containers = pod
                    .spec
                    .as_ref()
                    .map(|s| s.containers.as_slice())
                    .unwrap_or_default();
                for container in containers {
                    let request = container
                        .resources
                        .as_ref()
                        .and_then(|r| r.requests.as_ref())
                        .and_then(|r| r.get(resource));
                    match request {
                        Some(quantity) => {
                            pod_sum += crate::crd::parse_quantity_milli(&quantity.0)
                                .map_err(OperatorError::Metrics)?;
                        }
                        None => {
                            return Err(OperatorError::Metrics(format!(
                                "missing request for {} on container {} in pod {}/{}",
                                resource, container.name, namespace, name
                            )));
                        }
                    }
                }
                Some(pod_sum)
            }
            None => None,
        };

        let running = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(|p| p == "Running")
            .unwrap_or(false);
        let ready = pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false);

        samples.push(PodSample {
            name,
            running,
            ready,
            request_milli,
        });
    }

    Ok(samples)
}

/// Resource-utilization replica estimate with unready/missing rebalancing.
///
/// Returns `(replicas, utilization_pct, raw_average_milli)`.
fn calc_resource_replicas(
    metrics: &mut PodMetrics,
    samples: &[PodSample],
    current_replicas: i32,
    target_utilization_pct: i32,
    tolerance: f64,
) -> Result<(i32, i32, i64)> {
    let mut requests: BTreeMap<String, i64> = BTreeMap::new();
    let mut ready_count: i32 = 0;
    let mut unready: BTreeSet<String> = BTreeSet::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();

    for sample in samples {
        requests.insert(sample.name.clone(), sample.request_milli.unwrap_or(0));

        if !sample.running || !sample.ready {
            unready.insert(sample.name.clone());
            metrics.remove(&sample.name);
            continue;
        }
        if !metrics.contains_key(&sample.name) {
            missing.insert(sample.name.clone());
            continue;
        }
        ready_count += 1;
    }

    if metrics.is_empty() {
        return Err(OperatorError::Metrics(
            "did not receive metrics for any ready pods".to_string(),
        ));
    }

    let (usage_ratio, utilization_pct, raw_average_milli) =
        resource_utilization_ratio(metrics, &requests, target_utilization_pct)?;

    let rebalance_unready = !unready.is_empty() && usage_ratio > 1.0;
    if !rebalance_unready && missing.is_empty() {
        if (1.0 - usage_ratio).abs() <= tolerance {
            // change would be too small
            return Ok((current_replicas, utilization_pct, raw_average_milli));
        }
        let replicas = (usage_ratio * f64::from(ready_count)).ceil() as i32;
        return Ok((replicas, utilization_pct, raw_average_milli));
    }

    if usage_ratio < 1.0 {
        // on a scale-down, treat missing pods as using 100% of their request
        for pod in &missing {
            metrics.insert(pod.clone(), requests[pod]);
        }
    } else if usage_ratio > 1.0 {
        // on a scale-up, treat missing pods as using nothing
        for pod in &missing {
            metrics.insert(pod.clone(), 0);
        }
    }

    if rebalance_unready {
        for pod in &unready {
            metrics.insert(pod.clone(), 0);
        }
    }

    let (new_usage_ratio, _, _) =
        resource_utilization_ratio(metrics, &requests, target_utilization_pct)?;

    if (1.0 - new_usage_ratio).abs() <= tolerance
        || (usage_ratio < 1.0 && new_usage_ratio > 1.0)
        || (usage_ratio > 1.0 && new_usage_ratio < 1.0)
    {
        // the change would be too small, or the placeholder values flipped
        // the scale direction
        return Ok((current_replicas, utilization_pct, raw_average_milli));
    }

    let replicas = (new_usage_ratio * metrics.len() as f64).ceil() as i32;
    Ok((replicas, utilization_pct, raw_average_milli))
}

/// Plain per-pod metric estimate with unready/missing rebalancing.
///
/// Returns `(replicas, average_milli)`.
fn calc_plain_metric_replicas(
    metrics: &mut PodMetrics,
    samples: &[PodSample],
    current_replicas: i32,
    target_average_milli: i64,
    tolerance: f64,
) -> Result<(i32, i64)> {
    let mut ready_count: i32 = 0;
    let mut unready: BTreeSet<String> = BTreeSet::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();

    for sample in samples {
        if !sample.running || !sample.ready {
            unready.insert(sample.name.clone());
            metrics.remove(&sample.name);
            continue;
        }
        if !metrics.contains_key(&sample.name) {
            missing.insert(sample.name.clone());
            continue;
        }
        ready_count += 1;
    }

    if metrics.is_empty() {
        return Err(OperatorError::Metrics(
            "did not receive metrics for any ready pods".to_string(),
        ));
    }

    let (usage_ratio, average_milli) = metric_utilization_ratio(metrics, target_average_milli);

    let rebalance_unready = !unready.is_empty() && usage_ratio > 1.0;
    if !rebalance_unready && missing.is_empty() {
        if (1.0 - usage_ratio).abs() <= tolerance {
            return Ok((current_replicas, average_milli));
        }
        let replicas = (usage_ratio * f64::from(ready_count)).ceil() as i32;
        return Ok((replicas, average_milli));
    }

    for pod in &missing {
        // scale-down: pretend the pod runs at target; scale-up: at zero
        let placeholder = if usage_ratio < 1.0 {
            target_average_milli
        } else {
            0
        };
        metrics.insert(pod.clone(), placeholder);
    }

    if rebalance_unready {
        for pod in &unready {
            metrics.insert(pod.clone(), 0);
        }
    }

    let (new_usage_ratio, _) = metric_utilization_ratio(metrics, target_average_milli);

    if (1.0 - new_usage_ratio).abs() <= tolerance
        || (usage_ratio < 1.0 && new_usage_ratio > 1.0)
        || (usage_ratio > 1.0 && new_usage_ratio < 1.0)
    {
        return Ok((current_replicas, average_milli));
    }

    let replicas = (new_usage_ratio * metrics.len() as f64).ceil() as i32;
    Ok((replicas, average_milli))
}

/// Estimate for metrics that yield one value for the whole workload.
fn single_value_replicas(
    current_replicas: i32,
    value_milli: i64,
    target_milli: i64,
    tolerance: f64,
) -> i32 {
    let usage_ratio = value_milli as f64 / target_milli as f64;
    if (1.0 - usage_ratio).abs() <= tolerance {
        return current_replicas;
    }
    (usage_ratio * f64::from(current_replicas)).ceil() as i32
}

/// Estimate for external metrics averaged over the current replicas.
///
/// Returns `(replicas, per_replica_average_milli)`.
fn per_pod_value_replicas(
    current_replicas: i32,
    total_milli: i64,
    target_average_milli: i64,
    tolerance: f64,
) -> (i32, i64) {
    let usage_ratio =
        total_milli as f64 / (target_average_milli as f64 * f64::from(current_replicas));
    let replicas = if (1.0 - usage_ratio).abs() > tolerance {
        (total_milli as f64 / target_average_milli as f64).ceil() as i32
    } else {
        current_replicas
    };
    let average = (total_milli as f64 / f64::from(current_replicas)).ceil() as i64;
    (replicas, average)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, running: bool, ready: bool, request: Option<i64>) -> PodSample {
        PodSample {
            name: name.to_string(),
            running,
            ready,
            request_milli: request,
        }
    }

    fn metrics_of(pairs: &[(&str, i64)]) -> PodMetrics {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[test]
    fn test_resource_within_tolerance_keeps_current() {
        // 4 ready pods at 52% of a 50% target: ratio 1.04, inside the 0.1 band
        let mut metrics = metrics_of(&[("a", 260), ("b", 260), ("c", 260), ("d", 260)]);
        let samples = vec![
            sample("a", true, true, Some(500)),
            sample("b", true, true, Some(500)),
            sample("c", true, true, Some(500)),
            sample("d", true, true, Some(500)),
        ];
        let (replicas, utilization, raw) =
            calc_resource_replicas(&mut metrics, &samples, 4, 50, 0.1).unwrap();
        assert_eq!(replicas, 4);
        assert_eq!(utilization, 52);
        assert_eq!(raw, 260);
    }

    #[test]
    fn test_resource_scale_up_outside_tolerance() {
        // 100% usage against a 50% target: ratio 2.0 -> double the ready count
        let mut metrics = metrics_of(&[("a", 500), ("b", 500)]);
        let samples = vec![
            sample("a", true, true, Some(500)),
            sample("b", true, true, Some(500)),
        ];
        let (replicas, _, _) = calc_resource_replicas(&mut metrics, &samples, 2, 50, 0.1).unwrap();
        assert_eq!(replicas, 4);
    }

    #[test]
    fn test_resource_missing_pod_dampens_scale_down() {
        // Two pods at 20% of request, one ready pod without a sample.
        // The missing pod is assumed to run at 100% of its request, which
        // pulls the corrected ratio to 46/50 = 0.92 -- inside the tolerance
        // band, so the count is kept instead of shrinking.
        let mut metrics = metrics_of(&[("a", 100), ("b", 100)]);
        let samples = vec![
            sample("a", true, true, Some(500)),
            sample("b", true, true, Some(500)),
            sample("c", true, true, Some(500)),
        ];
        let (replicas, _, _) = calc_resource_replicas(&mut metrics, &samples, 3, 50, 0.1).unwrap();
        assert_eq!(replicas, 3);
    }

    #[test]
    fn test_resource_missing_pod_scale_down_proceeds_when_still_low() {
        // Even with the missing pod counted at 100% of its request the ratio
        // stays low (36% of an 80% target), so the calculator still shrinks:
        // ceil(0.45 * 3) = 2.
        let mut metrics = metrics_of(&[("a", 25), ("b", 25)]);
        let samples = vec![
            sample("a", true, true, Some(500)),
            sample("b", true, true, Some(500)),
            sample("c", true, true, Some(500)),
        ];
        let (replicas, _, _) = calc_resource_replicas(&mut metrics, &samples, 3, 80, 0.1).unwrap();
        assert_eq!(replicas, 2);
    }

    #[test]
    fn test_resource_missing_pod_sign_flip_keeps_current() {
        // Ratio just below one; counting the missing pod at 100% of its
        // request flips the corrected ratio above one. A flipped direction
        // means the placeholder dominated the estimate, so keep the count.
        let mut metrics = metrics_of(&[("a", 240), ("b", 240)]);
        let samples = vec![
            sample("a", true, true, Some(500)),
            sample("b", true, true, Some(500)),
            sample("c", true, true, Some(500)),
        ];
        // before: 48/50 = 0.96; after filling c: 65/50 = 1.30
        let (replicas, _, _) =
            calc_resource_replicas(&mut metrics, &samples, 3, 50, 0.01).unwrap();
        assert_eq!(replicas, 3);
    }

    #[test]
    fn test_plain_missing_pod_scale_down() {
        // Mean 200m against a 1000m target: ratio 0.2. Missing pod filled
        // with the target value; new mean (200+200+1000)/3 = 466m, ratio
        // 0.466, still below one -> ceil(0.466*3) = 2.
        let mut metrics = metrics_of(&[("a", 200), ("b", 200)]);
        let samples = vec![
            sample("a", true, true, None),
            sample("b", true, true, None),
            sample("c", true, true, None),
        ];
        let (replicas, average) =
            calc_plain_metric_replicas(&mut metrics, &samples, 3, 1000, 0.1).unwrap();
        assert_eq!(replicas, 2);
        assert_eq!(average, 200);
    }

    #[test]
    fn test_plain_missing_pod_correction_keeps_current() {
        // Mean 885m against a 1000m target: ratio 0.885. The target-valued
        // placeholder lifts the mean to 923m; ceil(0.923 * 3) lands back on
        // the current count, so nothing changes.
        let mut metrics = metrics_of(&[("a", 890), ("b", 880)]);
        let samples = vec![
            sample("a", true, true, None),
            sample("b", true, true, None),
            sample("c", true, true, None),
        ];
        let (replicas, _) =
            calc_plain_metric_replicas(&mut metrics, &samples, 3, 1000, 0.05).unwrap();
        assert_eq!(replicas, 3);
    }

    #[test]
    fn test_plain_unready_rebalance_cancels_upscale() {
        // Two ready pods at 2x target, two unready. Rebalance inserts zeros
        // for the unready pods and the corrected ratio lands exactly on 1.
        let mut metrics = metrics_of(&[("a", 2000), ("b", 2000), ("c", 1500), ("d", 1500)]);
        let samples = vec![
            sample("a", true, true, None),
            sample("b", true, true, None),
            sample("c", false, false, None),
            sample("d", true, false, None),
        ];
        let (replicas, _) =
            calc_plain_metric_replicas(&mut metrics, &samples, 4, 1000, 0.1).unwrap();
        assert_eq!(replicas, 4);
    }

    #[test]
    fn test_plain_unready_ignored_on_scale_down() {
        // Unready pods are dropped but not zero-filled when the ratio is
        // below one; only the ready pods drive the estimate.
        let mut metrics = metrics_of(&[("a", 400), ("b", 400), ("c", 9000)]);
        let samples = vec![
            sample("a", true, true, None),
            sample("b", true, true, None),
            sample("c", false, false, None),
        ];
        let (replicas, average) =
            calc_plain_metric_replicas(&mut metrics, &samples, 3, 1000, 0.1).unwrap();
        // mean of ready = 400 -> ratio 0.4 -> ceil(0.4*2) = 1
        assert_eq!(replicas, 1);
        assert_eq!(average, 400);
    }

    #[test]
    fn test_no_metrics_for_ready_pods_is_error() {
        let mut metrics = metrics_of(&[("a", 500)]);
        let samples = vec![sample("a", false, false, None), sample("b", true, true, None)];
        let err = calc_plain_metric_replicas(&mut metrics, &samples, 2, 1000, 0.1).unwrap_err();
        assert!(err.to_string().contains("ready pods"));
    }

    #[test]
    fn test_summarize_pods_missing_request_is_error() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "web-0"},
            "spec": {
                "containers": [
                    {"name": "app", "resources": {"requests": {"cpu": "500m"}}},
                    {"name": "sidecar", "resources": {}}
                ]
            },
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
        }))
        .unwrap();

        let err = summarize_pods(&[pod], Some("cpu"), "default").unwrap_err();
        assert!(err.to_string().contains("missing request for cpu"));
    }

    #[test]
    fn test_summarize_pods_readiness() {
        let pods: Vec<Pod> = serde_json::from_value(serde_json::json!([
            {
                "metadata": {"name": "ready-0"},
                "spec": {"containers": []},
                "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
            },
            {
                "metadata": {"name": "pending-0"},
                "spec": {"containers": []},
                "status": {"phase": "Pending", "conditions": [{"type": "Ready", "status": "False"}]}
            }
        ]))
        .unwrap();

        let samples = summarize_pods(&pods, None, "default").unwrap();
        assert!(samples[0].running && samples[0].ready);
        assert!(!samples[1].running);
    }

    #[test]
    fn test_single_value_replicas() {
        // within tolerance
        assert_eq!(single_value_replicas(5, 10_400, 10_000, 0.1), 5);
        // double the target
        assert_eq!(single_value_replicas(5, 20_000, 10_000, 0.1), 10);
        // well below the target
        assert_eq!(single_value_replicas(5, 4_000, 10_000, 0.1), 2);
    }

    #[test]
    fn test_per_pod_value_replicas() {
        // total 100 across 5 replicas against a per-replica target of 10
        let (replicas, average) = per_pod_value_replicas(5, 100_000, 10_000, 0.1);
        assert_eq!(replicas, 10);
        assert_eq!(average, 20_000);

        // already balanced
        let (replicas, _) = per_pod_value_replicas(5, 50_000, 10_000, 0.1);
        assert_eq!(replicas, 5);
    }
}
