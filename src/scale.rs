//! Workload scale access
//!
//! [`ScaleTarget`] is the port the controller uses to read and write the
//! replica count of the workload an autoscaler points at. Only Deployments
//! ship today, but the target kind stays data: lookups go through a
//! [`ScaleTargetRegistry`] keyed by kind so further kinds slot in without
//! touching the reconcile loop.

use crate::crd::MetricSelector;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Point-in-time view of a workload's scale
#[derive(Debug, Clone, Default)]
pub struct ScaleSnapshot {
    /// Replicas the workload currently runs (status)
    pub current_replicas: i32,
    /// Replicas the workload asks for (spec); 0 means autoscaling is disabled
    pub replicas_intent: i32,
    /// Selector matching the workload's pods
    pub selector: Option<LabelSelector>,
}

/// Port for reading and writing a workload's replica count
#[async_trait]
pub trait ScaleTarget: Send + Sync {
    /// The workload kind this target handles
    fn kind(&self) -> &'static str;

    /// Reads the current scale of the named workload
    async fn get_scale(&self, namespace: &str, name: &str) -> Result<ScaleSnapshot>;

    /// Writes a new replica count; no-ops when the intent already matches
    async fn set_scale(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    /// Marks the autoscaler as the workload's controller owner
    async fn set_owner(&self, namespace: &str, name: &str, owner: &OwnerReference) -> Result<()>;
}

/// Routes scale operations by target kind
pub struct ScaleTargetRegistry {
    targets: BTreeMap<String, Arc<dyn ScaleTarget>>,
}

impl ScaleTargetRegistry {
    pub fn new() -> Self {
        Self {
            targets: BTreeMap::new(),
        }
    }

    /// Registry with the built-in Deployment target
    pub fn with_defaults(client: Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DeploymentScaleTarget::new(client)));
        registry
    }

    pub fn register(&mut self, target: Arc<dyn ScaleTarget>) {
        self.targets.insert(target.kind().to_string(), target);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn ScaleTarget>> {
        self.targets.get(kind).cloned().ok_or_else(|| {
            OperatorError::Validation(format!("no scale target registered for kind '{}'", kind))
        })
    }
}

impl Default for ScaleTargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scale access for apps/v1 Deployments
pub struct DeploymentScaleTarget {
    client: Client,
}

impl DeploymentScaleTarget {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ScaleTarget for DeploymentScaleTarget {
    fn kind(&self) -> &'static str {
        "Deployment"
    }

    async fn get_scale(&self, namespace: &str, name: &str) -> Result<ScaleSnapshot> {
        let deploy = self.api(namespace).get(name).await?;
        Ok(snapshot_from_deployment(&deploy))
    }

    async fn set_scale(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api = self.api(namespace);
        let deploy = api.get(name).await?;
        if deploy.spec.as_ref().and_then(|s| s.replicas) == Some(replicas) {
            debug!(
                deployment = %name,
                replicas,
                "Scale already at the requested replica count"
            );
            return Ok(());
        }

        let patch = serde_json::json!({
            "spec": {
                "replicas": replicas
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(deployment = %name, namespace = %namespace, replicas, "Updated scale");
        Ok(())
    }

    async fn set_owner(&self, namespace: &str, name: &str, owner: &OwnerReference) -> Result<()> {
        let api = self.api(namespace);
        let deploy = api.get(name).await?;

        let mut refs = deploy
            .metadata
            .owner_references
            .clone()
            .unwrap_or_default();
        if refs.iter().any(|r| r.uid == owner.uid) {
            return Ok(());
        }
        refs.push(owner.clone());

        let patch = serde_json::json!({
            "metadata": {
                "ownerReferences": refs
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

fn snapshot_from_deployment(deploy: &Deployment) -> ScaleSnapshot {
    ScaleSnapshot {
        current_replicas: deploy.status.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        replicas_intent: deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        selector: deploy.spec.as_ref().map(|s| s.selector.clone()),
    }
}

/// Converts a pod label selector into the query string the list and metrics
/// endpoints expect.
pub fn selector_query(selector: &LabelSelector) -> Result<String> {
    let mut parts = Vec::new();

    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            parts.push(format!("{}={}", key, value));
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let values = expr.values.clone().unwrap_or_default();
            parts.push(requirement_query(&expr.key, &expr.operator, &values)?);
        }
    }

    Ok(parts.join(","))
}

/// Converts a metric selector from the CRD into a query string.
pub fn metric_selector_query(selector: &MetricSelector) -> Result<String> {
    let mut parts = Vec::new();

    for (key, value) in &selector.match_labels {
        parts.push(format!("{}={}", key, value));
    }
    for expr in &selector.match_expressions {
        parts.push(requirement_query(&expr.key, &expr.operator, &expr.values)?);
    }

    Ok(parts.join(","))
}

fn requirement_query(key: &str, operator: &str, values: &[String]) -> Result<String> {
    match operator {
        "In" => Ok(format!("{} in ({})", key, values.join(","))),
        "NotIn" => Ok(format!("{} notin ({})", key, values.join(","))),
        "Exists" => Ok(key.to_string()),
        "DoesNotExist" => Ok(format!("!{}", key)),
        other => Err(OperatorError::Selector(format!(
            "unknown selector operator '{}'",
            other
        ))),
    }
}
