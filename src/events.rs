//! Kubernetes Event recording
//!
//! Events are fire-and-forget operator breadcrumbs: a failed publish is logged
//! and never propagates, so a broken events endpoint can't break
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Well-known event reason strings, as they appear in `kubectl get events`.
pub mod reasons {
    pub const FAILED_SPEC_CHECK: &str = "FailedSpecCheck";
    pub const FAILED_PROCESS_CHPA: &str = "FailedProcessCHPA";
    pub const FAILED_GET_OBJECT_METRIC: &str = "FailedGetObjectMetric";
    pub const FAILED_GET_PODS_METRIC: &str = "FailedGetPodsMetric";
    pub const FAILED_GET_RESOURCE_METRIC: &str = "FailedGetResourceMetric";
    pub const FAILED_GET_EXTERNAL_METRIC: &str = "FailedGetExternalMetric";
    pub const INVALID_SELECTOR: &str = "InvalidSelector";
    pub const SELECTOR_REQUIRED: &str = "SelectorRequired";
    pub const INVALID_METRIC_SOURCE_TYPE: &str = "InvalidMetricSourceType";
    pub const FAILED_COMPUTE_METRICS_REPLICAS: &str = "FailedComputeMetricsReplicas";
    pub const FAILED_UPDATE_REPLICAS: &str = "FailedUpdateReplicas";
    pub const FAILED_RESCALE: &str = "FailedRescale";
    pub const SUCCESSFUL_RESCALE: &str = "SuccessfulRescale";
}

/// Trait for publishing Kubernetes Events about an autoscaler object.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Must never fail the caller.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// The controller name appears as the reportingComponent on Events.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// No-op implementation for tests.
#[derive(Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _note: String,
    ) {
    }
}
