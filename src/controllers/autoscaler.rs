//! Autoscaler Controller
//!
//! Reconciles ConfigurableAutoscaler resources: reads the target workload's
//! scale, computes a desired replica count from the spec metrics, clamps it
//! through the configured limits, honors the upscale/downscale forbidden
//! windows, writes the new scale, and persists the observed status.
//!
//! Reconcile never surfaces an error to the runtime: a failed pass logs,
//! records a condition, and comes back on the fixed sync period. The
//! forbidden windows already provide the stability horizon, so a rate-limited
//! error queue would only add control-loop latency.

use crate::calculator::ReplicaCalculator;
use crate::conditions::{set_condition, ConditionStatus, ConditionType};
use crate::crd::{
    apply_defaults, format_quantity_milli, parse_quantity_milli, validate, AutoscalerSpec,
    AutoscalerStatus, ConfigurableAutoscaler, ExternalMetricStatus, MetricSpec, MetricStatus,
    ObjectMetricStatus, PodsMetricStatus, ResourceMetricStatus,
};
use crate::error::{OperatorError, Result};
use crate::events::{reasons, EventPublisher, KubeEventPublisher};
use crate::metrics::ClusterMetricsProvider;
use crate::scale::{metric_selector_query, selector_query, ScaleSnapshot, ScaleTarget, ScaleTargetRegistry};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::{FutureExt, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config;
use kube::{Client, Resource, ResourceExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables taken from operator configuration, not from the CRD
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Fixed delay between reconcile passes per object
    pub sync_period: Duration,
    /// The single workload kind this controller admits
    pub target_kind: String,
    /// Namespace to watch; empty watches all namespaces
    pub watch_namespace: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            sync_period: Duration::from_secs(15),
            target_kind: "Deployment".to_string(),
            watch_namespace: String::new(),
        }
    }
}

/// Controller for ConfigurableAutoscaler resources
pub struct AutoscalerController {
    client: Client,
    calculator: ReplicaCalculator<ClusterMetricsProvider>,
    targets: ScaleTargetRegistry,
    events: Arc<dyn EventPublisher>,
    settings: ControllerSettings,
}

impl AutoscalerController {
    /// Create a controller with the production metric and event backends
    pub fn new(client: Client, settings: ControllerSettings) -> Self {
        let events: Arc<dyn EventPublisher> =
            Arc::new(KubeEventPublisher::new(client.clone(), "chpa-operator"));
        Self::with_components(
            client.clone(),
            ScaleTargetRegistry::with_defaults(client),
            events,
            settings,
        )
    }

    /// Create a controller with explicit collaborators
    pub fn with_components(
        client: Client,
        targets: ScaleTargetRegistry,
        events: Arc<dyn EventPublisher>,
        settings: ControllerSettings,
    ) -> Self {
        let calculator =
            ReplicaCalculator::new(ClusterMetricsProvider::new(client.clone()), client.clone());
        Self {
            client,
            calculator,
            targets,
            events,
            settings,
        }
    }

    /// Run the autoscaler controller
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let autoscalers: Api<ConfigurableAutoscaler> = if self.settings.watch_namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.settings.watch_namespace)
        };

        info!("Starting ConfigurableAutoscaler controller");

        let sync_period = self.settings.sync_period;
        Controller::new(autoscalers, Config::default())
            .shutdown_on_signal()
            .run(
                |chpa, ctx| async move { ctx.reconcile(chpa).await },
                move |_chpa, error, _ctx| {
                    error!("Reconciliation error: {:?}", error);
                    Action::requeue(sync_period)
                },
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!("Reconciled autoscaler: {}", obj.name);
                    }
                    Err(e) => {
                        error!("Reconciliation failed: {:?}", e);
                    }
                }
            })
            .await;

        Ok(())
    }

    /// One reconcile pass for a single autoscaler object.
    ///
    /// Always returns an Action: either requeue at the sync period, or stop
    /// until the spec changes (invalid spec, deleted object).
    async fn reconcile(
        &self,
        obj: Arc<ConfigurableAutoscaler>,
    ) -> std::result::Result<Action, OperatorError> {
        let repeat = Action::requeue(self.settings.sync_period);
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

        info!(autoscaler = %name, namespace = %namespace, "Reconciling ConfigurableAutoscaler");

        // The pass owns its own copy; a fresh one is read on the next pass.
        let mut chpa = (*obj).clone();
        apply_defaults(&mut chpa.spec);
        let now = Utc::now();
        let original_status = chpa.status.clone().unwrap_or_default();

        if let Err(err) = validate(&chpa.spec, &self.settings.target_kind) {
            warn!(autoscaler = %name, namespace = %namespace, error = %err, "Rejecting invalid autoscaler spec");
            self.emit(&chpa, EventType::Warning, reasons::FAILED_SPEC_CHECK, err.to_string())
                .await;
            record_condition(
                &mut chpa,
                ConditionType::AbleToScale,
                ConditionStatus::False,
                "FailedSpecCheck",
                format!("Invalid autoscaler specification: {}", err),
                now,
            );
            self.persist_status(&original_status, &chpa, &namespace).await;
            // The watch re-enqueues the object when its spec changes.
            return Ok(Action::await_change());
        }

        let target = match self.targets.get(&chpa.spec.scale_target_ref.kind) {
            Ok(target) => target,
            Err(err) => {
                warn!(autoscaler = %name, error = %err, "No scale target for admitted kind");
                return Ok(Action::await_change());
            }
        };

        let target_name = chpa.spec.scale_target_ref.name.clone();
        let scale = match target.get_scale(&namespace, &target_name).await {
            Ok(scale) => scale,
            Err(err) => {
                warn!(
                    workload = %target_name,
                    namespace = %namespace,
                    error = %err,
                    "Error reading scale target"
                );
                return Ok(repeat);
            }
        };

        if let Err(err) = target
            .set_owner(&namespace, &target_name, &owner_reference(&chpa))
            .await
        {
            warn!(
                workload = %target_name,
                namespace = %namespace,
                error = %err,
                "Can't set the controller reference on the workload"
            );
            return Ok(repeat);
        }

        let core = AssertUnwindSafe(self.reconcile_core(
            &mut chpa,
            &namespace,
            target.as_ref(),
            &scale,
            &original_status,
            now,
        ))
        .catch_unwind()
        .await;

        match core {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.recover_core_failure(&mut chpa, &original_status, &namespace, err.to_string(), now)
                    .await;
            }
            Err(panic) => {
                let message = panic_message(panic);
                self.recover_core_failure(&mut chpa, &original_status, &namespace, message, now)
                    .await;
            }
        }

        Ok(repeat)
    }

    /// Converts a crashed reconcile-core into an event plus a condition so the
    /// next tick can proceed normally.
    async fn recover_core_failure(
        &self,
        chpa: &mut ConfigurableAutoscaler,
        original_status: &AutoscalerStatus,
        namespace: &str,
        message: String,
        now: DateTime<Utc>,
    ) {
        error!(autoscaler = %chpa.name_any(), error = %message, "Runtime error in reconcile core");
        self.emit(chpa, EventType::Warning, reasons::FAILED_PROCESS_CHPA, message)
            .await;
        record_condition(
            chpa,
            ConditionType::AbleToScale,
            ConditionStatus::True,
            "FailedProcessCHPA",
            "Error happened while processing the autoscaler".to_string(),
            now,
        );
        self.persist_status(original_status, chpa, namespace).await;
    }

    /// The per-pass state machine deciding the desired replica count.
    async fn reconcile_core(
        &self,
        chpa: &mut ConfigurableAutoscaler,
        namespace: &str,
        target: &dyn ScaleTarget,
        scale: &ScaleSnapshot,
        original_status: &AutoscalerStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let current_replicas = scale.current_replicas;
        let reference = format!(
            "{}/{}/{}",
            chpa.spec.scale_target_ref.kind, namespace, chpa.spec.scale_target_ref.name
        );

        record_condition(
            chpa,
            ConditionType::AbleToScale,
            ConditionStatus::True,
            "SucceededGetScale",
            "the controller was able to get the target's current scale".to_string(),
            now,
        );

        let mut metric_statuses: Vec<MetricStatus> = Vec::new();
        let mut desired_replicas: i32 = 0;
        let mut rescale_reason = String::new();
        let mut timestamp = now;
        let mut rescale = true;

        if scale.replicas_intent == 0 {
            // Autoscaling is disabled for this workload
            desired_replicas = 0;
            rescale = false;
            record_condition(
                chpa,
                ConditionType::ScalingActive,
                ConditionStatus::False,
                "ScalingDisabled",
                "scaling is disabled since the replica count of the target is zero".to_string(),
                now,
            );
        } else if current_replicas > chpa.spec.max_replicas {
            rescale_reason = "Current number of replicas above Spec.MaxReplicas".to_string();
            desired_replicas = chpa.spec.max_replicas;
        } else if chpa
            .spec
            .min_replicas
            .is_some_and(|min| current_replicas < min)
        {
            rescale_reason = "Current number of replicas below Spec.MinReplicas".to_string();
            desired_replicas = chpa.spec.min_replicas.unwrap_or(1);
        } else if current_replicas == 0 {
            rescale_reason = "Current number of replicas must be greater than 0".to_string();
            desired_replicas = 1;
        } else {
            let computed = self
                .compute_replicas_for_metrics(chpa, namespace, scale, now)
                .await;
            let (metric_desired, metric_name, statuses, metric_timestamp) = match computed {
                Ok(result) => result,
                Err(err) => {
                    set_current_replicas_in_status(chpa, current_replicas);
                    if let Err(update_err) = self
                        .update_status_if_changed(original_status, chpa, namespace)
                        .await
                    {
                        self.emit(
                            chpa,
                            EventType::Warning,
                            reasons::FAILED_UPDATE_REPLICAS,
                            update_err.to_string(),
                        )
                        .await;
                        record_condition(
                            chpa,
                            ConditionType::AbleToScale,
                            ConditionStatus::False,
                            "FailedUpdateReplicas",
                            format!(
                                "the controller was unable to update the number of replicas: {}",
                                update_err
                            ),
                            now,
                        );
                        warn!(error = %update_err, "Unable to update the number of replicas");
                        return Ok(());
                    }
                    self.emit(
                        chpa,
                        EventType::Warning,
                        reasons::FAILED_COMPUTE_METRICS_REPLICAS,
                        err.to_string(),
                    )
                    .await;
                    warn!(
                        reference = %reference,
                        error = %err,
                        "Failed to compute desired number of replicas based on listed metrics"
                    );
                    // transient: the next tick retries
                    return Ok(());
                }
            };
            metric_statuses = statuses;

            info!(
                proposed = metric_desired,
                metric = %metric_name,
                reference = %reference,
                "Computed replica proposal"
            );

            let mut rescale_metric = String::new();
            if metric_desired > desired_replicas {
                desired_replicas = metric_desired;
                timestamp = metric_timestamp;
                rescale_metric = metric_name;
            }
            if desired_replicas > current_replicas {
                rescale_reason = format!("{} above target", rescale_metric);
            }
            if desired_replicas < current_replicas {
                rescale_reason = "All metrics below target".to_string();
            }

            desired_replicas =
                normalize_desired_replicas(chpa, current_replicas, desired_replicas, now);
            debug!(desired = desired_replicas, "After normalization");

            rescale = should_scale(
                current_replicas,
                desired_replicas,
                last_scale_time(chpa),
                chpa.spec.downscale_forbidden_window_seconds,
                chpa.spec.upscale_forbidden_window_seconds,
                timestamp,
            );
            record_backoff_conditions(chpa, timestamp, now);
        }

        if rescale {
            if let Err(err) = target
                .set_scale(namespace, &chpa.spec.scale_target_ref.name, desired_replicas)
                .await
            {
                self.emit(
                    chpa,
                    EventType::Warning,
                    reasons::FAILED_RESCALE,
                    format!(
                        "New size: {}; reason: {}; error: {}",
                        desired_replicas, rescale_reason, err
                    ),
                )
                .await;
                record_condition(
                    chpa,
                    ConditionType::AbleToScale,
                    ConditionStatus::False,
                    "FailedUpdateScale",
                    format!("the controller was unable to update the target scale: {}", err),
                    now,
                );
                set_current_replicas_in_status(chpa, current_replicas);
                if let Err(update_err) = self
                    .update_status_if_changed(original_status, chpa, namespace)
                    .await
                {
                    self.emit(
                        chpa,
                        EventType::Warning,
                        reasons::FAILED_UPDATE_REPLICAS,
                        update_err.to_string(),
                    )
                    .await;
                    record_condition(
                        chpa,
                        ConditionType::AbleToScale,
                        ConditionStatus::False,
                        "FailedUpdateReplicas",
                        format!(
                            "the controller was unable to update the number of replicas: {}",
                            update_err
                        ),
                        now,
                    );
                }
                return Ok(());
            }
            record_condition(
                chpa,
                ConditionType::AbleToScale,
                ConditionStatus::True,
                "SucceededRescale",
                format!(
                    "the controller was able to update the target scale to {}",
                    desired_replicas
                ),
                now,
            );
            self.emit(
                chpa,
                EventType::Normal,
                reasons::SUCCESSFUL_RESCALE,
                format!("New size: {}; reason: {}", desired_replicas, rescale_reason),
            )
            .await;
            info!(
                reference = %reference,
                old_size = current_replicas,
                new_size = desired_replicas,
                reason = %rescale_reason,
                "Successful rescale"
            );
        } else {
            debug!(
                reference = %reference,
                desired = desired_replicas,
                "Decided not to scale"
            );
            desired_replicas = current_replicas;
        }

        set_status(chpa, current_replicas, desired_replicas, metric_statuses, rescale, now);
        if let Err(err) = self
            .update_status_if_changed(original_status, chpa, namespace)
            .await
        {
            warn!(error = %err, "Failed to update autoscaler status");
        }

        Ok(())
    }

    /// Evaluates every spec metric and returns the winning (largest) proposal
    /// together with the per-metric statuses.
    async fn compute_replicas_for_metrics(
        &self,
        chpa: &mut ConfigurableAutoscaler,
        namespace: &str,
        scale: &ScaleSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(i32, String, Vec<MetricStatus>, DateTime<Utc>)> {
        let current_replicas = scale.current_replicas;
        let tolerance = chpa.spec.tolerance;

        let selector = match &scale.selector {
            Some(selector) => selector.clone(),
            None => {
                let message = "selector is required";
                self.emit(
                    chpa,
                    EventType::Warning,
                    reasons::SELECTOR_REQUIRED,
                    message.to_string(),
                )
                .await;
                record_condition(
                    chpa,
                    ConditionType::ScalingActive,
                    ConditionStatus::False,
                    "InvalidSelector",
                    "the scale target is missing a pod selector".to_string(),
                    now,
                );
                return Err(OperatorError::Selector(message.to_string()));
            }
        };
        let selector_str = match selector_query(&selector) {
            Ok(query) if !query.is_empty() => query,
            Ok(_) => {
                let message = "selector is required";
                self.emit(
                    chpa,
                    EventType::Warning,
                    reasons::SELECTOR_REQUIRED,
                    message.to_string(),
                )
                .await;
                record_condition(
                    chpa,
                    ConditionType::ScalingActive,
                    ConditionStatus::False,
                    "InvalidSelector",
                    "the scale target's pod selector is empty".to_string(),
                    now,
                );
                return Err(OperatorError::Selector(message.to_string()));
            }
            Err(err) => {
                let message = format!(
                    "couldn't convert selector into a corresponding internal selector object: {}",
                    err
                );
                self.emit(
                    chpa,
                    EventType::Warning,
                    reasons::INVALID_SELECTOR,
                    message.clone(),
                )
                .await;
                record_condition(
                    chpa,
                    ConditionType::ScalingActive,
                    ConditionStatus::False,
                    "InvalidSelector",
                    message.clone(),
                    now,
                );
                return Err(OperatorError::Selector(message));
            }
        };

        let mut statuses = Vec::with_capacity(chpa.spec.metrics.len());
        let mut replicas: i32 = 0;
        let mut metric = String::new();
        let mut timestamp = now;

        let metric_specs = chpa.spec.metrics.clone();
        for metric_spec in &metric_specs {
            let (proposal, metric_name, status, proposal_timestamp) = match metric_spec {
                MetricSpec::Object { object } => {
                    let target_milli = parse_quantity_milli(&object.target_value)
                        .map_err(OperatorError::Validation)?;
                    match self
                        .calculator
                        .get_object_metric_replicas(
                            current_replicas,
                            target_milli,
                            &object.metric_name,
                            namespace,
                            &object.target.kind,
                            &object.target.name,
                            tolerance,
                        )
                        .await
                    {
                        Ok(proposal) => (
                            proposal.replicas,
                            format!("{} metric {}", object.target.kind, object.metric_name),
                            MetricStatus::Object {
                                object: ObjectMetricStatus {
                                    target: object.target.clone(),
                                    metric_name: object.metric_name.clone(),
                                    current_value: format_quantity_milli(
                                        proposal.utilization_milli,
                                    ),
                                },
                            },
                            proposal.timestamp,
                        ),
                        Err(err) => {
                            self.fail_metric(
                                chpa,
                                reasons::FAILED_GET_OBJECT_METRIC,
                                "FailedGetObjectMetric",
                                &err,
                                now,
                            )
                            .await;
                            return Err(OperatorError::Metrics(format!(
                                "failed to get object metric value: {}",
                                err
                            )));
                        }
                    }
                }
                MetricSpec::Pods { pods } => {
                    let target_milli = parse_quantity_milli(&pods.target_average_value)
                        .map_err(OperatorError::Validation)?;
                    match self
                        .calculator
                        .get_metric_replicas(
                            current_replicas,
                            target_milli,
                            &pods.metric_name,
                            namespace,
                            &selector_str,
                            tolerance,
                        )
                        .await
                    {
                        Ok(proposal) => (
                            proposal.replicas,
                            format!("pods metric {}", pods.metric_name),
                            MetricStatus::Pods {
                                pods: PodsMetricStatus {
                                    metric_name: pods.metric_name.clone(),
                                    current_average_value: format_quantity_milli(
                                        proposal.utilization_milli,
                                    ),
                                },
                            },
                            proposal.timestamp,
                        ),
                        Err(err) => {
                            self.fail_metric(
                                chpa,
                                reasons::FAILED_GET_PODS_METRIC,
                                "FailedGetPodsMetric",
                                &err,
                                now,
                            )
                            .await;
                            return Err(OperatorError::Metrics(format!(
                                "failed to get pods metric value: {}",
                                err
                            )));
                        }
                    }
                }
                MetricSpec::Resource { resource } => {
                    if let Some(target_value) = &resource.target_average_value {
                        let target_milli = parse_quantity_milli(target_value)
                            .map_err(OperatorError::Validation)?;
                        match self
                            .calculator
                            .get_raw_resource_replicas(
                                current_replicas,
                                target_milli,
                                &resource.name,
                                namespace,
                                &selector_str,
                                tolerance,
                            )
                            .await
                        {
                            Ok(proposal) => (
                                proposal.replicas,
                                format!("{} resource", resource.name),
                                MetricStatus::Resource {
                                    resource: ResourceMetricStatus {
                                        name: resource.name.clone(),
                                        current_average_utilization: None,
                                        current_average_value: format_quantity_milli(
                                            proposal.utilization_milli,
                                        ),
                                    },
                                },
                                proposal.timestamp,
                            ),
                            Err(err) => {
                                self.fail_metric(
                                    chpa,
                                    reasons::FAILED_GET_RESOURCE_METRIC,
                                    "FailedGetResourceMetric",
                                    &err,
                                    now,
                                )
                                .await;
                                return Err(OperatorError::Metrics(format!(
                                    "failed to get {} utilization: {}",
                                    resource.name, err
                                )));
                            }
                        }
                    } else {
                        let Some(target_utilization) = resource.target_average_utilization else {
                            let err = OperatorError::Validation(
                                "invalid resource metric source: neither a utilization target nor a value target was set"
                                    .to_string(),
                            );
                            self.fail_metric(
                                chpa,
                                reasons::FAILED_GET_RESOURCE_METRIC,
                                "FailedGetResourceMetric",
                                &err,
                                now,
                            )
                            .await;
                            return Err(err);
                        };
                        match self
                            .calculator
                            .get_resource_replicas(
                                current_replicas,
                                target_utilization,
                                &resource.name,
                                namespace,
                                &selector_str,
                                tolerance,
                            )
                            .await
                        {
                            Ok(proposal) => (
                                proposal.replicas,
                                format!(
                                    "{} resource utilization (percentage of request)",
                                    resource.name
                                ),
                                MetricStatus::Resource {
                                    resource: ResourceMetricStatus {
                                        name: resource.name.clone(),
                                        current_average_utilization: Some(
                                            proposal.utilization_pct,
                                        ),
                                        current_average_value: format_quantity_milli(
                                            proposal.raw_average_milli,
                                        ),
                                    },
                                },
                                proposal.timestamp,
                            ),
                            Err(err) => {
                                self.fail_metric(
                                    chpa,
                                    reasons::FAILED_GET_RESOURCE_METRIC,
                                    "FailedGetResourceMetric",
                                    &err,
                                    now,
                                )
                                .await;
                                return Err(OperatorError::Metrics(format!(
                                    "failed to get {} utilization: {}",
                                    resource.name, err
                                )));
                            }
                        }
                    }
                }
                MetricSpec::External { external } => {
                    let metric_selector = match &external.metric_selector {
                        Some(selector) => match metric_selector_query(selector) {
                            Ok(query) if query.is_empty() => None,
                            Ok(query) => Some(query),
                            Err(err) => {
                                let message = format!(
                                    "couldn't convert metric selector for {}: {}",
                                    external.metric_name, err
                                );
                                self.emit(
                                    chpa,
                                    EventType::Warning,
                                    reasons::INVALID_SELECTOR,
                                    message.clone(),
                                )
                                .await;
                                record_condition(
                                    chpa,
                                    ConditionType::ScalingActive,
                                    ConditionStatus::False,
                                    "InvalidSelector",
                                    message.clone(),
                                    now,
                                );
                                return Err(OperatorError::Selector(message));
                            }
                        },
                        None => None,
                    };

                    if let Some(target_average) = &external.target_average_value {
                        let target_milli = parse_quantity_milli(target_average)
                            .map_err(OperatorError::Validation)?;
                        match self
                            .calculator
                            .get_external_per_pod_metric_replicas(
                                current_replicas,
                                target_milli,
                                &external.metric_name,
                                namespace,
                                metric_selector.as_deref(),
                                tolerance,
                            )
                            .await
                        {
                            Ok(proposal) => (
                                proposal.replicas,
                                format!(
                                    "external metric {}({:?})",
                                    external.metric_name, external.metric_selector
                                ),
                                MetricStatus::External {
                                    external: ExternalMetricStatus {
                                        metric_name: external.metric_name.clone(),
                                        metric_selector: external.metric_selector.clone(),
                                        current_value: None,
                                        current_average_value: Some(format_quantity_milli(
                                            proposal.utilization_milli,
                                        )),
                                    },
                                },
                                proposal.timestamp,
                            ),
                            Err(err) => {
                                self.fail_metric(
                                    chpa,
                                    reasons::FAILED_GET_EXTERNAL_METRIC,
                                    "FailedGetExternalMetric",
                                    &err,
                                    now,
                                )
                                .await;
                                return Err(OperatorError::Metrics(format!(
                                    "failed to get {} external metric: {}",
                                    external.metric_name, err
                                )));
                            }
                        }
                    } else if let Some(target_value) = &external.target_value {
                        let target_milli = parse_quantity_milli(target_value)
                            .map_err(OperatorError::Validation)?;
                        match self
                            .calculator
                            .get_external_metric_replicas(
                                current_replicas,
                                target_milli,
                                &external.metric_name,
                                namespace,
                                metric_selector.as_deref(),
                                tolerance,
                            )
                            .await
                        {
                            Ok(proposal) => (
                                proposal.replicas,
                                format!(
                                    "external metric {}({:?})",
                                    external.metric_name, external.metric_selector
                                ),
                                MetricStatus::External {
                                    external: ExternalMetricStatus {
                                        metric_name: external.metric_name.clone(),
                                        metric_selector: external.metric_selector.clone(),
                                        current_value: Some(format_quantity_milli(
                                            proposal.utilization_milli,
                                        )),
                                        current_average_value: None,
                                    },
                                },
                                proposal.timestamp,
                            ),
                            Err(err) => {
                                self.fail_metric(
                                    chpa,
                                    reasons::FAILED_GET_EXTERNAL_METRIC,
                                    "FailedGetExternalMetric",
                                    &err,
                                    now,
                                )
                                .await;
                                return Err(OperatorError::Metrics(format!(
                                    "failed to get external metric {}: {}",
                                    external.metric_name, err
                                )));
                            }
                        }
                    } else {
                        let err = OperatorError::Validation(
                            "invalid external metric source: neither a value target nor an average value target was set"
                                .to_string(),
                        );
                        self.fail_metric(
                            chpa,
                            reasons::FAILED_GET_EXTERNAL_METRIC,
                            "FailedGetExternalMetric",
                            &err,
                            now,
                        )
                        .await;
                        return Err(err);
                    }
                }
            };

            statuses.push(status);
            if replicas == 0 || proposal > replicas {
                timestamp = proposal_timestamp;
                replicas = proposal;
                metric = metric_name;
            }
        }

        record_condition(
            chpa,
            ConditionType::ScalingActive,
            ConditionStatus::True,
            "ValidMetricFound",
            format!(
                "the controller was able to successfully calculate a replica count from {}",
                metric
            ),
            now,
        );
        Ok((replicas, metric, statuses, timestamp))
    }

    /// Emits the per-variant warning event and marks scaling inactive.
    async fn fail_metric(
        &self,
        chpa: &mut ConfigurableAutoscaler,
        event_reason: &str,
        condition_reason: &str,
        err: &OperatorError,
        now: DateTime<Utc>,
    ) {
        self.emit(chpa, EventType::Warning, event_reason, err.to_string())
            .await;
        record_condition(
            chpa,
            ConditionType::ScalingActive,
            ConditionStatus::False,
            condition_reason,
            format!("the controller was unable to compute the replica count: {}", err),
            now,
        );
    }

    /// Writes the status subresource iff it differs from the original.
    async fn update_status_if_changed(
        &self,
        original: &AutoscalerStatus,
        chpa: &ConfigurableAutoscaler,
        namespace: &str,
    ) -> Result<()> {
        let status = chpa.status.clone().unwrap_or_default();
        if *original == status {
            return Ok(());
        }

        let api: Api<ConfigurableAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(&chpa.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Best-effort status write for paths that already report an error.
    async fn persist_status(
        &self,
        original: &AutoscalerStatus,
        chpa: &ConfigurableAutoscaler,
        namespace: &str,
    ) {
        if let Err(err) = self.update_status_if_changed(original, chpa, namespace).await {
            warn!(
                autoscaler = %chpa.name_any(),
                error = %err,
                "Failed to persist autoscaler status"
            );
        }
    }

    async fn emit(
        &self,
        chpa: &ConfigurableAutoscaler,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        self.events
            .publish(&chpa.object_ref(&()), type_, reason, note)
            .await;
    }
}

/// Records the given condition on the autoscaler's status.
fn record_condition(
    chpa: &mut ConfigurableAutoscaler,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: String,
    now: DateTime<Utc>,
) {
    let conditions = &mut chpa.status.get_or_insert_with(Default::default).conditions;
    set_condition(conditions, condition_type, status, reason, message, now);
}

/// Rebuilds the status from this pass's observations.
///
/// `last_scale_time` is carried over unless the pass rescaled, in which case
/// it moves to `now`.
fn set_status(
    chpa: &mut ConfigurableAutoscaler,
    current_replicas: i32,
    desired_replicas: i32,
    metric_statuses: Vec<MetricStatus>,
    rescaled: bool,
    now: DateTime<Utc>,
) {
    let old = chpa.status.clone().unwrap_or_default();
    let mut status = AutoscalerStatus {
        observed_generation: chpa.metadata.generation,
        last_scale_time: old.last_scale_time,
        current_replicas,
        desired_replicas,
        current_metrics: metric_statuses,
        conditions: old.conditions,
    };
    if rescaled {
        status.last_scale_time = Some(now.to_rfc3339());
    }
    chpa.status = Some(status);
}

/// Refreshes the observed replica count without touching the rest of the
/// status; used on paths that bail out before a decision.
fn set_current_replicas_in_status(chpa: &mut ConfigurableAutoscaler, current_replicas: i32) {
    let old = chpa.status.clone().unwrap_or_default();
    let desired = old.desired_replicas;
    let metrics = old.current_metrics.clone();
    set_status(chpa, current_replicas, desired, metrics, false, Utc::now());
}

/// Clamps the proposed replica count and records the ScalingLimited condition.
fn normalize_desired_replicas(
    chpa: &mut ConfigurableAutoscaler,
    current_replicas: i32,
    prenormalized: i32,
    now: DateTime<Utc>,
) -> i32 {
    let min_replicas = chpa.spec.min_replicas.unwrap_or(0);
    let (desired, condition, reason) = convert_desired_replicas_with_rules(
        &chpa.spec,
        current_replicas,
        prenormalized,
        min_replicas,
        chpa.spec.max_replicas,
    );

    let status = if desired == prenormalized {
        ConditionStatus::False
    } else {
        ConditionStatus::True
    };
    record_condition(chpa, ConditionType::ScalingLimited, status, condition, reason, now);

    desired
}

/// The actual normalization rules, free of any controller state.
fn convert_desired_replicas_with_rules(
    spec: &AutoscalerSpec,
    current_replicas: i32,
    desired_replicas: i32,
    min_replicas: i32,
    max_replicas: i32,
) -> (i32, &'static str, String) {
    let minimum_allowed = if min_replicas == 0 { 1 } else { min_replicas };

    // A single pass must not multiply the replica count unboundedly; a bogus
    // metric sample would otherwise stampede the scale (stock HPA issue #32304).
    let scale_up_limit = calculate_scale_up_limit(spec, current_replicas);

    let (maximum_allowed, limiting_condition, limiting_reason) = if max_replicas > scale_up_limit {
        (
            scale_up_limit,
            "ScaleUpLimit",
            "the desired replica count is increasing faster than the maximum scale rate",
        )
    } else {
        (
            max_replicas,
            "TooManyReplicas",
            "the desired replica count is more than the maximum replica count",
        )
    };

    if desired_replicas < minimum_allowed {
        let reason = if min_replicas == 0 {
            "the desired replica count is zero"
        } else {
            "the desired replica count is less than the minimum replica count"
        };
        (minimum_allowed, "TooFewReplicas", reason.to_string())
    } else if desired_replicas > maximum_allowed {
        (maximum_allowed, limiting_condition, limiting_reason.to_string())
    } else {
        (
            desired_replicas,
            "DesiredWithinRange",
            "the desired count is within the acceptable range".to_string(),
        )
    }
}

/// Upper bound for one upscale step: `floor(max(factor * current, minimum))`.
fn calculate_scale_up_limit(spec: &AutoscalerSpec, current_replicas: i32) -> i32 {
    (spec.scale_up_limit_factor * f64::from(current_replicas))
        .max(f64::from(spec.scale_up_limit_minimum)) as i32
}

/// Decides whether the computed desired count should be applied now.
///
/// The first-ever scale is free; after that each direction honors its own
/// forbidden window measured from the last successful scale.
fn should_scale(
    current_replicas: i32,
    desired_replicas: i32,
    last_scale_time: Option<DateTime<Utc>>,
    downscale_window_seconds: i32,
    upscale_window_seconds: i32,
    now: DateTime<Utc>,
) -> bool {
    if desired_replicas == current_replicas {
        debug!("Will not scale: number of replicas is not changed");
        return false;
    }

    let Some(last_scale) = last_scale_time else {
        return true;
    };

    if desired_replicas < current_replicas {
        let window = ChronoDuration::seconds(i64::from(downscale_window_seconds));
        if last_scale + window < now {
            return true;
        }
        debug!(
            last_scale = %last_scale,
            next_scale = %(last_scale + window),
            "Too early to scale down"
        );
    }

    if desired_replicas > current_replicas {
        let window = ChronoDuration::seconds(i64::from(upscale_window_seconds));
        if last_scale + window < now {
            return true;
        }
        debug!(
            last_scale = %last_scale,
            next_scale = %(last_scale + window),
            "Too early to scale up"
        );
    }

    false
}

/// Marks AbleToScale according to which forbidden windows currently bind.
fn record_backoff_conditions(
    chpa: &mut ConfigurableAutoscaler,
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) {
    let mut backoff_down = false;
    let mut backoff_up = false;

    if let Some(last_scale) = last_scale_time(chpa) {
        let down_window =
            ChronoDuration::seconds(i64::from(chpa.spec.downscale_forbidden_window_seconds));
        if last_scale + down_window >= timestamp {
            record_condition(
                chpa,
                ConditionType::AbleToScale,
                ConditionStatus::False,
                "BackoffDownscale",
                "the time since the previous scale is still within the downscale forbidden window"
                    .to_string(),
                now,
            );
            backoff_down = true;
        }

        let up_window =
            ChronoDuration::seconds(i64::from(chpa.spec.upscale_forbidden_window_seconds));
        if last_scale + up_window >= timestamp {
            backoff_up = true;
            if backoff_down {
                record_condition(
                    chpa,
                    ConditionType::AbleToScale,
                    ConditionStatus::False,
                    "BackoffBoth",
                    "the time since the previous scale is still within both the downscale and upscale forbidden windows"
                        .to_string(),
                    now,
                );
            } else {
                record_condition(
                    chpa,
                    ConditionType::AbleToScale,
                    ConditionStatus::False,
                    "BackoffUpscale",
                    "the time since the previous scale is still within the upscale forbidden window"
                        .to_string(),
                    now,
                );
            }
        }
    }

    if !backoff_down && !backoff_up {
        record_condition(
            chpa,
            ConditionType::AbleToScale,
            ConditionStatus::True,
            "ReadyForNewScale",
            "the last scale time was sufficiently old as to warrant a new scale".to_string(),
            now,
        );
    }
}

/// Parses the status' lastScaleTime back into a timestamp.
fn last_scale_time(chpa: &ConfigurableAutoscaler) -> Option<DateTime<Utc>> {
    chpa.status
        .as_ref()
        .and_then(|s| s.last_scale_time.as_deref())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn owner_reference(chpa: &ConfigurableAutoscaler) -> OwnerReference {
    OwnerReference {
        api_version: ConfigurableAutoscaler::api_version(&()).to_string(),
        kind: ConfigurableAutoscaler::kind(&()).to_string(),
        name: chpa.name_any(),
        uid: chpa.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::find_condition;
    use chrono::TimeZone;

    fn test_spec(factor: f64, minimum: i32, max_replicas: i32) -> AutoscalerSpec {
        let mut spec: AutoscalerSpec = serde_json::from_str(
            r#"{
                "scaleTargetRef": {"kind": "Deployment", "name": "web"},
                "maxReplicas": 10,
                "metrics": [
                    {"type": "Resource", "resource": {"name": "cpu", "targetAverageUtilization": 80}}
                ]
            }"#,
        )
        .unwrap();
        apply_defaults(&mut spec);
        spec.scale_up_limit_factor = factor;
        spec.scale_up_limit_minimum = minimum;
        spec.max_replicas = max_replicas;
        spec
    }

    fn test_chpa(spec: AutoscalerSpec) -> ConfigurableAutoscaler {
        ConfigurableAutoscaler::new("web-autoscaler", spec)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_calculate_scale_up_limit_floor_wins() {
        // factor 2.0 on a single replica is below the configured minimum of 4
        let spec = test_spec(2.0, 4, 10);
        assert_eq!(calculate_scale_up_limit(&spec, 1), 4);
    }

    #[test]
    fn test_calculate_scale_up_limit_factor_wins() {
        let spec = test_spec(3.0, 4, 100);
        assert_eq!(calculate_scale_up_limit(&spec, 10), 30);
    }

    #[test]
    fn test_normalize_clamped_by_scale_up_limit() {
        // current=1, factor=2, minimum=4: proposal of 10 is cut to 4
        let spec = test_spec(2.0, 4, 10);
        let (desired, condition, _) =
            convert_desired_replicas_with_rules(&spec, 1, 10, 0, spec.max_replicas);
        assert_eq!(desired, 4);
        assert_eq!(condition, "ScaleUpLimit");
    }

    #[test]
    fn test_normalize_clamped_by_scale_up_limit_larger_base() {
        let spec = test_spec(3.0, 4, 100);
        let (desired, condition, _) =
            convert_desired_replicas_with_rules(&spec, 10, 40, 0, spec.max_replicas);
        assert_eq!(desired, 30);
        assert_eq!(condition, "ScaleUpLimit");
    }

    #[test]
    fn test_normalize_clamped_by_max_replicas() {
        // scale-up limit (20) exceeds maxReplicas (8), so the cap is the max
        let spec = test_spec(2.0, 4, 8);
        let (desired, condition, _) =
            convert_desired_replicas_with_rules(&spec, 10, 15, 0, spec.max_replicas);
        assert_eq!(desired, 8);
        assert_eq!(condition, "TooManyReplicas");
    }

    #[test]
    fn test_normalize_raised_to_minimum() {
        let spec = test_spec(2.0, 4, 10);
        let (desired, condition, _) =
            convert_desired_replicas_with_rules(&spec, 5, 1, 3, spec.max_replicas);
        assert_eq!(desired, 3);
        assert_eq!(condition, "TooFewReplicas");
    }

    #[test]
    fn test_normalize_zero_guard_without_min() {
        let spec = test_spec(2.0, 4, 10);
        let (desired, condition, reason) =
            convert_desired_replicas_with_rules(&spec, 5, 0, 0, spec.max_replicas);
        assert_eq!(desired, 1);
        assert_eq!(condition, "TooFewReplicas");
        assert!(reason.contains("zero"));
    }

    #[test]
    fn test_normalize_within_range() {
        let spec = test_spec(2.0, 4, 10);
        let (desired, condition, reason) =
            convert_desired_replicas_with_rules(&spec, 5, 6, 1, spec.max_replicas);
        assert_eq!(desired, 6);
        assert_eq!(condition, "DesiredWithinRange");
        assert!(reason.contains("within the acceptable range"));
    }

    #[test]
    fn test_normalize_records_scaling_limited_condition() {
        let mut chpa = test_chpa(test_spec(2.0, 4, 10));
        let desired = normalize_desired_replicas(&mut chpa, 1, 10, at(0));
        assert_eq!(desired, 4);
        let condition = find_condition(
            &chpa.status.as_ref().unwrap().conditions,
            ConditionType::ScalingLimited,
        )
        .unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason.as_deref(), Some("ScaleUpLimit"));

        // an in-range proposal resets the condition
        let desired = normalize_desired_replicas(&mut chpa, 4, 6, at(60));
        assert_eq!(desired, 6);
        let condition = find_condition(
            &chpa.status.as_ref().unwrap().conditions,
            ConditionType::ScalingLimited,
        )
        .unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason.as_deref(), Some("DesiredWithinRange"));
    }

    #[test]
    fn test_should_scale_no_change() {
        assert!(!should_scale(5, 5, None, 300, 300, at(0)));
    }

    #[test]
    fn test_should_scale_first_scale_is_free() {
        assert!(should_scale(5, 2, None, 300, 300, at(0)));
        assert!(should_scale(2, 5, None, 300, 300, at(0)));
    }

    #[test]
    fn test_should_scale_downscale_blocked_by_window() {
        // last scale 100s ago, downscale window 300s
        assert!(!should_scale(5, 2, Some(at(0)), 300, 300, at(100)));
    }

    #[test]
    fn test_should_scale_downscale_allowed_after_window() {
        assert!(should_scale(5, 2, Some(at(0)), 300, 300, at(301)));
    }

    #[test]
    fn test_should_scale_windows_are_independent() {
        // upscale window shorter than downscale window
        assert!(should_scale(2, 5, Some(at(0)), 300, 60, at(100)));
        assert!(!should_scale(5, 2, Some(at(0)), 300, 60, at(100)));
    }

    #[test]
    fn test_should_scale_boundary_is_exclusive() {
        // exactly at the window edge is still too early
        assert!(!should_scale(5, 2, Some(at(0)), 300, 300, at(300)));
    }

    #[test]
    fn test_record_backoff_conditions() {
        let mut chpa = test_chpa(test_spec(2.0, 4, 10));
        chpa.status = Some(AutoscalerStatus {
            last_scale_time: Some(at(0).to_rfc3339()),
            ..Default::default()
        });
        chpa.spec.upscale_forbidden_window_seconds = 60;

        // 100s after the last scale: upscale window passed, downscale still binds
        record_backoff_conditions(&mut chpa, at(100), at(100));
        let condition = find_condition(
            &chpa.status.as_ref().unwrap().conditions,
            ConditionType::AbleToScale,
        )
        .unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason.as_deref(), Some("BackoffDownscale"));

        // within both windows
        record_backoff_conditions(&mut chpa, at(30), at(30));
        let condition = find_condition(
            &chpa.status.as_ref().unwrap().conditions,
            ConditionType::AbleToScale,
        )
        .unwrap();
        assert_eq!(condition.reason.as_deref(), Some("BackoffBoth"));

        // both windows passed
        record_backoff_conditions(&mut chpa, at(400), at(400));
        let condition = find_condition(
            &chpa.status.as_ref().unwrap().conditions,
            ConditionType::AbleToScale,
        )
        .unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason.as_deref(), Some("ReadyForNewScale"));
    }

    #[test]
    fn test_set_status_preserves_last_scale_time_without_rescale() {
        let mut chpa = test_chpa(test_spec(2.0, 4, 10));
        chpa.status = Some(AutoscalerStatus {
            last_scale_time: Some(at(0).to_rfc3339()),
            ..Default::default()
        });

        set_status(&mut chpa, 4, 4, Vec::new(), false, at(500));
        let status = chpa.status.as_ref().unwrap();
        assert_eq!(status.last_scale_time.as_deref(), Some(at(0).to_rfc3339().as_str()));
        assert_eq!(status.current_replicas, 4);
        assert_eq!(status.desired_replicas, 4);
    }

    #[test]
    fn test_set_status_bumps_last_scale_time_on_rescale() {
        let mut chpa = test_chpa(test_spec(2.0, 4, 10));
        chpa.status = Some(AutoscalerStatus {
            last_scale_time: Some(at(0).to_rfc3339()),
            ..Default::default()
        });

        set_status(&mut chpa, 4, 8, Vec::new(), true, at(500));
        let status = chpa.status.as_ref().unwrap();
        assert_eq!(
            status.last_scale_time.as_deref(),
            Some(at(500).to_rfc3339().as_str())
        );
        assert_eq!(status.desired_replicas, 8);
    }

    #[test]
    fn test_set_status_is_idempotent_without_changes() {
        // two passes over unchanged observations must build identical
        // statuses, so the diffing writer can suppress the second write
        let mut chpa = test_chpa(test_spec(2.0, 4, 10));
        set_status(&mut chpa, 4, 4, Vec::new(), false, at(0));
        let first = chpa.status.clone().unwrap();
        set_status(&mut chpa, 4, 4, Vec::new(), false, at(15));
        let second = chpa.status.clone().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_set_current_replicas_in_status_keeps_desired_and_metrics() {
        let mut chpa = test_chpa(test_spec(2.0, 4, 10));
        chpa.status = Some(AutoscalerStatus {
            desired_replicas: 7,
            current_metrics: vec![MetricStatus::Pods {
                pods: PodsMetricStatus {
                    metric_name: "rps".to_string(),
                    current_average_value: "100".to_string(),
                },
            }],
            ..Default::default()
        });

        set_current_replicas_in_status(&mut chpa, 5);
        let status = chpa.status.as_ref().unwrap();
        assert_eq!(status.current_replicas, 5);
        assert_eq!(status.desired_replicas, 7);
        assert_eq!(status.current_metrics.len(), 1);
    }

    #[test]
    fn test_last_scale_time_parsing() {
        let mut chpa = test_chpa(test_spec(2.0, 4, 10));
        assert!(last_scale_time(&chpa).is_none());

        chpa.status = Some(AutoscalerStatus {
            last_scale_time: Some(at(42).to_rfc3339()),
            ..Default::default()
        });
        assert_eq!(last_scale_time(&chpa), Some(at(42)));
    }

    #[test]
    fn test_controller_settings_defaults() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.sync_period, Duration::from_secs(15));
        assert_eq!(settings.target_kind, "Deployment");
        assert!(settings.watch_namespace.is_empty());
    }
}
