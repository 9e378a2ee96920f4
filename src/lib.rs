//! CHPA Kubernetes Operator
//!
//! A configurable horizontal pod autoscaler: watches ConfigurableAutoscaler
//! resources and adjusts the replica count of the referenced workload so that
//! observed metrics track their targets, with user-tunable tolerance,
//! scale-up rate limit, and independent upscale/downscale cooldown windows.
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: autoscalers.chpa.dev/v1beta1
//! kind: ConfigurableAutoscaler
//! metadata:
//!   name: web
//! spec:
//!   scaleTargetRef:
//!     kind: Deployment
//!     name: web
//!   maxReplicas: 10
//!   tolerance: 0.1
//!   upscaleForbiddenWindowSeconds: 60
//!   metrics:
//!     - type: Resource
//!       resource:
//!         name: cpu
//!         targetAverageUtilization: 80
//! ```

pub mod calculator;
pub mod conditions;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod events;
pub mod leader_election;
pub mod metrics;
pub mod scale;

pub use controllers::{AutoscalerController, ControllerSettings};
pub use crd::{
    AutoscalerSpec, AutoscalerStatus, ConfigurableAutoscaler, CrossVersionObjectReference,
    MetricSpec, MetricStatus,
};
pub use error::{OperatorError, Result};
