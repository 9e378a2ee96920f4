//! Custom Resource Definitions for the CHPA operator
//!
//! A single CRD is managed:
//! - ConfigurableAutoscaler: a horizontal pod autoscaler with tunable
//!   tolerance, scale-up rate limit, and per-direction cooldown windows

mod autoscaler;

pub use autoscaler::{
    apply_defaults, format_quantity_milli, parse_quantity_milli, validate, AutoscalerSpec,
    AutoscalerStatus, ConfigurableAutoscaler, CrossVersionObjectReference, ExternalMetricSource,
    ExternalMetricStatus, MetricSelector, MetricSpec, MetricStatus, ObjectMetricSource,
    ObjectMetricStatus, PodsMetricSource, PodsMetricStatus, ResourceMetricSource,
    ResourceMetricStatus, SelectorRequirement, DEFAULT_DOWNSCALE_FORBIDDEN_WINDOW_SECONDS,
    DEFAULT_SCALE_UP_LIMIT_FACTOR, DEFAULT_SCALE_UP_LIMIT_MINIMUM, DEFAULT_TOLERANCE,
    DEFAULT_UPSCALE_FORBIDDEN_WINDOW_SECONDS,
};
