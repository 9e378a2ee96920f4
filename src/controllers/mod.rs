//! Controllers for the CHPA operator
//!
//! One controller watches ConfigurableAutoscaler resources and reconciles the
//! actual replica count of the referenced workload with the count the spec
//! metrics ask for.

mod autoscaler;

pub use autoscaler::{AutoscalerController, ControllerSettings};
