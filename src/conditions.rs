//! Status condition machinery for the autoscaler CRD
//!
//! The controller reports exactly three condition types, so both the type and
//! the status are closed enums rather than free-form strings. Updating a
//! condition with an unchanged status preserves its lastTransitionTime,
//! following the Kubernetes API conventions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The condition types the controller maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    /// Whether the controller can fetch and update the target's scale
    AbleToScale,
    /// Whether metrics yielded a usable replica proposal this pass
    ScalingActive,
    /// Whether the proposal was clamped by min/max or the scale-up rate limit
    ScalingLimited,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionType::AbleToScale => "AbleToScale",
            ConditionType::ScalingActive => "ScalingActive",
            ConditionType::ScalingLimited => "ScalingLimited",
        };
        f.write_str(s)
    }
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One entry in the autoscaler's condition list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerCondition {
    /// Type of the condition
    pub r#type: ConditionType,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Last time the condition's status changed (RFC 3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Machine-readable reason for the last update
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Sets or updates the condition of the given type in the list.
///
/// Reason and message are always refreshed; lastTransitionTime only moves when
/// the status actually changes. The list holds at most one entry per type.
pub fn set_condition(
    conditions: &mut Vec<AutoscalerCondition>,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: String,
    now: DateTime<Utc>,
) {
    match conditions.iter_mut().find(|c| c.r#type == condition_type) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(now.to_rfc3339());
            }
            existing.reason = Some(reason.to_string());
            existing.message = Some(message);
        }
        None => {
            conditions.push(AutoscalerCondition {
                r#type: condition_type,
                status,
                last_transition_time: Some(now.to_rfc3339()),
                reason: Some(reason.to_string()),
                message: Some(message),
            });
        }
    }
}

/// Looks up a condition by type.
pub fn find_condition(
    conditions: &[AutoscalerCondition],
    condition_type: ConditionType,
) -> Option<&AutoscalerCondition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}
