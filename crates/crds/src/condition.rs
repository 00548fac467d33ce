//! Status conditions
//!
//! Typed condition entries reported on GatewayClass, Gateway, and (per
//! parent) HTTPRoute status. Mirrors the metav1.Condition shape.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single typed status condition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within a condition list (e.g. "Accepted")
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False, or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// Generation of the object spec this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// When the condition last changed status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Condition {
    /// Builds a condition stamped with the current time.
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: Some(chrono::Utc::now()),
        }
    }
}

/// Condition status value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}
