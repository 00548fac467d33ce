//! GatewayClass binding
//!
//! Cluster-scoped declaration of a gateway controller identity and an
//! optional reference to an external parameters object.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "GatewayClass",
    status = "GatewayClassStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassSpec {
    /// Controller identity that owns Gateways of this class
    pub controller_name: String,

    /// Optional reference to controller-specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_ref: Option<ParametersReference>,
}

/// Typed reference to the external parameters object of a GatewayClass.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParametersReference {
    /// API group of the referenced object
    pub group: String,

    /// Kind of the referenced object
    pub kind: String,

    /// Name of the referenced object
    pub name: String,

    /// Namespace of the referenced object, required for namespaced kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassStatus {
    /// Acceptance state reported by the owning controller
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
