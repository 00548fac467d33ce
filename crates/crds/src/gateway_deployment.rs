//! GatewayDeployment CRD
//!
//! Controller-specific deployment parameters, consumed by GatewayClasses via
//! `spec.parametersRef`. Existence and shape are validated by the class
//! acceptor; the payload tunes the infrastructure the provisioner computes.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "gateways.microscaler.io",
    version = "v1alpha1",
    kind = "GatewayDeployment",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDeploymentSpec {
    /// Proxy replica count, defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Proxy container image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Proxy log verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<ProxyLogLevel>,
}

/// Log verbosity accepted by the proxy binary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyLogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}
