//! Infrastructure Provisioner
//!
//! Computes the desired Infrastructure Set for a Gateway (one proxy
//! Deployment, one LoadBalancer Service) and creates or updates it
//! idempotently. Desired-state computation is pure: every valid
//! (gateway spec, resolved parameters) pair maps to exactly one shape.
//!
//! Idempotence is enforced two ways: a config-hash annotation short-circuits
//! the write entirely when the logical input is unchanged, and writes go
//! through server-side apply so fields owned by other actors are preserved.

pub mod exposure;
pub mod workload;

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crds::{Gateway, GatewayDeployment, Listener};

use crate::error::ControllerError;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "gateway-provisioner";
pub const MANAGED_BY_LABEL_QUERY: &str = "app.kubernetes.io/managed-by=gateway-provisioner";

pub const GATEWAY_NAME_LABEL: &str = "gateways.microscaler.io/gateway-name";
pub const CONFIG_HASH_ANNOTATION: &str = "gateways.microscaler.io/config-hash";

/// Field manager identity used for server-side apply.
pub const FIELD_MANAGER: &str = "gateway-provisioner";

pub const DEFAULT_PROXY_IMAGE: &str = "ghcr.io/microscaler/gateway-proxy:v0.1.0";
pub const DEFAULT_REPLICAS: i32 = 1;

/// The desired Infrastructure Set for one Gateway.
#[derive(Debug, Clone)]
pub struct DesiredInfrastructure {
    pub workload: Deployment,
    pub exposure: Service,
}

/// Names of the infrastructure objects provisioned for a Gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedInfra {
    pub workload: String,
    pub exposure: String,
}

/// Name shared by the Deployment and Service provisioned for a Gateway.
pub fn infra_name(gateway_name: &str) -> String {
    format!("gateway-{gateway_name}")
}

/// Labels selecting the pods (and stamped on all owned objects).
pub(crate) fn infra_labels(gateway_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (GATEWAY_NAME_LABEL.to_string(), gateway_name.to_string()),
    ])
}

/// Owner reference tying an infrastructure object to its Gateway, so the
/// cluster garbage collector cascades deletion.
pub(crate) fn owner_reference(gateway: &Gateway) -> Result<OwnerReference, ControllerError> {
    let name = gateway
        .metadata
        .name
        .clone()
        .ok_or(ControllerError::MissingObjectMeta("name"))?;
    let uid = gateway
        .metadata
        .uid
        .clone()
        .ok_or(ControllerError::MissingObjectMeta("uid"))?;
    Ok(OwnerReference {
        api_version: Gateway::api_version(&()).into_owned(),
        kind: Gateway::kind(&()).into_owned(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Validates the listener set before any API call is made.
///
/// Failures here are operator errors: they surface as validation errors and
/// are never retried faster than the floor interval.
pub(crate) fn validate_listeners(listeners: &[Listener]) -> Result<(), ControllerError> {
    if listeners.is_empty() {
        return Err(ControllerError::Validation(
            "gateway declares no listeners".to_string(),
        ));
    }
    let mut seen = std::collections::BTreeSet::new();
    for listener in listeners {
        if !seen.insert(listener.name.as_str()) {
            return Err(ControllerError::Validation(format!(
                "duplicate listener name {:?}",
                listener.name
            )));
        }
        if !(1..=65535).contains(&listener.port) {
            return Err(ControllerError::Validation(format!(
                "listener {:?} port {} out of range",
                listener.name, listener.port
            )));
        }
    }
    Ok(())
}

/// Stable hash of a desired object spec, stored as an annotation so an
/// unchanged logical input skips the write.
pub(crate) fn config_hash<T: Serialize>(spec: &T) -> Result<String, ControllerError> {
    let encoded = serde_json::to_string(spec)?;
    let mut hasher = DefaultHasher::new();
    encoded.hash(&mut hasher);
    Ok(format!("{:x}", hasher.finish()))
}

/// Computes the full desired Infrastructure Set. Pure and total over valid
/// inputs; listener port/protocol combinations map directly to Service ports.
pub fn desired_infrastructure(
    gateway: &Gateway,
    params: Option<&GatewayDeployment>,
) -> Result<DesiredInfrastructure, ControllerError> {
    validate_listeners(&gateway.spec.listeners)?;
    Ok(DesiredInfrastructure {
        workload: workload::desired_workload(gateway, params)?,
        exposure: exposure::desired_exposure(gateway)?,
    })
}

/// Creates or updates the Infrastructure Set for a Gateway.
///
/// Repeated calls with an unchanged logical input issue zero writes.
pub async fn ensure_infrastructure(
    client: &Client,
    gateway: &Gateway,
    params: Option<&GatewayDeployment>,
) -> Result<ProvisionedInfra, ControllerError> {
    let namespace = gateway
        .metadata
        .namespace
        .as_deref()
        .ok_or(ControllerError::MissingObjectMeta("namespace"))?;
    let desired = desired_infrastructure(gateway, params)?;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    apply_if_changed(&deployments, &desired.workload, "Deployment").await?;

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    apply_if_changed(&services, &desired.exposure, "Service").await?;

    Ok(ProvisionedInfra {
        workload: object_name(&desired.workload)?,
        exposure: object_name(&desired.exposure)?,
    })
}

fn object_name<K: Resource>(obj: &K) -> Result<String, ControllerError> {
    obj.meta()
        .name
        .clone()
        .ok_or(ControllerError::MissingObjectMeta("name"))
}

/// Server-side applies `desired` unless the live object already carries the
/// same config hash.
async fn apply_if_changed<K>(api: &Api<K>, desired: &K, kind: &str) -> Result<bool, ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
    let name = object_name(desired)?;
    let desired_hash = desired
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(CONFIG_HASH_ANNOTATION))
        .cloned()
        .ok_or(ControllerError::MissingObjectMeta("config-hash annotation"))?;

    if let Some(existing) = api.get_opt(&name).await? {
        let live_hash = existing
            .meta()
            .annotations
            .as_ref()
            .and_then(|a| a.get(CONFIG_HASH_ANNOTATION));
        if live_hash == Some(&desired_hash) {
            debug!("{} {} already up to date, skipping apply", kind, name);
            return Ok(false);
        }
    }

    let payload = apply_payload(desired)?;
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&payload),
    )
    .await
    .map_err(|e| match e {
        kube::Error::Api(ae) => ControllerError::Provisioning(format!(
            "{kind} {name} apply rejected: {}",
            ae.message
        )),
        other => ControllerError::Kube(other),
    })?;

    info!("Applied {} {}", kind, name);
    Ok(true)
}

/// Typed k8s-openapi objects serialize without apiVersion/kind; server-side
/// apply requires both, so they are injected into the payload.
fn apply_payload<K>(obj: &K) -> Result<serde_json::Value, ControllerError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(obj)?;
    value["apiVersion"] = serde_json::Value::String(K::api_version(&()).into_owned());
    value["kind"] = serde_json::Value::String(K::kind(&()).into_owned());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::ListenerProtocol;

    #[test]
    fn test_desired_infrastructure_is_deterministic() {
        let gateway = make_gateway("http", "apps", "edge", vec![make_listener("http", ListenerProtocol::Http, 80)]);

        let first = desired_infrastructure(&gateway, None).unwrap();
        let second = desired_infrastructure(&gateway, None).unwrap();

        let hash = |d: &Deployment| {
            d.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(CONFIG_HASH_ANNOTATION))
                .cloned()
        };
        assert_eq!(hash(&first.workload), hash(&second.workload));
        assert!(hash(&first.workload).is_some());
    }

    #[test]
    fn test_parameters_change_the_hash() {
        let gateway = make_gateway("http", "apps", "edge", vec![make_listener("http", ListenerProtocol::Http, 80)]);
        let params = make_gateway_deployment("apps", "params", Some(3), None);

        let plain = desired_infrastructure(&gateway, None).unwrap();
        let tuned = desired_infrastructure(&gateway, Some(&params)).unwrap();

        let hash = |d: &Deployment| {
            d.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(CONFIG_HASH_ANNOTATION))
                .cloned()
        };
        assert_ne!(hash(&plain.workload), hash(&tuned.workload));
    }

    #[test]
    fn test_no_listeners_is_a_validation_error() {
        let gateway = make_gateway("http", "apps", "edge", vec![]);

        let err = desired_infrastructure(&gateway, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_duplicate_listener_names_rejected() {
        let gateway = make_gateway(
            "http",
            "apps",
            "edge",
            vec![
                make_listener("http", ListenerProtocol::Http, 80),
                make_listener("http", ListenerProtocol::Http, 8080),
            ],
        );

        let err = desired_infrastructure(&gateway, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        let gateway = make_gateway("http", "apps", "edge", vec![make_listener("http", ListenerProtocol::Http, 0)]);

        let err = desired_infrastructure(&gateway, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_owner_reference_points_at_gateway() {
        let gateway = make_gateway("http", "apps", "edge", vec![make_listener("http", ListenerProtocol::Http, 80)]);

        let infra = desired_infrastructure(&gateway, None).unwrap();
        let owners = infra.workload.metadata.owner_references.as_ref().unwrap();

        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Gateway");
        assert_eq!(owners[0].name, "http");
        assert_eq!(owners[0].controller, Some(true));
    }
}
