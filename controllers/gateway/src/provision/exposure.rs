//! Desired network exposure computation
//!
//! One LoadBalancer Service per Gateway. Listener ports map 1:1 to Service
//! ports; the address the external allocator assigns to this Service is
//! what the readiness tracker reports on the Gateway.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crds::Gateway;

use crate::error::ControllerError;

use super::{CONFIG_HASH_ANNOTATION, config_hash, infra_labels, infra_name, owner_reference};

pub(crate) fn desired_exposure(gateway: &Gateway) -> Result<Service, ControllerError> {
    let gateway_name = gateway
        .metadata
        .name
        .as_deref()
        .ok_or(ControllerError::MissingObjectMeta("name"))?;
    let namespace = gateway
        .metadata
        .namespace
        .clone()
        .ok_or(ControllerError::MissingObjectMeta("namespace"))?;

    let labels = infra_labels(gateway_name);

    let ports = gateway
        .spec
        .listeners
        .iter()
        .map(|listener| ServicePort {
            name: Some(listener.name.clone()),
            port: listener.port,
            target_port: Some(IntOrString::Int(listener.port)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    let spec = ServiceSpec {
        type_: Some("LoadBalancer".to_string()),
        selector: Some(labels.clone()),
        ports: Some(ports),
        ..Default::default()
    };

    let hash = config_hash(&spec)?;

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(infra_name(gateway_name)),
            namespace: Some(namespace),
            labels: Some(labels),
            annotations: Some([(CONFIG_HASH_ANNOTATION.to_string(), hash)].into()),
            owner_references: Some(vec![owner_reference(gateway)?]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}
