//! Desired workload computation
//!
//! One proxy Deployment per Gateway. The data-plane proxy binds every
//! listener port; replica count, image, and log level come from the
//! resolved GatewayDeployment parameters when present.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crds::{Gateway, GatewayDeployment, ProxyLogLevel};

use crate::error::ControllerError;

use super::{
    CONFIG_HASH_ANNOTATION, DEFAULT_PROXY_IMAGE, DEFAULT_REPLICAS, config_hash, infra_labels,
    infra_name, owner_reference,
};

pub(crate) fn desired_workload(
    gateway: &Gateway,
    params: Option<&GatewayDeployment>,
) -> Result<Deployment, ControllerError> {
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

    let replicas = params
        .and_then(|p| p.spec.replicas)
        .unwrap_or(DEFAULT_REPLICAS);
    let image = params
        .and_then(|p| p.spec.image.clone())
        .unwrap_or_else(|| DEFAULT_PROXY_IMAGE.to_string());
    let log_level = params
        .and_then(|p| p.spec.log_level)
        .unwrap_or(ProxyLogLevel::Info);

    let labels = infra_labels(gateway_name);

    let ports = gateway
        .spec
        .listeners
        .iter()
        .map(|listener| ContainerPort {
            container_port: listener.port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    let spec = DeploymentSpec {
        replicas: Some(replicas),
        selector: LabelSelector {
            match_labels: Some(labels.clone()),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels.clone()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "proxy".to_string(),
                    image: Some(image),
                    args: Some(vec![
                        "serve".to_string(),
                        format!("--log-level={}", log_level_flag(log_level)),
                    ]),
                    ports: Some(ports),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        },
        ..Default::default()
    };

    let hash = config_hash(&spec)?;

    Ok(Deployment {
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

fn log_level_flag(level: ProxyLogLevel) -> &'static str {
    match level {
        ProxyLogLevel::Debug => "debug",
        ProxyLogLevel::Info => "info",
        ProxyLogLevel::Warn => "warn",
        ProxyLogLevel::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::{GATEWAY_NAME_LABEL, MANAGED_BY_LABEL};
    use crate::test_utils::*;
    use crds::ListenerProtocol;

    #[test]
    fn test_workload_shape() {
        let gateway = make_gateway(
            "http",
            "apps",
            "edge",
            vec![
                make_listener("http", ListenerProtocol::Http, 80),
                make_listener("https", ListenerProtocol::Https, 443),
            ],
        );

        let workload = desired_workload(&gateway, None).unwrap();

        assert_eq!(workload.metadata.name.as_deref(), Some("gateway-http"));
        assert_eq!(workload.metadata.namespace.as_deref(), Some("apps"));

        let spec = workload.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(DEFAULT_REPLICAS));

        let labels = workload.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(GATEWAY_NAME_LABEL).map(String::as_str), Some("http"));
        assert!(labels.contains_key(MANAGED_BY_LABEL));

        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some(DEFAULT_PROXY_IMAGE));
        let ports: Vec<i32> = container
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![80, 443]);
    }

    #[test]
    fn test_parameters_override_replicas_and_image() {
        let gateway = make_gateway("http", "apps", "edge", vec![make_listener("http", ListenerProtocol::Http, 80)]);
        let params = make_gateway_deployment("apps", "params", Some(3), Some("registry.example.com/proxy:v2"));

        let workload = desired_workload(&gateway, Some(&params)).unwrap();

        let spec = workload.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(3));
        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("registry.example.com/proxy:v2"));
    }
}
