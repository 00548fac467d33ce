//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test objects.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service, ServiceStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crds::{
    AllowedRoutes, Condition, ConditionStatus, FromNamespaces, Gateway, GatewayClass,
    GatewayClassSpec, GatewayClassStatus, GatewayDeployment, GatewayDeploymentSpec, GatewaySpec,
    HTTPRoute, HTTPRouteSpec, Listener, ListenerProtocol, NamespaceSelector, ParametersReference,
    ParentReference, RouteNamespaces,
};

pub fn make_listener(name: &str, protocol: ListenerProtocol, port: i32) -> Listener {
    Listener {
        name: name.to_string(),
        protocol,
        port,
        hostname: None,
        allowed_routes: None,
    }
}

pub fn with_namespace_policy(mut listener: Listener, from: FromNamespaces) -> Listener {
    listener.allowed_routes = Some(AllowedRoutes {
        namespaces: Some(RouteNamespaces {
            from: Some(from),
            selector: None,
        }),
        kinds: None,
    });
    listener
}

pub fn with_namespace_selector(
    mut listener: Listener,
    match_labels: &[(&str, &str)],
) -> Listener {
    listener.allowed_routes = Some(AllowedRoutes {
        namespaces: Some(RouteNamespaces {
            from: Some(FromNamespaces::Selector),
            selector: Some(NamespaceSelector {
                match_labels: match_labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }),
        }),
        kinds: None,
    });
    listener
}

pub fn with_hostname(mut listener: Listener, hostname: &str) -> Listener {
    listener.hostname = Some(hostname.to_string());
    listener
}

pub fn make_gateway(name: &str, namespace: &str, class: &str, listeners: Vec<Listener>) -> Gateway {
    Gateway {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            ..Default::default()
        },
        spec: GatewaySpec {
            gateway_class_name: class.to_string(),
            listeners,
        },
        status: None,
    }
}

pub fn make_gateway_class(name: &str, controller_name: &str) -> GatewayClass {
    GatewayClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: GatewayClassSpec {
            controller_name: controller_name.to_string(),
            parameters_ref: None,
        },
        status: None,
    }
}

pub fn with_parameters_ref(mut class: GatewayClass, group: &str, kind: &str, namespace: Option<&str>, name: &str) -> GatewayClass {
    class.spec.parameters_ref = Some(ParametersReference {
        group: group.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.map(str::to_string),
    });
    class
}

pub fn with_accepted_condition(mut class: GatewayClass, status: ConditionStatus, observed_generation: Option<i64>) -> GatewayClass {
    class.status = Some(GatewayClassStatus {
        conditions: vec![Condition::new(
            "Accepted",
            status,
            "Accepted",
            "test fixture",
            observed_generation,
        )],
    });
    class
}

pub fn make_gateway_deployment(
    namespace: &str,
    name: &str,
    replicas: Option<i32>,
    image: Option<&str>,
) -> GatewayDeployment {
    GatewayDeployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: GatewayDeploymentSpec {
            replicas,
            image: image.map(str::to_string),
            log_level: None,
        },
    }
}

pub fn make_route(
    name: &str,
    namespace: &str,
    hostnames: Vec<&str>,
    parents: Vec<ParentReference>,
) -> HTTPRoute {
    HTTPRoute {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: HTTPRouteSpec {
            parent_refs: Some(parents),
            hostnames: Some(hostnames.into_iter().map(str::to_string).collect()),
            rules: None,
        },
        status: None,
    }
}

pub fn make_parent_ref(name: &str, section_name: Option<&str>) -> ParentReference {
    ParentReference {
        group: None,
        kind: None,
        namespace: None,
        name: name.to_string(),
        section_name: section_name.map(str::to_string),
    }
}

/// Exposure Service with the given assigned ingress IP, if any.
pub fn make_exposure_service(ip: Option<&str>) -> Service {
    Service {
        metadata: ObjectMeta::default(),
        spec: None,
        status: ip.map(|ip| ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        }),
    }
}

/// Proxy Deployment reporting the given number of available replicas.
pub fn make_proxy_workload(available_replicas: Option<i32>) -> Deployment {
    Deployment {
        metadata: ObjectMeta::default(),
        spec: None,
        status: Some(DeploymentStatus {
            available_replicas,
            ..Default::default()
        }),
    }
}
