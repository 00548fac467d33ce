//! Kubernetes resource watchers.
//!
//! Each watcher turns a watch stream into work-queue keys. The streams are
//! level-style: on (re)start the watcher lists current cluster state, so
//! the queue is reconstructed from scratch after a crash and does not need
//! to be durable.
//!
//! Direct resources (GatewayClass/Gateway/HTTPRoute) enqueue their own key.
//! Dependency resources fan out through indexes or labels: a
//! GatewayDeployment event enqueues the classes referencing it, and events
//! on owned infrastructure (Deployment/Service, selected by the managed-by
//! label) enqueue the owning Gateway.

use std::sync::{Arc, RwLock};

use futures::TryStreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::{Client, Resource};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use tracing::info;

use crds::{Gateway, GatewayClass, GatewayDeployment, HTTPRoute};

use crate::error::ControllerError;
use crate::index::ReverseIndexes;
use crate::provision::{GATEWAY_NAME_LABEL, MANAGED_BY_LABEL_QUERY};
use crate::queue::{ObjectKey, ResourceKind, WorkQueue};

/// Generic watch loop: streams touched objects (including deletions) and
/// maps each to zero or more queue keys.
async fn watch_and_enqueue<K, F>(
    api: Api<K>,
    config: watcher::Config,
    queue: Arc<WorkQueue>,
    resource_name: &str,
    map_fn: F,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    F: Fn(&K) -> Vec<ObjectKey>,
{
    info!("Starting {} watcher", resource_name);

    let stream = watcher(api, config).default_backoff().touched_objects();
    futures::pin_mut!(stream);

    while let Some(obj) = stream.try_next().await.map_err(|e| {
        ControllerError::Watch(format!("{resource_name} watch stream failed: {e}"))
    })? {
        for key in map_fn(&obj) {
            queue.add(key);
        }
    }

    Ok(())
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    client: Client,
    queue: Arc<WorkQueue>,
    indexes: Arc<RwLock<ReverseIndexes>>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(client: Client, queue: Arc<WorkQueue>, indexes: Arc<RwLock<ReverseIndexes>>) -> Self {
        Self {
            client,
            queue,
            indexes,
        }
    }

    /// Watches GatewayClass resources.
    pub async fn watch_gateway_classes(&self) -> Result<(), ControllerError> {
        let api: Api<GatewayClass> = Api::all(self.client.clone());
        watch_and_enqueue(
            api,
            watcher::Config::default(),
            Arc::clone(&self.queue),
            "GatewayClass",
            |class: &GatewayClass| {
                class
                    .metadata
                    .name
                    .clone()
                    .map(|name| ObjectKey::cluster(ResourceKind::GatewayClass, name))
                    .into_iter()
                    .collect()
            },
        )
        .await
    }

    /// Watches Gateway resources.
    pub async fn watch_gateways(&self) -> Result<(), ControllerError> {
        let api: Api<Gateway> = Api::all(self.client.clone());
        watch_and_enqueue(
            api,
            watcher::Config::default(),
            Arc::clone(&self.queue),
            "Gateway",
            |gateway: &Gateway| namespaced_key(gateway, ResourceKind::Gateway),
        )
        .await
    }

    /// Watches HTTPRoute resources.
    pub async fn watch_http_routes(&self) -> Result<(), ControllerError> {
        let api: Api<HTTPRoute> = Api::all(self.client.clone());
        watch_and_enqueue(
            api,
            watcher::Config::default(),
            Arc::clone(&self.queue),
            "HTTPRoute",
            |route: &HTTPRoute| namespaced_key(route, ResourceKind::HttpRoute),
        )
        .await
    }

    /// Watches GatewayDeployment parameters objects; events re-enqueue the
    /// classes whose parametersRef targets the object.
    pub async fn watch_parameters(&self) -> Result<(), ControllerError> {
        let api: Api<GatewayDeployment> = Api::all(self.client.clone());
        let indexes = Arc::clone(&self.indexes);
        watch_and_enqueue(
            api,
            watcher::Config::default(),
            Arc::clone(&self.queue),
            "GatewayDeployment",
            move |params: &GatewayDeployment| {
                let (Some(namespace), Some(name)) =
                    (params.metadata.namespace.as_ref(), params.metadata.name.as_ref())
                else {
                    return Vec::new();
                };
                let guard = match indexes.read() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard
                    .classes_for_parameters(namespace, name)
                    .into_iter()
                    .map(|class| ObjectKey::cluster(ResourceKind::GatewayClass, class))
                    .collect()
            },
        )
        .await
    }

    /// Watches owned exposure Services; events re-enqueue the owning Gateway.
    pub async fn watch_exposures(&self) -> Result<(), ControllerError> {
        let api: Api<Service> = Api::all(self.client.clone());
        watch_and_enqueue(
            api,
            watcher::Config::default().labels(MANAGED_BY_LABEL_QUERY),
            Arc::clone(&self.queue),
            "Service",
            owning_gateway_key,
        )
        .await
    }

    /// Watches owned proxy Deployments; events re-enqueue the owning Gateway.
    pub async fn watch_workloads(&self) -> Result<(), ControllerError> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        watch_and_enqueue(
            api,
            watcher::Config::default().labels(MANAGED_BY_LABEL_QUERY),
            Arc::clone(&self.queue),
            "Deployment",
            owning_gateway_key,
        )
        .await
    }
}

fn namespaced_key<K: Resource>(obj: &K, kind: ResourceKind) -> Vec<ObjectKey> {
    let meta = obj.meta();
    match (meta.namespace.as_ref(), meta.name.as_ref()) {
        (Some(namespace), Some(name)) => {
            vec![ObjectKey::namespaced(kind, namespace.clone(), name.clone())]
        }
        _ => Vec::new(),
    }
}

/// Maps an owned infrastructure object back to its Gateway via labels.
fn owning_gateway_key<K: Resource>(obj: &K) -> Vec<ObjectKey> {
    let meta = obj.meta();
    let gateway_name = meta
        .labels
        .as_ref()
        .and_then(|labels| labels.get(GATEWAY_NAME_LABEL));
    match (meta.namespace.as_ref(), gateway_name) {
        (Some(namespace), Some(name)) => vec![ObjectKey::namespaced(
            ResourceKind::Gateway,
            namespace.clone(),
            name.clone(),
        )],
        _ => Vec::new(),
    }
}
