//! Reverse-lookup indexes
//!
//! Cross-resource propagation is push-based: when a GatewayClass's
//! acceptance changes, its Gateways are re-enqueued; when a Gateway's
//! status changes, its routes are re-enqueued; when a parameters object
//! appears, classes referencing it are re-enqueued. These indexes are built
//! from the forward references observed during reconciliation; no
//! back-pointers live on the objects themselves.
//!
//! The structure is owned by the controller and shared behind a lock; its
//! lifecycle is tied to dispatcher startup and shutdown.

use std::collections::{BTreeMap, BTreeSet};

use crate::queue::ObjectKey;

/// Namespace/name pair identifying a parameters object.
pub type ParamsRef = (String, String);

/// Forward bookkeeping plus the reverse lookups derived from it.
#[derive(Debug, Default)]
pub struct ReverseIndexes {
    // class name -> gateways referencing it
    gateways_by_class: BTreeMap<String, BTreeSet<ObjectKey>>,
    // gateway key -> class name (forward edge, for edge replacement)
    class_by_gateway: BTreeMap<ObjectKey, String>,

    // gateway key -> routes referencing it
    routes_by_gateway: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,
    // route key -> parent gateway keys (forward edge)
    gateways_by_route: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,

    // parameters object -> class names referencing it
    classes_by_params: BTreeMap<ParamsRef, BTreeSet<String>>,
    // class name -> parameters object (forward edge)
    params_by_class: BTreeMap<String, ParamsRef>,
}

impl ReverseIndexes {
    /// Records (or replaces) the gateway→class edge.
    pub fn set_gateway_class(&mut self, gateway: ObjectKey, class_name: String) {
        if let Some(previous) = self.class_by_gateway.get(&gateway) {
            if *previous == class_name {
                return;
            }
            let stale = previous.clone();
            if let Some(set) = self.gateways_by_class.get_mut(&stale) {
                set.remove(&gateway);
                if set.is_empty() {
                    self.gateways_by_class.remove(&stale);
                }
            }
        }
        self.gateways_by_class
            .entry(class_name.clone())
            .or_default()
            .insert(gateway.clone());
        self.class_by_gateway.insert(gateway, class_name);
    }

    /// Drops a deleted gateway and returns the routes that referenced it,
    /// so their acceptance can be recomputed.
    pub fn remove_gateway(&mut self, gateway: &ObjectKey) -> Vec<ObjectKey> {
        if let Some(class_name) = self.class_by_gateway.remove(gateway) {
            if let Some(set) = self.gateways_by_class.get_mut(&class_name) {
                set.remove(gateway);
                if set.is_empty() {
                    self.gateways_by_class.remove(&class_name);
                }
            }
        }
        self.routes_by_gateway
            .get(gateway)
            .map(|routes| routes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn gateways_for_class(&self, class_name: &str) -> Vec<ObjectKey> {
        self.gateways_by_class
            .get(class_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Records (or replaces) the route→parents edges.
    pub fn set_route_parents(&mut self, route: ObjectKey, parents: BTreeSet<ObjectKey>) {
        if let Some(previous) = self.gateways_by_route.get(&route) {
            for stale in previous.difference(&parents) {
                if let Some(set) = self.routes_by_gateway.get_mut(stale) {
                    set.remove(&route);
                    if set.is_empty() {
                        self.routes_by_gateway.remove(stale);
                    }
                }
            }
        }
        for parent in &parents {
            self.routes_by_gateway
                .entry(parent.clone())
                .or_default()
                .insert(route.clone());
        }
        if parents.is_empty() {
            self.gateways_by_route.remove(&route);
        } else {
            self.gateways_by_route.insert(route, parents);
        }
    }

    pub fn remove_route(&mut self, route: &ObjectKey) {
        if let Some(parents) = self.gateways_by_route.remove(route) {
            for parent in parents {
                if let Some(set) = self.routes_by_gateway.get_mut(&parent) {
                    set.remove(route);
                    if set.is_empty() {
                        self.routes_by_gateway.remove(&parent);
                    }
                }
            }
        }
    }

    pub fn routes_for_gateway(&self, gateway: &ObjectKey) -> Vec<ObjectKey> {
        self.routes_by_gateway
            .get(gateway)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Records (or clears) the class→parameters edge.
    pub fn set_class_parameters(&mut self, class_name: &str, params: Option<ParamsRef>) {
        if let Some(previous) = self.params_by_class.get(class_name) {
            if Some(previous) == params.as_ref() {
                return;
            }
            let stale = previous.clone();
            if let Some(set) = self.classes_by_params.get_mut(&stale) {
                set.remove(class_name);
                if set.is_empty() {
                    self.classes_by_params.remove(&stale);
                }
            }
            self.params_by_class.remove(class_name);
        }
        if let Some(params) = params {
            self.classes_by_params
                .entry(params.clone())
                .or_default()
                .insert(class_name.to_string());
            self.params_by_class.insert(class_name.to_string(), params);
        }
    }

    /// Drops a deleted class and returns the gateways that referenced it.
    pub fn remove_class(&mut self, class_name: &str) -> Vec<ObjectKey> {
        self.set_class_parameters(class_name, None);
        self.gateways_for_class(class_name)
    }

    pub fn classes_for_parameters(&self, namespace: &str, name: &str) -> Vec<String> {
        self.classes_by_params
            .get(&(namespace.to_string(), name.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
