//! HTTPRoute reconciler
//!
//! Computes an Accepted condition independently for every parent reference
//! naming a Gateway: one parent's rejection never affects another parent's
//! condition. Parent status entries written by other controllers are
//! preserved untouched.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;
use tracing::info;

use crds::{
    Condition, ConditionStatus, FromNamespaces, Gateway, HTTPRoute, Listener, ListenerProtocol,
    ParentReference, RouteParentStatus,
};

use super::{Reconciler, update_status_with_retry};
use crate::conditions;
use crate::error::ControllerError;
use crate::queue::{ObjectKey, Requeue, ResourceKind};

const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";

/// Acceptance decision for one parent reference.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParentDecision {
    Accepted,
    Rejected {
        reason: &'static str,
        message: String,
    },
}

/// True when the parent reference names a Gateway (the only parent kind
/// this controller attaches routes to).
pub(crate) fn is_gateway_parent(parent: &ParentReference) -> bool {
    parent
        .kind
        .as_deref()
        .map(|kind| kind == "Gateway")
        .unwrap_or(true)
        && parent
            .group
            .as_deref()
            .map(|group| group.is_empty() || group == GATEWAY_GROUP)
            .unwrap_or(true)
}

fn listener_allows_kind(listener: &Listener) -> bool {
    match listener.allowed_routes.as_ref().and_then(|ar| ar.kinds.as_ref()) {
        Some(kinds) if !kinds.is_empty() => kinds.iter().any(|k| {
            k.kind == "HTTPRoute"
                && k.group
                    .as_deref()
                    .map(|g| g.is_empty() || g == GATEWAY_GROUP)
                    .unwrap_or(true)
        }),
        // No explicit kinds: HTTP-capable listeners take HTTPRoutes.
        _ => matches!(listener.protocol, ListenerProtocol::Http | ListenerProtocol::Https),
    }
}

fn listener_allows_namespace(
    listener: &Listener,
    gateway_namespace: &str,
    route_namespace: &str,
    route_namespace_labels: Option<&BTreeMap<String, String>>,
) -> bool {
    let namespaces = listener
        .allowed_routes
        .as_ref()
        .and_then(|ar| ar.namespaces.as_ref());
    let from = namespaces.and_then(|ns| ns.from).unwrap_or_default();
    match from {
        FromNamespaces::Same => route_namespace == gateway_namespace,
        FromNamespaces::All => true,
        FromNamespaces::Selector => {
            let Some(selector) = namespaces.and_then(|ns| ns.selector.as_ref()) else {
                return false;
            };
            let Some(labels) = route_namespace_labels else {
                return false;
            };
            selector
                .match_labels
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
        }
    }
}

/// Wildcard-aware hostname overlap. A leading `*.` label matches any
/// non-empty prefix of labels.
pub(crate) fn hostnames_overlap(a: &str, b: &str) -> bool {
    match (a.strip_prefix("*."), b.strip_prefix("*.")) {
        (None, None) => a == b,
        (Some(suffix), None) => b.len() > suffix.len() && b.ends_with(suffix)
            && b.as_bytes()[b.len() - suffix.len() - 1] == b'.',
        (None, Some(suffix)) => a.len() > suffix.len() && a.ends_with(suffix)
            && a.as_bytes()[a.len() - suffix.len() - 1] == b'.',
        (Some(s1), Some(s2)) => s1 == s2 || s1.ends_with(&format!(".{s2}")) || s2.ends_with(&format!(".{s1}")),
    }
}

fn listener_hostnames_intersect(listener_hostname: Option<&str>, route_hostnames: &[String]) -> bool {
    let Some(listener_hostname) = listener_hostname.filter(|h| !h.is_empty()) else {
        return true;
    };
    if route_hostnames.is_empty() {
        return true;
    }
    route_hostnames
        .iter()
        .any(|hostname| hostnames_overlap(listener_hostname, hostname))
}

/// Decides whether a Gateway (or one listener of it, when `section_name`
/// is given) admits the route.
pub(crate) fn evaluate_parent(
    route_namespace: &str,
    route_hostnames: &[String],
    route_namespace_labels: Option<&BTreeMap<String, String>>,
    gateway: &Gateway,
    section_name: Option<&str>,
) -> ParentDecision {
    let gateway_namespace = gateway
        .metadata
        .namespace
        .as_deref()
        .unwrap_or(route_namespace);

    let candidates: Vec<&Listener> = match section_name {
        Some(section) => match gateway.spec.listeners.iter().find(|l| l.name == section) {
            Some(listener) => vec![listener],
            None => {
                return ParentDecision::Rejected {
                    reason: "NoMatchingListener",
                    message: format!("gateway has no listener named {section:?}"),
                };
            }
        },
        None => gateway.spec.listeners.iter().collect(),
    };

    let mut namespace_denied = false;
    let mut hostname_mismatch = false;

    for listener in candidates {
        if !listener_allows_kind(listener) {
            continue;
        }
        if !listener_allows_namespace(
            listener,
            gateway_namespace,
            route_namespace,
            route_namespace_labels,
        ) {
            namespace_denied = true;
            continue;
        }
        if !listener_hostnames_intersect(listener.hostname.as_deref(), route_hostnames) {
            hostname_mismatch = true;
            continue;
        }
        return ParentDecision::Accepted;
    }

    if namespace_denied {
        ParentDecision::Rejected {
            reason: "NotAllowedByListeners",
            message: format!("no listener allows routes from namespace {route_namespace:?}"),
        }
    } else if hostname_mismatch {
        ParentDecision::Rejected {
            reason: "NoIntersectingHostnames",
            message: "route hostnames do not intersect any listener hostname".to_string(),
        }
    } else {
        ParentDecision::Rejected {
            reason: "NoMatchingListener",
            message: "no listener admits routes of kind HTTPRoute".to_string(),
        }
    }
}

fn parent_condition(decision: ParentDecision, generation: Option<i64>) -> Condition {
    match decision {
        ParentDecision::Accepted => Condition::new(
            conditions::ACCEPTED,
            ConditionStatus::True,
            "Accepted",
            "route is accepted by the gateway",
            generation,
        ),
        ParentDecision::Rejected { reason, message } => Condition::new(
            conditions::ACCEPTED,
            ConditionStatus::False,
            reason,
            message,
            generation,
        ),
    }
}

/// Merges this controller's desired per-parent entries into the status
/// parents list: stale entries of ours are pruned, entries owned by other
/// controllers are untouched. Returns whether anything changed.
pub(crate) fn merge_parent_statuses(
    existing: &mut Vec<RouteParentStatus>,
    desired: &[RouteParentStatus],
    controller_name: &str,
) -> bool {
    let mut changed = false;

    let before = existing.len();
    existing.retain(|entry| {
        entry.controller_name != controller_name
            || desired.iter().any(|d| d.parent_ref == entry.parent_ref)
    });
    if existing.len() != before {
        changed = true;
    }

    for wanted in desired {
        match existing
            .iter_mut()
            .find(|e| e.controller_name == controller_name && e.parent_ref == wanted.parent_ref)
        {
            Some(entry) => {
                for cond in &wanted.conditions {
                    let (merged, cond_changed) = conditions::merge(&entry.conditions, cond.clone());
                    if cond_changed {
                        entry.conditions = merged;
                        changed = true;
                    }
                }
            }
            None => {
                existing.push(wanted.clone());
                changed = true;
            }
        }
    }

    changed
}

impl Reconciler {
    pub(crate) async fn reconcile_http_route(
        &self,
        key: &ObjectKey,
    ) -> Result<Requeue, ControllerError> {
        let namespace = key
            .namespace
            .as_deref()
            .ok_or(ControllerError::MissingObjectMeta("namespace"))?;
        let api: Api<HTTPRoute> = Api::namespaced(self.client.clone(), namespace);

        let Some(route) = api.get_opt(&key.name).await? else {
            info!("HTTPRoute {} is gone, dropping index entries", key);
            self.indexes_write().remove_route(key);
            return Ok(Requeue::None);
        };
        let generation = route.metadata.generation;

        let parent_refs: Vec<ParentReference> = route
            .spec
            .parent_refs
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(is_gateway_parent)
            .collect();

        let parent_keys: BTreeSet<ObjectKey> = parent_refs
            .iter()
            .map(|parent| {
                ObjectKey::namespaced(
                    ResourceKind::Gateway,
                    parent.namespace.as_deref().unwrap_or(namespace),
                    parent.name.clone(),
                )
            })
            .collect();
        self.indexes_write().set_route_parents(key.clone(), parent_keys);

        let route_hostnames = route.spec.hostnames.clone().unwrap_or_default();

        // Namespace labels are only needed when a listener uses a selector
        // policy; fetched at most once per pass.
        let mut namespace_labels: Option<Option<BTreeMap<String, String>>> = None;

        let mut desired = Vec::with_capacity(parent_refs.len());
        for parent in &parent_refs {
            let parent_namespace = parent.namespace.as_deref().unwrap_or(namespace);
            let gateways: Api<Gateway> = Api::namespaced(self.client.clone(), parent_namespace);
            let gateway = gateways.get_opt(&parent.name).await?;

            let decision = match gateway.as_ref() {
                None => ParentDecision::Rejected {
                    reason: "NoMatchingParent",
                    message: format!("Gateway {parent_namespace}/{} does not exist", parent.name),
                },
                Some(gateway) => {
                    let labels = if uses_selector_policy(gateway) {
                        if namespace_labels.is_none() {
                            namespace_labels = Some(self.namespace_labels(namespace).await?);
                        }
                        namespace_labels.as_ref().and_then(|l| l.as_ref())
                    } else {
                        None
                    };
                    evaluate_parent(
                        namespace,
                        &route_hostnames,
                        labels,
                        gateway,
                        parent.section_name.as_deref(),
                    )
                }
            };

            desired.push(RouteParentStatus {
                parent_ref: parent.clone(),
                controller_name: self.controller_name.clone(),
                conditions: vec![parent_condition(decision, generation)],
            });
        }

        let controller_name = self.controller_name.clone();
        update_status_with_retry(&api, &key.name, |latest| {
            let status = latest.status.get_or_insert_with(Default::default);
            merge_parent_statuses(&mut status.parents, &desired, &controller_name)
        })
        .await?;

        Ok(Requeue::None)
    }

    async fn namespace_labels(
        &self,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ControllerError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .get_opt(namespace)
            .await?
            .and_then(|ns| ns.metadata.labels))
    }
}

fn uses_selector_policy(gateway: &Gateway) -> bool {
    gateway.spec.listeners.iter().any(|listener| {
        listener
            .allowed_routes
            .as_ref()
            .and_then(|ar| ar.namespaces.as_ref())
            .and_then(|ns| ns.from)
            == Some(FromNamespaces::Selector)
    })
}
