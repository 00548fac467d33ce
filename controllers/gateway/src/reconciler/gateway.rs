//! Gateway reconciler and address/readiness tracker
//!
//! Level-triggered state machine per Gateway:
//! `Unscheduled -> Scheduled -> (Addressed) -> Ready`, recomputed from
//! current inputs every pass. Scheduling is gated on the referenced class
//! being accepted; infrastructure is provisioned idempotently; readiness is
//! derived from the observed Service address and workload availability.
//!
//! Scheduled and Ready (and addresses) are always written together in one
//! status update, so the pair can never read inconsistently. Existing
//! infrastructure is never torn down when the class gate closes; teardown
//! is driven by Gateway deletion only, through owner references.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use tracing::{debug, info};

use crds::{
    AddressType, Condition, ConditionStatus, Gateway, GatewayAddress, GatewayClass,
};

use super::parameters::ParameterResolution;
use super::{Reconciler, update_status_with_retry};
use crate::conditions;
use crate::error::ControllerError;
use crate::provision;
use crate::queue::{ObjectKey, Requeue};

/// Outcome of evaluating the class gate for a Gateway.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ClassGate {
    /// Class exists, is ours, and is Accepted for its current generation
    Admitted,
    /// Referenced class does not exist
    NotFound,
    /// Class is owned by another controller; the Gateway is not ours
    NotOurs,
    /// Class exists but is not (or no longer) accepted
    NotAccepted,
}

/// The gate a Gateway must pass before it may be scheduled: its class must
/// exist, declare our controller identity, and carry Accepted=True computed
/// from the class's current generation.
pub(crate) fn evaluate_class_gate(class: Option<&GatewayClass>, controller_name: &str) -> ClassGate {
    let Some(class) = class else {
        return ClassGate::NotFound;
    };
    if class.spec.controller_name != controller_name {
        return ClassGate::NotOurs;
    }
    let accepted = class.status.as_ref().is_some_and(|status| {
        conditions::is_true_for_generation(
            &status.conditions,
            conditions::ACCEPTED,
            class.metadata.generation,
        )
    });
    if accepted {
        ClassGate::Admitted
    } else {
        ClassGate::NotAccepted
    }
}

/// Addresses the external allocator has assigned to the exposure Service.
pub(crate) fn observed_addresses(exposure: &Service) -> Vec<GatewayAddress> {
    let mut addresses = Vec::new();
    let ingress = exposure
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref());
    for entry in ingress.into_iter().flatten() {
        if let Some(ip) = entry.ip.as_ref().filter(|v| !v.is_empty()) {
            addresses.push(GatewayAddress {
                type_: Some(AddressType::IPAddress),
                value: ip.clone(),
            });
        } else if let Some(hostname) = entry.hostname.as_ref().filter(|v| !v.is_empty()) {
            addresses.push(GatewayAddress {
                type_: Some(AddressType::Hostname),
                value: hostname.clone(),
            });
        }
    }
    addresses
}

pub(crate) fn workload_available(workload: Option<&Deployment>) -> bool {
    workload
        .and_then(|w| w.status.as_ref())
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
        > 0
}

/// Derives the Gateway's addresses and Ready condition from the observed
/// Infrastructure Set. Recomputed every cycle, so a later regression of the
/// address or the workload flips Ready back to False.
pub(crate) fn readiness(
    exposure: Option<&Service>,
    workload: Option<&Deployment>,
    generation: Option<i64>,
) -> (Vec<GatewayAddress>, Condition) {
    let addresses = exposure.map(observed_addresses).unwrap_or_default();
    if addresses.is_empty() {
        return (
            addresses,
            Condition::new(
                conditions::READY,
                ConditionStatus::False,
                "AddressPending",
                "waiting for an address to be assigned to the gateway service",
                generation,
            ),
        );
    }
    if workload_available(workload) {
        (
            addresses,
            Condition::new(
                conditions::READY,
                ConditionStatus::True,
                "Ready",
                "gateway is addressable and the proxy workload is available",
                generation,
            ),
        )
    } else {
        (
            addresses,
            Condition::new(
                conditions::READY,
                ConditionStatus::False,
                "WorkloadNotReady",
                "address assigned but the proxy workload has no available replicas",
                generation,
            ),
        )
    }
}

fn scheduled_condition(status: ConditionStatus, reason: &str, message: String, generation: Option<i64>) -> Condition {
    Condition::new(conditions::SCHEDULED, status, reason, message, generation)
}

fn not_scheduled_ready(generation: Option<i64>) -> Condition {
    Condition::new(
        conditions::READY,
        ConditionStatus::False,
        "NotScheduled",
        "gateway is not scheduled",
        generation,
    )
}

impl Reconciler {
    pub(crate) async fn reconcile_gateway(&self, key: &ObjectKey) -> Result<Requeue, ControllerError> {
        let namespace = key
            .namespace
            .as_deref()
            .ok_or(ControllerError::MissingObjectMeta("namespace"))?;
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);

        let Some(gateway) = api.get_opt(&key.name).await? else {
            info!("Gateway {} is gone, dropping index entries", key);
            let dependents = self.indexes_write().remove_gateway(key);
            for route in dependents {
                self.queue.add(route);
            }
            return Ok(Requeue::None);
        };
        let generation = gateway.metadata.generation;

        self.indexes_write()
            .set_gateway_class(key.clone(), gateway.spec.gateway_class_name.clone());

        let class = self
            .gateway_class_api
            .get_opt(&gateway.spec.gateway_class_name)
            .await?;
        let class = match evaluate_class_gate(class.as_ref(), &self.controller_name) {
            ClassGate::Admitted => class.ok_or(ControllerError::MissingObjectMeta("class"))?,
            ClassGate::NotOurs => {
                debug!("Gateway {} belongs to another controller, ignoring", key);
                return Ok(Requeue::None);
            }
            gate @ (ClassGate::NotFound | ClassGate::NotAccepted) => {
                let (reason, message) = match gate {
                    ClassGate::NotFound => (
                        "ClassNotFound",
                        format!("GatewayClass {:?} does not exist", gateway.spec.gateway_class_name),
                    ),
                    _ => (
                        "ClassNotAccepted",
                        format!("GatewayClass {:?} is not accepted", gateway.spec.gateway_class_name),
                    ),
                };
                // Infrastructure provisioned under previously valid input
                // stays running; only status is updated. The class watch
                // re-enqueues this key when acceptance changes.
                self.write_gateway_status(
                    &api,
                    key,
                    vec![
                        scheduled_condition(ConditionStatus::False, reason, message, generation),
                        not_scheduled_ready(generation),
                    ],
                    None,
                )
                .await?;
                return Ok(Requeue::None);
            }
        };

        let params = match self.resolve_parameters(&class).await? {
            ParameterResolution::Unset => None,
            ParameterResolution::Resolved(params) => Some(params),
            ParameterResolution::Invalid(reason) => {
                self.write_gateway_status(
                    &api,
                    key,
                    vec![
                        scheduled_condition(
                            ConditionStatus::False,
                            "InvalidParameters",
                            format!("class parameters cannot be used: {reason}"),
                            generation,
                        ),
                        not_scheduled_ready(generation),
                    ],
                    None,
                )
                .await?;
                return Err(ControllerError::Validation(reason));
            }
        };

        let infra = match provision::ensure_infrastructure(&self.client, &gateway, params.as_ref())
            .await
        {
            Ok(infra) => infra,
            Err(e) => {
                let reason = if e.is_validation() {
                    "InvalidListeners"
                } else {
                    "ProvisioningFailed"
                };
                self.write_gateway_status(
                    &api,
                    key,
                    vec![
                        scheduled_condition(ConditionStatus::False, reason, e.to_string(), generation),
                        not_scheduled_ready(generation),
                    ],
                    None,
                )
                .await?;
                return Err(e);
            }
        };

        let scheduled = scheduled_condition(
            ConditionStatus::True,
            "Scheduled",
            "gateway infrastructure has been provisioned".to_string(),
            generation,
        );

        // Track the observed Infrastructure Set.
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let exposure = services.get_opt(&infra.exposure).await?;
        let workloads: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let workload = workloads.get_opt(&infra.workload).await?;

        let (addresses, ready) = readiness(exposure.as_ref(), workload.as_ref(), generation);

        self.write_gateway_status(&api, key, vec![scheduled, ready], Some(addresses))
            .await?;

        Ok(Requeue::None)
    }

    /// Writes the Gateway's conditions (and optionally addresses) in a
    /// single status update, then re-enqueues dependent routes when the
    /// status actually changed.
    async fn write_gateway_status(
        &self,
        api: &Api<Gateway>,
        key: &ObjectKey,
        conds: Vec<Condition>,
        addresses: Option<Vec<GatewayAddress>>,
    ) -> Result<bool, ControllerError> {
        let changed = update_status_with_retry(api, &key.name, |latest| {
            let status = latest.status.get_or_insert_with(Default::default);
            let mut changed = false;
            for cond in &conds {
                let (merged, cond_changed) = conditions::merge(&status.conditions, cond.clone());
                if cond_changed {
                    status.conditions = merged;
                    changed = true;
                }
            }
            if let Some(addresses) = &addresses {
                if status.addresses != *addresses {
                    status.addresses = addresses.clone();
                    changed = true;
                }
            }
            changed
        })
        .await?;

        if changed {
            debug!("Gateway {} status changed, re-enqueueing dependent routes", key);
            let dependents = self.indexes_read().routes_for_gateway(key);
            for route in dependents {
                self.queue.add(route);
            }
        }

        Ok(changed)
    }
}
