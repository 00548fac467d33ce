//! GatewayClass reconciler
//!
//! Decides class acceptance. Classes declaring another controller's
//! identity are never touched. A changed Accepted condition re-enqueues
//! every Gateway referencing the class, via the reverse index.

use tracing::{debug, info};

use crds::{Condition, ConditionStatus, GatewayClass};

use super::parameters::ParameterResolution;
use super::{Reconciler, update_status_with_retry};
use crate::conditions;
use crate::error::ControllerError;
use crate::queue::{ObjectKey, Requeue};

impl Reconciler {
    pub(crate) async fn reconcile_gateway_class(
        &self,
        key: &ObjectKey,
    ) -> Result<Requeue, ControllerError> {
        let Some(class) = self.gateway_class_api.get_opt(&key.name).await? else {
            info!("GatewayClass {} is gone, dropping index entries", key.name);
            let dependents = self.indexes_write().remove_class(&key.name);
            for gateway in dependents {
                self.queue.add(gateway);
            }
            return Ok(Requeue::None);
        };

        if class.spec.controller_name != self.controller_name {
            debug!(
                "GatewayClass {} is owned by {:?}, ignoring",
                key.name, class.spec.controller_name
            );
            return Ok(Requeue::None);
        }

        // A retryable resolver error propagates here: no condition change
        // this cycle, the dispatcher requeues with backoff.
        let resolution = self.resolve_parameters(&class).await?;
        let condition = accepted_condition(&class, &resolution);

        let changed = update_status_with_retry(&self.gateway_class_api, &key.name, |latest| {
            let status = latest.status.get_or_insert_with(Default::default);
            let (merged, changed) = conditions::merge(&status.conditions, condition.clone());
            if changed {
                status.conditions = merged;
            }
            changed
        })
        .await?;

        if changed {
            info!(
                "GatewayClass {} acceptance changed, re-enqueueing dependent gateways",
                key.name
            );
            let dependents = self.indexes_read().gateways_for_class(&key.name);
            for gateway in dependents {
                self.queue.add(gateway);
            }
        }

        Ok(Requeue::None)
    }
}

/// Acceptance condition for a class owned by this controller.
pub(crate) fn accepted_condition(
    class: &GatewayClass,
    resolution: &ParameterResolution,
) -> Condition {
    let generation = class.metadata.generation;
    match resolution {
        ParameterResolution::Unset | ParameterResolution::Resolved(_) => Condition::new(
            conditions::ACCEPTED,
            ConditionStatus::True,
            "Accepted",
            "GatewayClass has been accepted by the controller",
            generation,
        ),
        ParameterResolution::Invalid(reason) => Condition::new(
            conditions::ACCEPTED,
            ConditionStatus::False,
            "InvalidParameters",
            format!("parametersRef cannot be used: {reason}"),
            generation,
        ),
    }
}
