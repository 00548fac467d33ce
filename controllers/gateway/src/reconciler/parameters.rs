//! Parameter resolution
//!
//! Resolves a GatewayClass's optional `parametersRef` into a
//! [`ParameterResolution`]. Transient API failures are distinguished from
//! "not found": they propagate as retryable errors and never produce
//! `Invalid`. Resolution has no side effects on cluster state; it only
//! records the params→class reverse-index edge so that creation of the
//! referenced object later re-enqueues the class.

use kube::api::Api;

use crds::{GatewayClass, GatewayDeployment, ParametersReference};

use super::Reconciler;
use crate::error::ControllerError;

/// API group of the parameters object this controller consumes.
pub(crate) const PARAMETERS_GROUP: &str = "gateways.microscaler.io";
/// Kind of the parameters object this controller consumes.
pub(crate) const PARAMETERS_KIND: &str = "GatewayDeployment";

/// Outcome of resolving a class's parameters reference.
#[derive(Debug)]
pub(crate) enum ParameterResolution {
    /// No reference declared
    Unset,
    /// Reference present and the target found and well-formed
    Resolved(GatewayDeployment),
    /// Reference present but unusable; operator action required
    Invalid(String),
}

/// Checks the reference itself before touching the API. Returns the target
/// (namespace, name) or the reason the reference can never resolve.
pub(crate) fn validate_parameters_ref(
    params_ref: &ParametersReference,
) -> Result<(String, String), String> {
    if params_ref.group != PARAMETERS_GROUP || params_ref.kind != PARAMETERS_KIND {
        return Err(format!(
            "unsupported parameters kind {}/{}, expected {}/{}",
            params_ref.group, params_ref.kind, PARAMETERS_GROUP, PARAMETERS_KIND
        ));
    }
    let Some(namespace) = params_ref.namespace.as_deref().filter(|ns| !ns.is_empty()) else {
        return Err("parametersRef.namespace is required".to_string());
    };
    Ok((namespace.to_string(), params_ref.name.clone()))
}

impl Reconciler {
    pub(crate) async fn resolve_parameters(
        &self,
        class: &GatewayClass,
    ) -> Result<ParameterResolution, ControllerError> {
        let class_name = class
            .metadata
            .name
            .as_deref()
            .ok_or(ControllerError::MissingObjectMeta("name"))?;

        let Some(params_ref) = &class.spec.parameters_ref else {
            self.indexes_write().set_class_parameters(class_name, None);
            return Ok(ParameterResolution::Unset);
        };

        let (namespace, name) = match validate_parameters_ref(params_ref) {
            Ok(target) => target,
            Err(reason) => {
                self.indexes_write().set_class_parameters(class_name, None);
                return Ok(ParameterResolution::Invalid(reason));
            }
        };

        // Record the edge before the lookup so a creation event for a
        // still-missing object re-enqueues this class.
        self.indexes_write()
            .set_class_parameters(class_name, Some((namespace.clone(), name.clone())));

        let api: Api<GatewayDeployment> = Api::namespaced(self.client.clone(), &namespace);
        match api.get_opt(&name).await? {
            Some(params) => Ok(ParameterResolution::Resolved(params)),
            None => Ok(ParameterResolution::Invalid(format!(
                "GatewayDeployment {namespace}/{name} not found"
            ))),
        }
    }
}
