//! Reconciliation logic for Gateway API resources.
//!
//! One submodule per resource:
//! - `gateway_class`: decides class acceptance (with `parameters`)
//! - `gateway`: gates on class acceptance, provisions infrastructure, and
//!   tracks address/readiness state
//! - `http_route`: computes per-parent route acceptance
//!
//! Every pass is level-triggered: state is recomputed from the objects as
//! currently observed, never advanced by the triggering event alone.

pub mod gateway;
pub mod gateway_class;
pub mod http_route;
pub mod parameters;

#[cfg(test)]
mod http_route_test;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use kube::api::{Api, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crds::GatewayClass;

use crate::error::ControllerError;
use crate::index::ReverseIndexes;
use crate::queue::{ObjectKey, Reconcile, Requeue, ResourceKind, WorkQueue};

/// Attempts per status write before falling back to a standard requeue.
const STATUS_CONFLICT_RETRIES: usize = 3;

/// Reconciles GatewayClass, Gateway, and HTTPRoute resources.
pub struct Reconciler {
    pub(crate) client: Client,
    pub(crate) gateway_class_api: Api<GatewayClass>,
    /// Work queue shared with the watchers, used to push dependents
    pub(crate) queue: Arc<WorkQueue>,
    /// Reverse-lookup indexes shared with the watchers
    pub(crate) indexes: Arc<RwLock<ReverseIndexes>>,
    /// Controller identity owning GatewayClasses and route parent statuses
    pub(crate) controller_name: String,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("controller_name", &self.controller_name)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        client: Client,
        queue: Arc<WorkQueue>,
        indexes: Arc<RwLock<ReverseIndexes>>,
        controller_name: String,
    ) -> Self {
        let gateway_class_api = Api::all(client.clone());
        Self {
            client,
            gateway_class_api,
            queue,
            indexes,
            controller_name,
        }
    }

    pub(crate) fn indexes_read(&self) -> RwLockReadGuard<'_, ReverseIndexes> {
        match self.indexes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn indexes_write(&self) -> RwLockWriteGuard<'_, ReverseIndexes> {
        match self.indexes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Reconcile for Reconciler {
    async fn reconcile(&self, key: ObjectKey) -> Result<Requeue, ControllerError> {
        match key.kind {
            ResourceKind::GatewayClass => self.reconcile_gateway_class(&key).await,
            ResourceKind::Gateway => self.reconcile_gateway(&key).await,
            ResourceKind::HttpRoute => self.reconcile_http_route(&key).await,
        }
    }
}

/// Writes a status mutation under optimistic concurrency.
///
/// The latest object version is fetched, `mutate` recomputes the merge
/// against it, and the write carries its resourceVersion. A stale write is
/// rejected by the API server, at which point the fetch/recompute/write
/// cycle retries immediately, bounded at [`STATUS_CONFLICT_RETRIES`].
///
/// `mutate` returning false means the merge produced no change and no write
/// is issued. Returns whether a write happened. A vanished object is not an
/// error; deletion is handled by the next watch event.
pub(crate) async fn update_status_with_retry<K, F>(
    api: &Api<K>,
    name: &str,
    mut mutate: F,
) -> Result<bool, ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
    F: FnMut(&mut K) -> bool,
{
    for attempt in 1..=STATUS_CONFLICT_RETRIES {
        let Some(mut latest) = api.get_opt(name).await? else {
            return Ok(false);
        };
        if !mutate(&mut latest) {
            return Ok(false);
        }
        match api
            .replace_status(name, &PostParams::default(), serde_json::to_vec(&latest)?)
            .await
        {
            Ok(_) => return Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(
                    "Status write for {} conflicted (attempt {}/{}), refetching",
                    name, attempt, STATUS_CONFLICT_RETRIES
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ControllerError::Conflict(format!(
        "status write for {name} still stale after {STATUS_CONFLICT_RETRIES} attempts"
    )))
}
