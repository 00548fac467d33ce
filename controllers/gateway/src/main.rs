//! Gateway Controller
//!
//! Provisions running data-plane infrastructure for Gateway API objects:
//! - GatewayClass: accepted when owned by this controller and its optional
//!   parameters reference resolves
//! - Gateway: scheduled once its class is accepted; a proxy Deployment and
//!   LoadBalancer Service are provisioned per Gateway, and address/readiness
//!   are tracked back into status
//! - HTTPRoute: accepted per parent reference against listener policy
//!
//! All reconciliation is level-triggered over a deduplicating work queue.

mod backoff;
mod conditions;
mod controller;
mod error;
mod index;
mod provision;
mod queue;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use std::env;

use anyhow::Result;
use controller::Controller;
use tracing::info;

/// Controller identity claimed on GatewayClasses and route parent statuses.
const DEFAULT_CONTROLLER_NAME: &str = "gateways.microscaler.io/gateway-controller";

/// Worker pool size when RECONCILE_WORKERS is unset.
const DEFAULT_WORKERS: usize = 4;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Gateway Controller");

    // Load configuration from environment variables
    let controller_name =
        env::var("CONTROLLER_NAME").unwrap_or_else(|_| DEFAULT_CONTROLLER_NAME.to_string());
    let workers = env::var("RECONCILE_WORKERS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_WORKERS);

    info!("Configuration:");
    info!("  Controller name: {}", controller_name);
    info!("  Reconcile workers: {}", workers);

    // Initialize and run controller
    let controller = Controller::new(controller_name, workers).await?;
    controller.run().await?;

    Ok(())
}
