//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the shared work
//! queue, reverse indexes, reconciler, watchers, and dispatcher together,
//! and runs them until one of them exits.

use std::sync::{Arc, RwLock};

use kube::Client;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ControllerError;
use crate::index::ReverseIndexes;
use crate::queue::{Dispatcher, WorkQueue};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;

/// Main controller for gateway provisioning.
#[derive(Debug)]
pub struct Controller {
    queue: Arc<WorkQueue>,
    gateway_class_watcher: JoinHandle<Result<(), ControllerError>>,
    gateway_watcher: JoinHandle<Result<(), ControllerError>>,
    http_route_watcher: JoinHandle<Result<(), ControllerError>>,
    parameters_watcher: JoinHandle<Result<(), ControllerError>>,
    exposure_watcher: JoinHandle<Result<(), ControllerError>>,
    workload_watcher: JoinHandle<Result<(), ControllerError>>,
    dispatcher: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(controller_name: String, workers: usize) -> Result<Self, ControllerError> {
        info!("Initializing gateway controller as {:?}", controller_name);

        let client = Client::try_default().await?;

        let queue = WorkQueue::new();
        let indexes = Arc::new(RwLock::new(ReverseIndexes::default()));

        let reconciler = Arc::new(Reconciler::new(
            client.clone(),
            Arc::clone(&queue),
            Arc::clone(&indexes),
            controller_name,
        ));

        // Watchers share one instance; each watch loop runs in its own task.
        let watcher_instance = Arc::new(Watcher::new(client, Arc::clone(&queue), indexes));

        let gateway_class_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_gateway_classes().await })
        };

        let gateway_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_gateways().await })
        };

        let http_route_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_http_routes().await })
        };

        let parameters_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_parameters().await })
        };

        let exposure_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_exposures().await })
        };

        let workload_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_workloads().await })
        };

        let dispatcher = tokio::spawn(
            Dispatcher::new(Arc::clone(&queue), reconciler, workers).run(),
        );

        Ok(Self {
            queue,
            gateway_class_watcher,
            gateway_watcher,
            http_route_watcher,
            parameters_watcher,
            exposure_watcher,
            workload_watcher,
            dispatcher,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Gateway controller running");

        // Wait for any watcher or the dispatcher to exit (they should run
        // forever); then stop the queue so workers drain out.
        let result = tokio::select! {
            result = &mut self.gateway_class_watcher => {
                flatten_watch("GatewayClass", result)
            }
            result = &mut self.gateway_watcher => {
                flatten_watch("Gateway", result)
            }
            result = &mut self.http_route_watcher => {
                flatten_watch("HTTPRoute", result)
            }
            result = &mut self.parameters_watcher => {
                flatten_watch("GatewayDeployment", result)
            }
            result = &mut self.exposure_watcher => {
                flatten_watch("Service", result)
            }
            result = &mut self.workload_watcher => {
                flatten_watch("Deployment", result)
            }
            result = &mut self.dispatcher => {
                result.map_err(|e| ControllerError::Watch(format!("dispatcher panicked: {e}")))
            }
        };

        self.queue.shutdown();
        result?;

        Ok(())
    }
}

fn flatten_watch(
    resource_name: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{resource_name} watcher panicked: {e}")))?
        .map_err(|e| ControllerError::Watch(format!("{resource_name} watcher error: {e}")))
}
