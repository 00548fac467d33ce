//! Gateway Provisioner Resource Definitions
//!
//! Typed bindings for the Gateway API resources this controller reconciles
//! (GatewayClass, Gateway, HTTPRoute) plus the GatewayDeployment parameters
//! CRD consumed via `spec.parametersRef`.

pub mod condition;
pub mod gateway;
pub mod gateway_class;
pub mod gateway_deployment;
pub mod http_route;

pub use condition::*;
pub use gateway::*;
pub use gateway_class::*;
pub use gateway_deployment::*;
pub use http_route::*;
