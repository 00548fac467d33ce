//! Prints the CRD manifests for all resource types as multi-document YAML.
//!
//! Usage: `cargo run --bin crdgen > deploy/crds.yaml`

use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        serde_yaml::to_string(&crds::GatewayClass::crd())?,
        serde_yaml::to_string(&crds::Gateway::crd())?,
        serde_yaml::to_string(&crds::HTTPRoute::crd())?,
        serde_yaml::to_string(&crds::GatewayDeployment::crd())?,
    ];
    print!("{}", crds.join("---\n"));
    Ok(())
}
