//! Prints the AppPlatform CRD as YAML for installation.

use anyhow::Result;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let yaml = serde_yaml::to_string(&appplatform_k8s::crd::AppPlatform::crd())?;
    print!("{yaml}");
    Ok(())
}
