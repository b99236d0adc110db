//! Per-pass reconciliation context
//!
//! Everything a reconciliation pass needs to know about the instance it is
//! working for travels on this value: instance identity, scope, the label
//! vocabulary used as the durable "what did we create" record, and the
//! configured TLS service suffix list for ownership resolution. The context
//! is rebuilt from the AppPlatform object at the start of every pass and
//! threaded explicitly through every call; nothing reconciliation-scoped
//! lives in statics.

use kube::{Client, ResourceExt};

use crate::crd::{AppPlatform, Component};
use crate::error::{Error, Result};

/// Label tying a cluster object (or a delegating namespace) back to the
/// owning instance; value is [`InstanceIdentity::managed_by_value`].
pub const LABEL_MANAGED_BY: &str = "appplatform.io/managed-by";

/// Label recording which RBAC purpose a Role/RoleBinding serves.
pub const LABEL_RBAC_PURPOSE: &str = "appplatform.io/rbac-purpose";

/// Label identifying secrets that register an external cluster.
pub const LABEL_SECRET_TYPE: &str = "appplatform.io/secret-type";

/// Value of [`LABEL_SECRET_TYPE`] for cluster secrets.
pub const SECRET_TYPE_CLUSTER: &str = "cluster";

/// Service name suffixes whose owner chain is followed when resolving TLS
/// certificate secret ownership.
pub const DEFAULT_TLS_SERVICE_SUFFIXES: &[&str] = &["-repo-server-tls", "-server-tls"];

/// The identity of the instance a pass works for; everything name- and
/// label-shaped derives from here.
#[derive(Clone, Debug)]
pub struct InstanceIdentity {
    pub instance_name: String,
    pub instance_namespace: String,
    pub instance_uid: String,
    pub cluster_scoped: bool,
}

impl InstanceIdentity {
    pub fn from_platform(platform: &AppPlatform) -> Result<Self> {
        let instance_namespace = platform.namespace().ok_or_else(|| {
            Error::ConfigError("AppPlatform object has no namespace".to_string())
        })?;

        Ok(Self {
            instance_name: platform.name_any(),
            instance_namespace,
            instance_uid: platform.metadata.uid.clone().unwrap_or_default(),
            cluster_scoped: platform.spec.cluster_scoped,
        })
    }

    /// Value of the managed-by label for this instance.
    ///
    /// Namespace-qualified so two instances with the same name in different
    /// namespaces never claim each other's objects during cleanup sweeps.
    pub fn managed_by_value(&self) -> String {
        format!("{}.{}", self.instance_namespace, self.instance_name)
    }

    /// Name of a namespaced component resource, e.g. `demo-server`.
    pub fn component_name(&self, component: Component) -> String {
        format!("{}-{}", self.instance_name, component.suffix())
    }

    /// Cluster-unique name for cluster-scoped RBAC objects.
    pub fn cluster_resource_name(&self, component: Component) -> String {
        format!(
            "{}-{}-{}",
            self.instance_name,
            self.instance_namespace,
            component.suffix()
        )
    }
}

/// State threaded through one reconciliation pass for one instance.
#[derive(Clone)]
pub struct ReconcileContext {
    pub client: Client,
    pub identity: InstanceIdentity,
    pub dry_run: bool,
    /// Suffix list for [`crate::controller::ownership`]; configuration data,
    /// not hard-coded in the resolver.
    pub tls_service_suffixes: Vec<String>,
}

impl ReconcileContext {
    pub fn new(client: Client, platform: &AppPlatform, dry_run: bool) -> Result<Self> {
        Ok(Self {
            client,
            identity: InstanceIdentity::from_platform(platform)?,
            dry_run,
            tls_service_suffixes: DEFAULT_TLS_SERVICE_SUFFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        })
    }
}

impl std::ops::Deref for ReconcileContext {
    type Target = InstanceIdentity;

    fn deref(&self) -> &InstanceIdentity {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> InstanceIdentity {
        InstanceIdentity {
            instance_name: "demo".to_string(),
            instance_namespace: "platform".to_string(),
            instance_uid: "uid-1".to_string(),
            cluster_scoped: false,
        }
    }

    #[test]
    fn test_managed_by_value_is_namespace_qualified() {
        assert_eq!(identity().managed_by_value(), "platform.demo");
    }

    #[test]
    fn test_component_names() {
        let identity = identity();
        assert_eq!(
            identity.component_name(Component::ApplicationController),
            "demo-application-controller"
        );
        assert_eq!(
            identity.cluster_resource_name(Component::Server),
            "demo-platform-server"
        );
    }

    #[test]
    fn test_default_suffixes_cover_both_tls_services() {
        assert_eq!(
            DEFAULT_TLS_SERVICE_SUFFIXES,
            &["-repo-server-tls", "-server-tls"]
        );
    }
}
