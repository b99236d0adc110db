//! Namespace set registry
//!
//! An instance maintains three independent namespace memberships: *managed*
//! namespaces (full application lifecycle delegated, discovered from the
//! delegation label on the Namespace object), *source* namespaces
//! (application objects may originate there, listed on the spec), and
//! *appset-source* namespaces (ApplicationSet objects may originate there,
//! listed on the spec). The sets are rebuilt from live cluster state plus
//! the spec at the start of every pass; nothing here is a durable record —
//! the cleanup sweep in the RBAC manager trusts labels on the cluster, not
//! these maps.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use kube::ResourceExt;

use crate::controller::context::{ReconcileContext, LABEL_MANAGED_BY};
use crate::crd::AppPlatform;
use crate::error::{Error, Result};

/// The three independent memberships an instance maintains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceSetKind {
    Managed,
    Source,
    AppsetSource,
}

/// Namespace name → opaque marker, one map per membership.
#[derive(Clone, Debug, Default)]
pub struct NamespaceSets {
    managed: BTreeMap<String, String>,
    source: BTreeMap<String, String>,
    appset_source: BTreeMap<String, String>,
}

impl NamespaceSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        kind: NamespaceSetKind,
        namespace: impl Into<String>,
        marker: impl Into<String>,
    ) {
        self.set_mut(kind).insert(namespace.into(), marker.into());
    }

    pub fn set(&self, kind: NamespaceSetKind) -> &BTreeMap<String, String> {
        match kind {
            NamespaceSetKind::Managed => &self.managed,
            NamespaceSetKind::Source => &self.source,
            NamespaceSetKind::AppsetSource => &self.appset_source,
        }
    }

    fn set_mut(&mut self, kind: NamespaceSetKind) -> &mut BTreeMap<String, String> {
        match kind {
            NamespaceSetKind::Managed => &mut self.managed,
            NamespaceSetKind::Source => &mut self.source,
            NamespaceSetKind::AppsetSource => &mut self.appset_source,
        }
    }

    pub fn contains(&self, kind: NamespaceSetKind, namespace: &str) -> bool {
        self.set(kind).contains_key(namespace)
    }
}

/// Build the three sets for this pass.
///
/// Managed membership comes from the delegation label on live Namespace
/// objects (plus the instance's own namespace, which is always managed);
/// source and appset-source membership comes from the spec lists.
pub async fn discover(
    ctx: &ReconcileContext,
    platform: &AppPlatform,
) -> Result<NamespaceSets> {
    let mut sets = NamespaceSets::new();
    let marker = ctx.managed_by_value();

    sets.insert(
        NamespaceSetKind::Managed,
        ctx.instance_namespace.clone(),
        marker.clone(),
    );

    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let selector = format!("{LABEL_MANAGED_BY}={marker}");
    let delegated = namespaces
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(|e| Error::cluster_api("list", "Namespace", selector.as_str(), e))?;
    for ns in delegated {
        sets.insert(NamespaceSetKind::Managed, ns.name_any(), marker.clone());
    }

    for ns in &platform.spec.source_namespaces {
        sets.insert(NamespaceSetKind::Source, ns.clone(), marker.clone());
    }
    for ns in &platform.spec.appset_source_namespaces {
        sets.insert(NamespaceSetKind::AppsetSource, ns.clone(), marker.clone());
    }

    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_are_independent() {
        let mut sets = NamespaceSets::new();
        sets.insert(NamespaceSetKind::Managed, "team-a", "m");
        sets.insert(NamespaceSetKind::Source, "team-b", "m");

        assert!(sets.contains(NamespaceSetKind::Managed, "team-a"));
        assert!(!sets.contains(NamespaceSetKind::Source, "team-a"));
        assert!(sets.contains(NamespaceSetKind::Source, "team-b"));
        assert!(!sets.contains(NamespaceSetKind::AppsetSource, "team-b"));
    }

    #[test]
    fn test_duplicate_insert_keeps_single_entry() {
        let mut sets = NamespaceSets::new();
        sets.insert(NamespaceSetKind::Source, "team-a", "first");
        sets.insert(NamespaceSetKind::Source, "team-a", "second");

        let set = sets.set(NamespaceSetKind::Source);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("team-a").map(String::as_str), Some("second"));
    }
}
