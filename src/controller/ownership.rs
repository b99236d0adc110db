//! TLS secret ownership resolution
//!
//! Decides whether a certificate Secret belongs to the managing instance,
//! either directly (a recorded annotation pair) or through one hop of
//! indirection: the Secret is owned by one of the instance's TLS Services,
//! which is in turn owned by the instance. At most one hop is followed;
//! deeper chains are not traversed. The resolver is read-only.
//!
//! Which Service owners are "of interest" is decided by a suffix list
//! carried on the [`ReconcileContext`], so new component names are a
//! configuration change, not a code change.

use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::Api;
use kube::Resource;
use tracing::warn;

use crate::controller::context::ReconcileContext;
use crate::crd::AppPlatform;
use crate::error::{Error, Result};

/// Annotation recording the owning instance name on secrets created out of
/// band (no owner references).
pub const INSTANCE_NAME_ANNOTATION: &str = "appplatform.io/instance-name";

/// Annotation recording the owning instance namespace, paired with
/// [`INSTANCE_NAME_ANNOTATION`].
pub const INSTANCE_NAMESPACE_ANNOTATION: &str = "appplatform.io/instance-namespace";

/// The resolved owner of a secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceOwner {
    pub name: String,
    pub namespace: String,
}

/// Names of Service-kind owners worth following, in owner-reference order.
pub(crate) fn qualifying_service_owners(
    owner_refs: &[OwnerReference],
    suffixes: &[String],
) -> Vec<String> {
    owner_refs
        .iter()
        .filter(|r| r.kind == "Service")
        .filter(|r| suffixes.iter().any(|s| r.name.ends_with(s.as_str())))
        .map(|r| r.name.clone())
        .collect()
}

/// The instance owner among a Service's owner references, if any.
pub(crate) fn instance_owner_of(
    owner_refs: &[OwnerReference],
    namespace: &str,
) -> Option<InstanceOwner> {
    let kind = AppPlatform::kind(&());
    owner_refs
        .iter()
        .find(|r| r.kind == kind.as_ref())
        .map(|r| InstanceOwner {
            name: r.name.clone(),
            namespace: namespace.to_string(),
        })
}

/// Owner recorded on the secret's annotation pair, if both halves are set.
pub(crate) fn annotation_owner(secret: &Secret) -> Option<InstanceOwner> {
    let annotations = secret.metadata.annotations.as_ref()?;
    let name = annotations.get(INSTANCE_NAME_ANNOTATION)?;
    let namespace = annotations.get(INSTANCE_NAMESPACE_ANNOTATION)?;
    Some(InstanceOwner {
        name: name.clone(),
        namespace: namespace.clone(),
    })
}

/// Resolve the instance owning a secret, following at most one hop of
/// indirection through a qualifying Service.
///
/// Retrieval errors (including not-found) propagate to the caller
/// unchanged. A secret without owner references falls back to the
/// annotation pair; a secret whose owner references contain no qualifying
/// Service resolves to no owner.
pub async fn resolve_secret_owner(
    ctx: &ReconcileContext,
    secret_namespace: &str,
    secret_name: &str,
) -> Result<Option<InstanceOwner>> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), secret_namespace);
    let secret = secrets.get(secret_name).await.map_err(Error::KubeError)?;

    let owner_refs = secret
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or_default();
    if owner_refs.is_empty() {
        return Ok(annotation_owner(&secret));
    }

    let candidates = qualifying_service_owners(owner_refs, &ctx.tls_service_suffixes);
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), secret_namespace);
    let mut resolved: Option<InstanceOwner> = None;

    for service_name in candidates {
        let service = match services.get(&service_name).await {
            Ok(svc) => svc,
            Err(kube::Error::Api(e)) if e.code == 404 => continue,
            Err(e) => return Err(Error::KubeError(e)),
        };

        let service_owners = service
            .metadata
            .owner_references
            .as_deref()
            .unwrap_or_default();
        if let Some(owner) = instance_owner_of(service_owners, secret_namespace) {
            match &resolved {
                None => resolved = Some(owner),
                Some(first) if *first != owner => {
                    // Upstream behavior is unspecified here; keep the first
                    // match and flag the ambiguity.
                    warn!(
                        "Secret {}/{} is owned by multiple qualifying services resolving to \
                         different instances ({} vs {}); keeping the first",
                        secret_namespace, secret_name, first.name, owner.name
                    );
                }
                Some(_) => {}
            }
        }
    }

    Ok(resolved)
}

/// Whether TLS should be enforced for a presented certificate secret:
/// only when the resolved owner is this same managing instance.
pub async fn secret_owned_by_instance(
    ctx: &ReconcileContext,
    secret_namespace: &str,
    secret_name: &str,
) -> Result<bool> {
    let owner = resolve_secret_owner(ctx, secret_namespace, secret_name).await?;
    Ok(owner.is_some_and(|o| {
        o.name == ctx.instance_name && o.namespace == ctx.instance_namespace
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn owner_ref(kind: &str, name: &str) -> OwnerReference {
        OwnerReference {
            api_version: "v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: "uid".to_string(),
            controller: Some(true),
            block_owner_deletion: None,
        }
    }

    fn suffixes() -> Vec<String> {
        vec!["-repo-server-tls".to_string(), "-server-tls".to_string()]
    }

    #[test]
    fn test_qualifying_owners_matches_known_suffixes() {
        let refs = vec![
            owner_ref("Service", "demo-repo-server-tls"),
            owner_ref("Service", "demo-metrics"),
            owner_ref("Deployment", "demo-server-tls"),
        ];
        let names = qualifying_service_owners(&refs, &suffixes());
        assert_eq!(names, vec!["demo-repo-server-tls".to_string()]);
    }

    #[test]
    fn test_qualifying_owners_preserves_reference_order() {
        let refs = vec![
            owner_ref("Service", "demo-server-tls"),
            owner_ref("Service", "demo-repo-server-tls"),
        ];
        let names = qualifying_service_owners(&refs, &suffixes());
        assert_eq!(
            names,
            vec![
                "demo-server-tls".to_string(),
                "demo-repo-server-tls".to_string()
            ]
        );
    }

    #[test]
    fn test_instance_owner_found_among_service_owners() {
        let refs = vec![
            owner_ref("ReplicaSet", "unrelated"),
            owner_ref("AppPlatform", "demo"),
        ];
        let owner = instance_owner_of(&refs, "platform-ns").unwrap();
        assert_eq!(owner.name, "demo");
        assert_eq!(owner.namespace, "platform-ns");
    }

    #[test]
    fn test_unrelated_owner_kind_resolves_to_none() {
        let refs = vec![owner_ref("StatefulSet", "demo")];
        assert!(instance_owner_of(&refs, "platform-ns").is_none());
    }

    #[test]
    fn test_annotation_fallback_requires_both_halves() {
        let mut annotations = BTreeMap::new();
        annotations.insert(INSTANCE_NAME_ANNOTATION.to_string(), "x".to_string());

        let mut secret = Secret {
            metadata: ObjectMeta {
                annotations: Some(annotations.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(annotation_owner(&secret).is_none());

        annotations.insert(INSTANCE_NAMESPACE_ANNOTATION.to_string(), "y".to_string());
        secret.metadata.annotations = Some(annotations);
        let owner = annotation_owner(&secret).unwrap();
        assert_eq!(owner.name, "x");
        assert_eq!(owner.namespace, "y");
    }
}
