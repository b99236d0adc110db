//! Multi-namespace RBAC lifecycle
//!
//! Keeps exactly one Role/RoleBinding pair alive per namespace currently in
//! each of the three namespace sets, tagged with a purpose label, and tears
//! down pairs whose namespace has left its set. The cluster is the durable
//! record of what was created: the cleanup sweep finds obsolete objects by
//! label selector, never by trusting the in-memory sets, because the sets
//! at a given pass may be a strict subset of what past passes reconciled.
//!
//! Failures are collected per namespace and aggregated; one namespace
//! failing never prevents reconciliation of the others.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::controller::context::{ReconcileContext, LABEL_MANAGED_BY, LABEL_RBAC_PURPOSE};
use crate::controller::namespaces::{NamespaceSetKind, NamespaceSets};
use crate::controller::protocol::{
    delete_object, reconcile_object, FieldComparison, ManagedObjectRequest, Outcome,
};
use crate::controller::resources::{owner_reference, standard_labels};
use crate::crd::Component;
use crate::error::{AggregateError, Error, Result};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// The functional area a per-namespace Role/RoleBinding pair exists for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RbacPurpose {
    /// Full application lifecycle in managed namespaces.
    ResourceManagement,
    /// Application objects sourced from foreign namespaces.
    ApplicationManagement,
    /// ApplicationSet objects sourced from foreign namespaces.
    ApplicationSetManagement,
}

impl RbacPurpose {
    pub const ALL: [RbacPurpose; 3] = [
        RbacPurpose::ResourceManagement,
        RbacPurpose::ApplicationManagement,
        RbacPurpose::ApplicationSetManagement,
    ];

    /// Value of the purpose label; the durable lookup key for cleanup.
    pub fn label_value(&self) -> &'static str {
        match self {
            RbacPurpose::ResourceManagement => "resource-management",
            RbacPurpose::ApplicationManagement => "application-management",
            RbacPurpose::ApplicationSetManagement => "application-set-management",
        }
    }

    /// Component whose service account the pair grants permissions to.
    pub fn component(&self) -> Component {
        match self {
            RbacPurpose::ResourceManagement => Component::ApplicationController,
            RbacPurpose::ApplicationManagement => Component::Server,
            RbacPurpose::ApplicationSetManagement => Component::ApplicationSetController,
        }
    }

    /// Namespace set whose membership drives this purpose.
    pub fn namespace_set(&self) -> NamespaceSetKind {
        match self {
            RbacPurpose::ResourceManagement => NamespaceSetKind::Managed,
            RbacPurpose::ApplicationManagement => NamespaceSetKind::Source,
            RbacPurpose::ApplicationSetManagement => NamespaceSetKind::AppsetSource,
        }
    }

    /// Environment variable naming an externally managed ClusterRole that
    /// replaces the default per-namespace Role for this component family.
    pub fn custom_role_env(&self) -> &'static str {
        match self {
            RbacPurpose::ResourceManagement => "CONTROLLER_CLUSTER_ROLE",
            RbacPurpose::ApplicationManagement => "SERVER_CLUSTER_ROLE",
            RbacPurpose::ApplicationSetManagement => "APPLICATIONSET_CLUSTER_ROLE",
        }
    }

    /// The configured custom role name, if any.
    pub fn custom_role(&self) -> Option<String> {
        std::env::var(self.custom_role_env())
            .ok()
            .filter(|v| !v.is_empty())
    }

    fn rules(&self) -> Vec<PolicyRule> {
        match self {
            RbacPurpose::ResourceManagement => vec![PolicyRule {
                api_groups: Some(vec!["*".to_string()]),
                resources: Some(vec!["*".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            }],
            RbacPurpose::ApplicationManagement => vec![PolicyRule {
                api_groups: Some(vec!["appplatform.io".to_string()]),
                resources: Some(vec![
                    "applications".to_string(),
                    "appprojects".to_string(),
                ]),
                verbs: crud_verbs(),
                ..Default::default()
            }],
            RbacPurpose::ApplicationSetManagement => vec![PolicyRule {
                api_groups: Some(vec!["appplatform.io".to_string()]),
                resources: Some(vec!["applicationsets".to_string()]),
                verbs: crud_verbs(),
                ..Default::default()
            }],
        }
    }
}

fn crud_verbs() -> Vec<String> {
    ["get", "list", "watch", "create", "update", "patch", "delete"]
        .iter()
        .map(|v| (*v).to_string())
        .collect()
}

/// Reconcile all RBAC for one instance: the control-plane pair in its own
/// namespace, one purpose-labeled pair per member namespace of each set,
/// the label-driven cleanup sweep, and the cluster-scoped grants (created
/// while the instance is cluster-scoped, removed once it no longer is).
#[instrument(skip(ctx, sets), fields(instance = %ctx.instance_name, namespace = %ctx.instance_namespace))]
pub async fn reconcile_rbac(ctx: &ReconcileContext, sets: &NamespaceSets) -> Result<()> {
    let mut failures = AggregateError::new();

    failures.collect(reconcile_control_plane_rbac(ctx).await);

    for purpose in RbacPurpose::ALL {
        // Sweep before create so a namespace that left and re-joined within
        // one pass ends in the created state.
        failures.collect(cleanup_stale_rbac(ctx, purpose, sets.set(purpose.namespace_set())).await);
        failures.collect(reconcile_purpose_rbac(ctx, purpose, sets).await);
    }

    if ctx.cluster_scoped {
        failures.collect(reconcile_cluster_rbac(ctx).await);
    } else {
        failures.collect(cleanup_cluster_rbac(ctx).await);
    }

    failures.into_result()
}

/// Control-plane Role/RoleBinding pair in the instance's own namespace.
/// Always reconciled, without purpose labels.
async fn reconcile_control_plane_rbac(ctx: &ReconcileContext) -> Result<()> {
    let name = format!("{}-control-plane", ctx.instance_name);
    let rules = vec![PolicyRule {
        api_groups: Some(vec!["*".to_string()]),
        resources: Some(vec!["*".to_string()]),
        verbs: vec!["*".to_string()],
        ..Default::default()
    }];

    let roles: Api<Role> = Api::namespaced(ctx.client.clone(), &ctx.instance_namespace);
    let role = build_role(ctx, &name, &ctx.instance_namespace, rules, None);
    reconcile_object(
        ctx,
        &roles,
        ManagedObjectRequest::new(role)
            .owned_by(owner_reference(ctx))
            .compare(FieldComparison::field(
                "rules",
                |r: &Role| Some(&r.rules),
                |r: &mut Role| Some(&mut r.rules),
            )),
    )
    .await?;

    let subjects = vec![
        service_account_subject(ctx, Component::ApplicationController),
        service_account_subject(ctx, Component::Server),
    ];
    let role_ref = RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: "Role".to_string(),
        name: name.clone(),
    };
    reconcile_role_binding(ctx, &ctx.instance_namespace, &name, role_ref, subjects, None).await
}

/// One purpose across its whole namespace set; per-namespace failures are
/// collected so the loop always finishes.
async fn reconcile_purpose_rbac(
    ctx: &ReconcileContext,
    purpose: RbacPurpose,
    sets: &NamespaceSets,
) -> Result<()> {
    let mut failures = AggregateError::new();
    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let managed_by = ctx.managed_by_value();

    for namespace in sets.set(purpose.namespace_set()).keys() {
        if namespace == &ctx.instance_namespace {
            // Covered by the control-plane pair.
            continue;
        }

        let ns_obj = match namespaces.get(namespace).await {
            Ok(obj) => obj,
            Err(e) => {
                debug!(
                    "Skipping namespace {} for {}: cannot fetch ({:?})",
                    namespace,
                    purpose.label_value(),
                    e
                );
                continue;
            }
        };

        if let Some(reason) = skip_reason(&ns_obj, purpose, &managed_by) {
            debug!(
                "Skipping namespace {} for {}: {}",
                namespace,
                purpose.label_value(),
                reason
            );
            continue;
        }

        failures.collect(reconcile_namespace_rbac(ctx, purpose, namespace).await);
    }

    failures.into_result()
}

/// Why a member namespace is skipped this pass, if it is.
///
/// Terminating namespaces are never written to: writes would either fail or
/// be garbage-collected immediately. Namespaces that already delegate full
/// lifecycle management to this instance already hold the broader
/// resource-management grant, so the narrower purposes skip them.
pub(crate) fn skip_reason(
    namespace: &Namespace,
    purpose: RbacPurpose,
    managed_by: &str,
) -> Option<&'static str> {
    if namespace.metadata.deletion_timestamp.is_some() {
        return Some("namespace is terminating");
    }

    if purpose != RbacPurpose::ResourceManagement {
        let delegated = namespace
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(LABEL_MANAGED_BY))
            .is_some_and(|value| value == managed_by);
        if delegated {
            return Some("namespace already holds the resource-management grant");
        }
    }

    None
}

/// The purpose-labeled Role/RoleBinding pair for one namespace.
async fn reconcile_namespace_rbac(
    ctx: &ReconcileContext,
    purpose: RbacPurpose,
    namespace: &str,
) -> Result<()> {
    let roles: Api<Role> = Api::namespaced(ctx.client.clone(), namespace);
    let name = format!("{}-{}", ctx.instance_name, purpose.component().suffix());

    let role_ref = match purpose.custom_role() {
        Some(custom) => {
            // The external ClusterRole replaces the default Role; it never
            // supplements it.
            delete_object(&roles, &name).await?;
            RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name: custom,
            }
        }
        None => {
            let role = build_role(ctx, &name, namespace, purpose.rules(), Some(purpose));
            reconcile_object(
                ctx,
                &roles,
                ManagedObjectRequest::new(role)
                    .owned_by(owner_reference(ctx))
                    .compare(FieldComparison::field(
                        "rules",
                        |r: &Role| Some(&r.rules),
                        |r: &mut Role| Some(&mut r.rules),
                    )),
            )
            .await?;
            RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: "Role".to_string(),
                name: name.clone(),
            }
        }
    };

    let subjects = vec![service_account_subject(ctx, purpose.component())];
    reconcile_role_binding(ctx, namespace, &name, role_ref, subjects, Some(purpose)).await
}

/// Reconcile one RoleBinding, handling roleRef immutability: a drifted
/// roleRef deletes the binding, and the corrected one is created again
/// within the same call.
async fn reconcile_role_binding(
    ctx: &ReconcileContext,
    namespace: &str,
    name: &str,
    role_ref: RoleRef,
    subjects: Vec<Subject>,
    purpose: Option<RbacPurpose>,
) -> Result<()> {
    let bindings: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), namespace);

    let request = || {
        let binding = build_role_binding(
            ctx,
            name,
            namespace,
            role_ref.clone(),
            subjects.clone(),
            purpose,
        );
        ManagedObjectRequest::new(binding)
            .owned_by(owner_reference(ctx))
            .compare(FieldComparison::immutable("roleRef", |b: &RoleBinding| {
                Some(&b.role_ref)
            }))
            .compare(FieldComparison::field(
                "subjects",
                |b: &RoleBinding| Some(&b.subjects),
                |b: &mut RoleBinding| Some(&mut b.subjects),
            ))
    };

    if reconcile_object(ctx, &bindings, request()).await? == Outcome::Recreating {
        info!(
            "RoleBinding {}/{} replaced to change its role reference",
            namespace, name
        );
        reconcile_object(ctx, &bindings, request()).await?;
    }
    Ok(())
}

/// Remove every purpose-labeled pair and the cluster-scoped grants.
///
/// Used when the instance is deleted; objects in the instance's own
/// namespace are left to owner-reference garbage collection.
pub async fn teardown_rbac(ctx: &ReconcileContext) -> Result<()> {
    let empty: BTreeMap<String, String> = BTreeMap::new();
    let mut failures = AggregateError::new();

    for purpose in RbacPurpose::ALL {
        failures.collect(cleanup_stale_rbac(ctx, purpose, &empty).await);
    }
    failures.collect(cleanup_cluster_rbac(ctx).await);

    failures.into_result()
}

/// Delete purpose-labeled Roles/RoleBindings whose namespace is no longer a
/// member of the current set. Driven by the label selector, not the
/// in-memory sets.
async fn cleanup_stale_rbac(
    ctx: &ReconcileContext,
    purpose: RbacPurpose,
    current: &BTreeMap<String, String>,
) -> Result<()> {
    let selector = format!(
        "{LABEL_RBAC_PURPOSE}={},{LABEL_MANAGED_BY}={}",
        purpose.label_value(),
        ctx.managed_by_value()
    );

    let mut failures = AggregateError::new();
    failures.collect(sweep_stale::<RoleBinding>(ctx, &selector, current).await);
    failures.collect(sweep_stale::<Role>(ctx, &selector, current).await);
    failures.into_result()
}

/// One labeled sweep over a namespaced kind.
async fn sweep_stale<K>(
    ctx: &ReconcileContext,
    selector: &str,
    current: &BTreeMap<String, String>,
) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).into_owned();
    let all: Api<K> = Api::all(ctx.client.clone());
    let listed = all
        .list(&ListParams::default().labels(selector))
        .await
        .map_err(|e| Error::cluster_api("list", kind.clone(), selector, e))?;

    let mut failures = AggregateError::new();
    for (namespace, name) in stale_object_keys(listed.items.iter().map(|obj| obj.meta()), current) {
        if ctx.dry_run {
            info!("(dry-run) Would delete {} {}/{}", kind, namespace, name);
            continue;
        }
        let api: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);
        failures.collect(delete_object(&api, &name).await.map(|_| ()));
    }
    failures.into_result()
}

/// Keys of labeled objects living in namespaces outside the current set.
pub(crate) fn stale_object_keys<'a>(
    metas: impl Iterator<Item = &'a ObjectMeta>,
    current: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    metas
        .filter_map(|meta| match (&meta.namespace, &meta.name) {
            (Some(namespace), Some(name)) if !current.contains_key(namespace) => {
                Some((namespace.clone(), name.clone()))
            }
            _ => None,
        })
        .collect()
}

const CLUSTER_SCOPED_COMPONENTS: [Component; 2] =
    [Component::ApplicationController, Component::Server];

/// ClusterRole/ClusterRoleBinding per cluster-scoped component.
async fn reconcile_cluster_rbac(ctx: &ReconcileContext) -> Result<()> {
    let cluster_roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    let cluster_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let mut failures = AggregateError::new();

    for component in CLUSTER_SCOPED_COMPONENTS {
        let name = ctx.cluster_resource_name(component);

        let role = ClusterRole {
            metadata: cluster_object_meta(ctx, &name, component),
            rules: Some(cluster_rules(component)),
            ..Default::default()
        };
        failures.collect(
            reconcile_object(
                ctx,
                &cluster_roles,
                ManagedObjectRequest::new(role).compare(FieldComparison::field(
                    "rules",
                    |r: &ClusterRole| Some(&r.rules),
                    |r: &mut ClusterRole| Some(&mut r.rules),
                )),
            )
            .await
            .map(|_| ()),
        );

        let request = || {
            let binding = ClusterRoleBinding {
                metadata: cluster_object_meta(ctx, &name, component),
                role_ref: RoleRef {
                    api_group: RBAC_API_GROUP.to_string(),
                    kind: "ClusterRole".to_string(),
                    name: name.clone(),
                },
                subjects: Some(vec![service_account_subject(ctx, component)]),
            };
            ManagedObjectRequest::new(binding)
                .compare(FieldComparison::immutable(
                    "roleRef",
                    |b: &ClusterRoleBinding| Some(&b.role_ref),
                ))
                .compare(FieldComparison::field(
                    "subjects",
                    |b: &ClusterRoleBinding| Some(&b.subjects),
                    |b: &mut ClusterRoleBinding| Some(&mut b.subjects),
                ))
        };
        let outcome = match reconcile_object(ctx, &cluster_bindings, request()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                failures.push(e);
                continue;
            }
        };
        if outcome == Outcome::Recreating {
            failures.collect(
                reconcile_object(ctx, &cluster_bindings, request())
                    .await
                    .map(|_| ()),
            );
        }
    }

    failures.into_result()
}

/// Remove cluster-scoped grants once the instance is namespace-scoped.
async fn cleanup_cluster_rbac(ctx: &ReconcileContext) -> Result<()> {
    let cluster_roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    let cluster_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let mut failures = AggregateError::new();

    for component in CLUSTER_SCOPED_COMPONENTS {
        let name = ctx.cluster_resource_name(component);
        failures.collect(delete_object(&cluster_bindings, &name).await.map(|_| ()));
        failures.collect(delete_object(&cluster_roles, &name).await.map(|_| ()));
    }

    failures.into_result()
}

fn cluster_rules(component: Component) -> Vec<PolicyRule> {
    match component {
        Component::ApplicationController => vec![PolicyRule {
            api_groups: Some(vec!["*".to_string()]),
            resources: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        }],
        _ => vec![PolicyRule {
            api_groups: Some(vec!["*".to_string()]),
            resources: Some(vec!["*".to_string()]),
            verbs: vec![
                "get".to_string(),
                "list".to_string(),
                "watch".to_string(),
            ],
            ..Default::default()
        }],
    }
}

fn build_role(
    ctx: &ReconcileContext,
    name: &str,
    namespace: &str,
    rules: Vec<PolicyRule>,
    purpose: Option<RbacPurpose>,
) -> Role {
    Role {
        metadata: rbac_object_meta(ctx, name, namespace, purpose),
        rules: Some(rules),
    }
}

fn build_role_binding(
    ctx: &ReconcileContext,
    name: &str,
    namespace: &str,
    role_ref: RoleRef,
    subjects: Vec<Subject>,
    purpose: Option<RbacPurpose>,
) -> RoleBinding {
    RoleBinding {
        metadata: rbac_object_meta(ctx, name, namespace, purpose),
        role_ref,
        subjects: Some(subjects),
    }
}

fn rbac_object_meta(
    ctx: &ReconcileContext,
    name: &str,
    namespace: &str,
    purpose: Option<RbacPurpose>,
) -> ObjectMeta {
    let component = purpose
        .map(|p| p.component())
        .unwrap_or(Component::ApplicationController);
    let mut labels = standard_labels(ctx, component);
    if let Some(purpose) = purpose {
        labels.insert(
            LABEL_RBAC_PURPOSE.to_string(),
            purpose.label_value().to_string(),
        );
    }
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

fn cluster_object_meta(ctx: &ReconcileContext, name: &str, component: Component) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(standard_labels(ctx, component)),
        ..Default::default()
    }
}

fn service_account_subject(ctx: &ReconcileContext, component: Component) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: ctx.component_name(component),
        namespace: Some(ctx.instance_namespace.clone()),
        ..Default::default()
    }
}
