//! Generic create-or-update engine for managed cluster objects
//!
//! Every object kind the operator manages (service accounts, roles, role
//! bindings, workloads, services, ingresses, autoscalers) goes through the
//! same procedure: run the mutation pipeline to produce the desired object,
//! attach the instance owner reference where garbage collection can work,
//! fetch the live object, create it if absent, otherwise walk an ordered
//! list of typed field comparisons and issue at most one update.
//!
//! Fields the API server refuses to update in place (a RoleBinding's
//! roleRef) are declared [`FieldComparison::immutable`]; drift there deletes
//! the live object instead of patching, and the next pass re-creates it.
//!
//! The engine performs no retries. A failed step aborts this object only;
//! the external scheduler re-runs the whole pass.

use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::controller::context::ReconcileContext;
use crate::error::{Error, Result};

/// A step of the desired-object construction pipeline.
///
/// Mutations run in order before any cluster call; a failure aborts the
/// object with [`Error::Mutation`] and nothing is written.
pub type Mutation<K> =
    Box<dyn Fn(&mut K, &ReconcileContext) -> std::result::Result<(), String> + Send + Sync>;

/// Whether a drifted field can be written back in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutability {
    Mutable,
    Immutable,
}

/// One typed field comparison: knows how to read the field from either
/// object, compare structurally, and copy the desired value onto the
/// existing object.
pub struct FieldComparison<K> {
    name: &'static str,
    mutability: Mutability,
    differs: Box<dyn Fn(&K, &K) -> bool + Send + Sync>,
    write_back: Option<Box<dyn Fn(&mut K, &K) + Send + Sync>>,
    on_drift: Option<Box<dyn Fn(&mut K) + Send + Sync>>,
}

impl<K: 'static> FieldComparison<K> {
    /// Comparison over a field that can be updated in place.
    ///
    /// Accessors return `Option` so a comparison can address a value nested
    /// under optional parents (`spec`, `template`, a container) without
    /// unwrapping; an absent side counts as a difference, and write-back is
    /// skipped when the existing object has no slot to write into.
    pub fn field<T>(
        name: &'static str,
        read: fn(&K) -> Option<&T>,
        write: fn(&mut K) -> Option<&mut T>,
    ) -> Self
    where
        T: PartialEq + Clone + 'static,
    {
        Self {
            name,
            mutability: Mutability::Mutable,
            differs: Box::new(move |existing, desired| read(existing) != read(desired)),
            write_back: Some(Box::new(move |existing, desired| {
                if let (Some(slot), Some(value)) = (write(existing), read(desired)) {
                    *slot = value.clone();
                }
            })),
            on_drift: None,
        }
    }

    /// Comparison over a field the API server rejects on update.
    ///
    /// A detected difference makes the protocol delete the existing object;
    /// no write-back is ever attempted.
    pub fn immutable<T>(name: &'static str, read: fn(&K) -> Option<&T>) -> Self
    where
        T: PartialEq + 'static,
    {
        Self {
            name,
            mutability: Mutability::Immutable,
            differs: Box::new(move |existing, desired| read(existing) != read(desired)),
            write_back: None,
            on_drift: None,
        }
    }

    /// Attach an action run on the existing object after this comparison
    /// applied a difference (e.g. stamping a change-timestamp annotation).
    pub fn with_side_effect(mut self, action: impl Fn(&mut K) + Send + Sync + 'static) -> Self {
        self.on_drift = Some(Box::new(action));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// How an existing object's fields are treated once it has been found.
pub enum DriftPolicy<K> {
    /// Run the comparison list and correct what differs.
    Correct(Vec<FieldComparison<K>>),
    /// Return without comparing; the object's fields are externally or
    /// eventually managed and re-checking is wasted work.
    Ignore,
}

/// One object-kind-agnostic reconciliation request.
pub struct ManagedObjectRequest<K> {
    desired: K,
    mutations: Vec<Mutation<K>>,
    drift: DriftPolicy<K>,
    owner: Option<OwnerReference>,
}

impl<K: Resource> ManagedObjectRequest<K> {
    pub fn new(desired: K) -> Self {
        Self {
            desired,
            mutations: Vec::new(),
            drift: DriftPolicy::Correct(Vec::new()),
            owner: None,
        }
    }

    /// Append a mutation to the construction pipeline.
    pub fn mutate(
        mut self,
        mutation: impl Fn(&mut K, &ReconcileContext) -> std::result::Result<(), String>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.mutations.push(Box::new(mutation));
        self
    }

    /// Request an owner reference on the desired object. Applied only when
    /// the object lives in the instance's own namespace; cluster-scoped
    /// objects and objects in foreign namespaces are never owner-referenced
    /// (Kubernetes garbage collection is namespace-scoped).
    pub fn owned_by(mut self, owner: OwnerReference) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Append a field comparison to the drift-correction list.
    pub fn compare(mut self, comparison: FieldComparison<K>) -> Self {
        match &mut self.drift {
            DriftPolicy::Correct(list) => list.push(comparison),
            DriftPolicy::Ignore => self.drift = DriftPolicy::Correct(vec![comparison]),
        }
        self
    }

    /// Skip comparison entirely when the object already exists.
    pub fn ignore_drift(mut self) -> Self {
        self.drift = DriftPolicy::Ignore;
        self
    }
}

/// What the protocol did for one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
    /// Immutable-field drift: the existing object was deleted; the next
    /// pass creates the corrected one.
    Recreating,
}

/// Result of running the comparison list against one existing object.
#[derive(Debug, PartialEq, Eq)]
pub enum DriftOutcome {
    Clean,
    /// Names of the fields that were copied onto the existing object.
    Updated(Vec<&'static str>),
    /// An immutable field differs; carries the field name.
    ImmutableDrift(&'static str),
}

/// Walk the ordered comparison list, copying desired values onto the
/// existing object in place and running side-effects for every difference.
///
/// An immutable difference short-circuits: the object has to be replaced
/// wholesale, so correcting further fields would be wasted work.
pub fn sync_fields<K>(
    existing: &mut K,
    desired: &K,
    comparisons: &[FieldComparison<K>],
) -> DriftOutcome {
    let mut changed: Vec<&'static str> = Vec::new();

    for comparison in comparisons {
        if !(comparison.differs)(existing, desired) {
            continue;
        }
        if comparison.mutability == Mutability::Immutable {
            return DriftOutcome::ImmutableDrift(comparison.name);
        }
        if let Some(write_back) = &comparison.write_back {
            write_back(existing, desired);
        }
        if let Some(on_drift) = &comparison.on_drift {
            on_drift(existing);
        }
        changed.push(comparison.name);
    }

    if changed.is_empty() {
        DriftOutcome::Clean
    } else {
        DriftOutcome::Updated(changed)
    }
}

/// Create-or-update one managed object.
///
/// See the module docs for the full procedure. Idempotent: a second call
/// with the same desired object and unchanged cluster state performs no
/// write.
pub async fn reconcile_object<K>(
    ctx: &ReconcileContext,
    api: &Api<K>,
    request: ManagedObjectRequest<K>,
) -> Result<Outcome>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    K::DynamicType: Default,
{
    let ManagedObjectRequest {
        mut desired,
        mutations,
        drift,
        owner,
    } = request;

    let kind = K::kind(&K::DynamicType::default()).into_owned();
    let name = desired.name_any();

    for mutation in &mutations {
        mutation(&mut desired, ctx).map_err(|reason| Error::Mutation {
            kind: kind.clone(),
            name: name.clone(),
            reason,
        })?;
    }

    if let Some(owner) = owner {
        if desired.meta().namespace.as_deref() == Some(ctx.instance_namespace.as_str()) {
            desired.meta_mut().owner_references = Some(vec![owner]);
        }
    }

    let mut existing = match api.get(&name).await {
        Ok(obj) => obj,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            info!("Creating {} {}", kind, name);
            if ctx.dry_run {
                return Ok(Outcome::Created);
            }
            api.create(&PostParams::default(), &desired)
                .await
                .map_err(|e| Error::cluster_api("create", &kind, &name, e))?;
            return Ok(Outcome::Created);
        }
        Err(e) => return Err(Error::cluster_api("get", &kind, &name, e)),
    };

    let comparisons = match drift {
        DriftPolicy::Ignore => {
            debug!("{} {} exists, drift ignored", kind, name);
            return Ok(Outcome::Unchanged);
        }
        DriftPolicy::Correct(comparisons) => comparisons,
    };

    match sync_fields(&mut existing, &desired, &comparisons) {
        DriftOutcome::Clean => Ok(Outcome::Unchanged),
        DriftOutcome::ImmutableDrift(field) => {
            info!(
                "{} {} drifted on immutable field {}, deleting for re-create",
                kind, name, field
            );
            if !ctx.dry_run {
                match api.delete(&name, &DeleteParams::default()).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(e)) if e.code == 404 => {}
                    Err(e) => return Err(Error::cluster_api("delete", &kind, &name, e)),
                }
            }
            Ok(Outcome::Recreating)
        }
        DriftOutcome::Updated(fields) => {
            info!("Updating {} {} (drift on {})", kind, name, fields.join(", "));
            if ctx.dry_run {
                return Ok(Outcome::Updated);
            }
            api.replace(&name, &PostParams::default(), &existing)
                .await
                .map_err(|e| Error::cluster_api("update", &kind, &name, e))?;
            Ok(Outcome::Updated)
        }
    }
}

/// Delete one managed object by name, treating not-found as already done.
///
/// Returns whether a live object was actually deleted.
pub async fn delete_object<K>(api: &Api<K>, name: &str) -> Result<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).into_owned();
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("Deleted {} {}", kind, name);
            Ok(true)
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!("{} {} not found, already deleted", kind, name);
            Ok(false)
        }
        Err(e) => Err(Error::cluster_api("delete", kind, name, e)),
    }
}
