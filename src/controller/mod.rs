//! Controller module for AppPlatform reconciliation
//! This module contains the main controller loop, the generic
//! reconciliation protocol, and the RBAC/sharding/ownership logic for
//! platform instances.

pub mod conditions;
pub mod context;
mod finalizers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod namespaces;
pub mod ownership;
pub mod protocol;
#[cfg(test)]
mod protocol_test;
pub mod rbac;
mod reconciler;
pub mod resources;
#[cfg(test)]
mod resources_test;
pub mod sharding;

pub use context::ReconcileContext;
pub use finalizers::APP_PLATFORM_FINALIZER;
pub use namespaces::{NamespaceSetKind, NamespaceSets};
pub use ownership::{resolve_secret_owner, secret_owned_by_instance, InstanceOwner};
pub use protocol::{
    reconcile_object, DriftOutcome, FieldComparison, ManagedObjectRequest, Outcome,
};
pub use rbac::{reconcile_rbac, teardown_rbac, RbacPurpose};
pub use reconciler::{run_controller, ControllerState};
pub use sharding::{compute_replicas, DEFAULT_CONTROLLER_REPLICAS};
