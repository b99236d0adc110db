//! Prometheus metrics for the AppPlatform operator
//!
//! # Exported metrics
//! When built with `--features metrics` the following are registered:
//! - `appplatform_reconcile_total` (counter): reconcile passes labeled by namespace/name.
//! - `appplatform_reconcile_errors_total` (counter): failed passes labeled by namespace/name.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Labels identifying one AppPlatform instance
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InstanceLabels {
    pub namespace: String,
    pub name: String,
}

/// Counter tracking reconcile passes
pub static RECONCILE_TOTAL: Lazy<Family<InstanceLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<InstanceLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Register all operator metrics into a registry
pub fn register(registry: &mut Registry) {
    registry.register(
        "appplatform_reconcile",
        "Reconcile passes per instance",
        RECONCILE_TOTAL.clone(),
    );
    registry.register(
        "appplatform_reconcile_errors",
        "Failed reconcile passes per instance",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
}

pub fn observe_reconcile(namespace: &str, name: &str) {
    RECONCILE_TOTAL
        .get_or_create(&InstanceLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
        .inc();
}

pub fn observe_reconcile_error(namespace: &str, name: &str) {
    RECONCILE_ERRORS_TOTAL
        .get_or_create(&InstanceLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
        .inc();
}
