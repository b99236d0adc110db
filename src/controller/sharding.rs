//! Shard replica calculation for the application controller
//!
//! The application controller is horizontally sharded across registered
//! cluster secrets. Dynamic scaling derives the replica count from the
//! secret count; static scaling pins it; with neither enabled (or when the
//! secret count cannot be obtained) the controller runs
//! [`DEFAULT_CONTROLLER_REPLICAS`].

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use tracing::warn;

use crate::controller::context::{ReconcileContext, LABEL_SECRET_TYPE, SECRET_TYPE_CLUSTER};
use crate::crd::Sharding;

/// Replica count used when no scaling policy applies.
pub const DEFAULT_CONTROLLER_REPLICAS: i32 = 1;

/// Compute the desired replica count for the application controller.
///
/// Dynamic scaling clamps `min_shards` to ≥ 1, `max_shards` to ≥
/// `min_shards` and `clusters_per_shard` to ≥ 1 (which also rules out
/// division by zero), then floors `cluster_secret_count /
/// clusters_per_shard` into `[min_shards, max_shards]`. Static scaling
/// applies only while dynamic scaling is off. `cluster_secret_count` is
/// `None` when enumeration failed; that falls back to the default rather
/// than failing the caller.
pub fn compute_replicas(sharding: &Sharding, cluster_secret_count: Option<i32>) -> i32 {
    if sharding.dynamic_scaling_enabled {
        let min_shards = sharding.min_shards.max(1);
        let max_shards = sharding.max_shards.max(min_shards);
        let clusters_per_shard = sharding.clusters_per_shard.max(1);

        let Some(count) = cluster_secret_count else {
            return DEFAULT_CONTROLLER_REPLICAS;
        };
        return (count / clusters_per_shard).clamp(min_shards, max_shards);
    }

    if sharding.enabled {
        if let Some(replicas) = sharding.replicas {
            if replicas > 0 {
                return replicas;
            }
        }
    }

    DEFAULT_CONTROLLER_REPLICAS
}

/// Count the cluster secrets registered with this instance.
///
/// Returns `None` on enumeration failure; the caller scales to the default
/// instead of failing the pass.
pub async fn count_cluster_secrets(ctx: &ReconcileContext) -> Option<i32> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.instance_namespace);
    let selector = format!("{LABEL_SECRET_TYPE}={SECRET_TYPE_CLUSTER}");

    match secrets.list(&ListParams::default().labels(&selector)).await {
        Ok(list) => Some(list.items.len() as i32),
        Err(e) => {
            warn!(
                "Failed to enumerate cluster secrets in {}: {:?}",
                ctx.instance_namespace, e
            );
            None
        }
    }
}

/// Desired replica count for this pass, combining the policy with the live
/// cluster secret count.
pub async fn desired_controller_replicas(ctx: &ReconcileContext, sharding: &Sharding) -> i32 {
    let count = if sharding.dynamic_scaling_enabled {
        count_cluster_secrets(ctx).await
    } else {
        None
    };
    compute_replicas(sharding, count)
}
