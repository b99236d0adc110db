//! Main reconciler for AppPlatform resources
//!
//! Implements the controller pattern using kube-rs runtime. One pass runs
//! sequentially: RBAC across the namespace sets, service accounts, the
//! sharded application controller, the remaining workloads and their
//! network surfaces, then a status update reflecting whether every
//! component reached desired state.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Event, Service};
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::controller::context::ReconcileContext;
use crate::controller::{conditions, namespaces, ownership, rbac, resources, sharding};
use crate::crd::{AppPlatform, AppPlatformStatus, Condition};
use crate::error::{AggregateError, Error, Result};

use super::finalizers::APP_PLATFORM_FINALIZER;

const FIELD_MANAGER: &str = "appplatform-operator";

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub operator_namespace: String,
    pub dry_run: bool,
    pub is_leader: Arc<std::sync::atomic::AtomicBool>,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let platforms: Api<AppPlatform> = Api::all(client.clone());

    info!("Starting AppPlatform controller");

    // Verify CRD exists
    match platforms.list(&Default::default()).await {
        Ok(_) => info!("AppPlatform CRD is available"),
        Err(e) => {
            error!(
                "AppPlatform CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "AppPlatform CRD not installed".to_string(),
            ));
        }
    }

    Controller::new(platforms, Config::default())
        // Watch owned resources for changes
        .owns::<Deployment>(Api::all(client.clone()), Config::default())
        .owns::<StatefulSet>(Api::all(client.clone()), Config::default())
        .owns::<Service>(Api::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// Helper to emit a Kubernetes Event
async fn emit_event(
    client: &Client,
    platform: &AppPlatform,
    event_type: &str,
    reason: &str,
    message: &str,
) -> Result<()> {
    let namespace = platform.namespace().unwrap_or_else(|| "default".to_string());
    let events: Api<Event> = Api::namespaced(client.clone(), &namespace);

    let time = chrono::Utc::now();
    let event = Event {
        metadata: kube::api::ObjectMeta {
            generate_name: Some(format!("{}-event-", platform.name_any())),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: platform.object_ref(&()),
        first_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        last_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        count: Some(1),
        ..Default::default()
    };

    events
        .create(&PostParams::default(), &event)
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - An AppPlatform is created, updated, or deleted
/// - An owned resource (Deployment, StatefulSet, Service) changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<AppPlatform>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(std::sync::atomic::Ordering::Relaxed) {
        return Ok(Action::requeue(Duration::from_secs(15)));
    }

    let client = ctx.client.clone();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<AppPlatform> = Api::namespaced(client.clone(), &namespace);

    info!(
        "Reconciling AppPlatform {}/{}",
        namespace,
        obj.name_any()
    );

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile(&namespace, &obj.name_any());

    // Use kube-rs built-in finalizer helper for clean lifecycle management
    finalizer(&api, APP_PLATFORM_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(platform) => apply_platform(&ctx, &platform).await,
            FinalizerEvent::Cleanup(platform) => cleanup_platform(&ctx, &platform).await,
        }
    })
    .await
    .map_err(Error::from)
}

/// Apply/create/update the AppPlatform resources
#[instrument(skip(state, platform), fields(name = %platform.name_any(), namespace = platform.namespace()))]
async fn apply_platform(state: &ControllerState, platform: &AppPlatform) -> Result<Action> {
    let client = &state.client;
    let namespace = platform.namespace().unwrap_or_else(|| "default".to_string());
    let name = platform.name_any();

    info!("Applying AppPlatform: {}/{}", namespace, name);

    // Validate the spec
    if let Err(violations) = platform.spec.validate() {
        let detail = violations
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect::<Vec<_>>()
            .join("; ");
        warn!("Validation failed for {}/{}: {}", namespace, name, detail);
        update_status(
            client,
            platform,
            "Failed",
            Some(&detail),
            None,
            vec![Condition::ready(false, "SpecInvalid", &detail)],
        )
        .await?;
        return Err(Error::ValidationError(detail));
    }

    let reconcile_ctx = ReconcileContext::new(client.clone(), platform, state.dry_run)?;

    update_status(
        client,
        platform,
        "Creating",
        Some("Reconciling resources"),
        None,
        vec![Condition::progressing(
            "Reconciling",
            "Driving cluster to desired state",
        )],
    )
    .await?;

    let mut failures = AggregateError::new();

    // 1. Namespace sets and RBAC across them
    match namespaces::discover(&reconcile_ctx, platform).await {
        Ok(sets) => failures.collect(rbac::reconcile_rbac(&reconcile_ctx, &sets).await),
        Err(e) => failures.push(e),
    }

    // 2. Service accounts before the workloads that run as them
    failures.collect(resources::ensure_service_accounts(&reconcile_ctx, platform).await);

    // 3. Shard-based replica count for the application controller
    let controller_replicas =
        sharding::desired_controller_replicas(&reconcile_ctx, &platform.spec.sharding).await;

    // 4. TLS enforcement: strict verification only when the presented
    //    repo-server certificate secret is owned by this same instance
    let tls_secret = format!("{}-repo-server-tls", reconcile_ctx.instance_name);
    let strict_tls = match ownership::secret_owned_by_instance(
        &reconcile_ctx,
        &reconcile_ctx.instance_namespace,
        &tls_secret,
    )
    .await
    {
        Ok(owned) => owned,
        Err(Error::KubeError(kube::Error::Api(ref e))) if e.code == 404 => false,
        Err(e) => {
            failures.push(e);
            false
        }
    };

    // 5. Workloads and their network surfaces
    failures.collect(
        resources::ensure_workloads(&reconcile_ctx, platform, controller_replicas, strict_tls)
            .await,
    );
    failures.collect(resources::ensure_services(&reconcile_ctx, platform).await);
    failures.collect(resources::ensure_server_ingress(&reconcile_ctx, platform).await);
    failures.collect(resources::ensure_server_hpa(&reconcile_ctx, platform).await);

    if let Err(err) = failures.into_result() {
        let detail = err.to_string();
        warn!(
            "AppPlatform {}/{} did not reach desired state: {}",
            namespace, name, detail
        );

        if let Err(event_err) = emit_event(
            client,
            platform,
            "Warning",
            "ReconcileIncomplete",
            &detail,
        )
        .await
        {
            warn!("Failed to emit event: {:?}", event_err);
        }

        update_status(
            client,
            platform,
            "Degraded",
            Some(&detail),
            Some(controller_replicas),
            vec![
                Condition::ready(false, "ComponentsDegraded", &detail),
                Condition::degraded("ReconcileIncomplete", &detail),
            ],
        )
        .await?;
        return Err(err);
    }

    update_status(
        client,
        platform,
        "Ready",
        Some("All components reconciled"),
        Some(controller_replicas),
        vec![Condition::ready(
            true,
            "ComponentsReconciled",
            "All components reached desired state",
        )],
    )
    .await?;

    info!(
        "AppPlatform {}/{} reconciled (controller replicas: {})",
        namespace, name, controller_replicas
    );

    Ok(Action::requeue(Duration::from_secs(60)))
}

/// Clean up resources when the AppPlatform is deleted
///
/// Objects in the instance's own namespace are garbage-collected through
/// their owner references; only the cross-namespace RBAC pairs and the
/// cluster-scoped grants need explicit deletion.
#[instrument(skip(state, platform), fields(name = %platform.name_any(), namespace = platform.namespace()))]
async fn cleanup_platform(state: &ControllerState, platform: &AppPlatform) -> Result<Action> {
    let namespace = platform.namespace().unwrap_or_else(|| "default".to_string());
    let name = platform.name_any();

    info!("Cleaning up AppPlatform: {}/{}", namespace, name);

    let reconcile_ctx = ReconcileContext::new(state.client.clone(), platform, state.dry_run)?;
    if let Err(e) = rbac::teardown_rbac(&reconcile_ctx).await {
        warn!("Failed to tear down RBAC: {:?}", e);
    }

    info!("Cleanup complete for AppPlatform: {}/{}", namespace, name);

    // Return await_change to signal finalizer completion
    Ok(Action::await_change())
}

/// Update the status subresource of an AppPlatform
async fn update_status(
    client: &Client,
    platform: &AppPlatform,
    phase: &str,
    message: Option<&str>,
    controller_replicas: Option<i32>,
    new_conditions: Vec<Condition>,
) -> Result<()> {
    let namespace = platform.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<AppPlatform> = Api::namespaced(client.clone(), &namespace);

    let mut conditions = platform
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    for condition in new_conditions {
        conditions::upsert_condition(&mut conditions, condition);
    }

    let status = AppPlatformStatus {
        phase: phase.to_string(),
        message: message.map(String::from),
        observed_generation: platform.metadata.generation,
        controller_replicas,
        conditions,
    };

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &platform.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;

    Ok(())
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(platform: Arc<AppPlatform>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(
        "Reconciliation error for {}: {:?}",
        platform.name_any(),
        error
    );

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_error(
        &platform.namespace().unwrap_or_default(),
        &platform.name_any(),
    );

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
