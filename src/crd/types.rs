//! Shared types for AppPlatform specifications
//!
//! These types are used across the CRD definition and controller logic.
//! They configure the platform components (application controller, API
//! server, repository server, applicationset controller), the shard-based
//! scaling of the application controller, and optional ingress/autoscaling
//! for the API server.
//!
//! # Type Hierarchy
//!
//! - [`Component`] - The four platform components managed by the operator
//! - [`Sharding`] - Replica policy for the shardable application controller
//! - [`ServerConfig`], [`RepoServerConfig`], [`ApplicationSetConfig`] - per-component knobs
//! - [`IngressConfig`], [`AutoscalingConfig`] - optional API server surfaces
//! - [`Condition`] - Kubernetes-convention status condition

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Platform components managed by the operator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Component {
    /// Application controller: reconciles applications into their target
    /// clusters, horizontally shardable across cluster secrets
    #[default]
    ApplicationController,

    /// API server: serves the platform API and UI
    Server,

    /// Repository server: clones and renders application sources
    RepoServer,

    /// ApplicationSet controller: expands ApplicationSet templates
    ApplicationSetController,
}

impl Component {
    /// Suffix appended to the instance name for this component's resources
    pub fn suffix(&self) -> &'static str {
        match self {
            Component::ApplicationController => "application-controller",
            Component::Server => "server",
            Component::RepoServer => "repo-server",
            Component::ApplicationSetController => "applicationset-controller",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Replica policy for the application controller
///
/// Static scaling pins the replica count; dynamic scaling derives it from
/// the number of registered cluster secrets divided by `clustersPerShard`,
/// clamped into `[minShards, maxShards]`. Static applies only while dynamic
/// scaling is off. With neither enabled the controller runs the default
/// single replica.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Sharding {
    /// Enable static sharding with an explicit replica count
    #[serde(default)]
    pub enabled: bool,

    /// Explicit replica count used while static sharding is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Derive the replica count from the registered cluster count
    #[serde(default)]
    pub dynamic_scaling_enabled: bool,

    /// Lower bound for dynamic scaling (floored at 1)
    #[serde(default = "default_min_shards")]
    pub min_shards: i32,

    /// Upper bound for dynamic scaling (floored at minShards)
    #[serde(default = "default_max_shards")]
    pub max_shards: i32,

    /// Registered clusters served per shard (floored at 1)
    #[serde(default = "default_clusters_per_shard")]
    pub clusters_per_shard: i32,
}

fn default_min_shards() -> i32 {
    1
}

fn default_max_shards() -> i32 {
    1
}

fn default_clusters_per_shard() -> i32 {
    1
}

impl Default for Sharding {
    fn default() -> Self {
        Self {
            enabled: false,
            replicas: None,
            dynamic_scaling_enabled: false,
            min_shards: default_min_shards(),
            max_shards: default_max_shards(),
            clusters_per_shard: default_clusters_per_shard(),
        }
    }
}

/// API server configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Fixed replica count; ignored while autoscaling is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Serve plaintext HTTP behind an external TLS terminator
    #[serde(default)]
    pub insecure: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingConfig>,
}

/// Repository server configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// ApplicationSet controller configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSetConfig {
    /// Deploy the applicationset controller
    #[serde(default)]
    pub enabled: bool,
}

/// Ingress configuration for the API server
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Optional ingressClassName (e.g., "nginx", "traefik")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    /// DNS host served by the ingress
    pub host: String,

    /// HTTP path routed to the server Service
    #[serde(default = "default_ingress_path")]
    pub path: String,

    /// TLS secret name used by the ingress controller for HTTPS termination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    /// Additional annotations to attach to the Ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

fn default_ingress_path() -> String {
    "/".to_string()
}

/// Horizontal autoscaling for the API server
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingConfig {
    /// Minimum replica count
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,

    /// Maximum replica count
    #[serde(default = "default_max_replicas")]
    pub max_replicas: i32,

    /// Target average CPU utilization percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_cpu_utilization_percentage: Option<i32>,
}

fn default_min_replicas() -> i32 {
    1
}

fn default_max_replicas() -> i32 {
    3
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            target_cpu_utilization_percentage: Some(80),
        }
    }
}

/// Status condition following Kubernetes API conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "Progressing", "Degraded")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation the condition was set from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new Ready condition
    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    /// Create a new Progressing condition
    pub fn progressing(reason: &str, message: &str) -> Self {
        Self {
            type_: "Progressing".to_string(),
            status: "True".to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    /// Create a new Degraded condition
    pub fn degraded(reason: &str, message: &str) -> Self {
        Self {
            type_: "Degraded".to_string(),
            status: "True".to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    /// Set the observed generation for this condition
    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }
}
