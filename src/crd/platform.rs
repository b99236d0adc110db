//! AppPlatform Custom Resource Definition
//!
//! The AppPlatform CRD represents one deployment of the managed application
//! delivery platform. The operator reconciles its component workloads,
//! per-namespace RBAC, and shard-based controller scaling from this spec.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ApplicationSetConfig, Condition, RepoServerConfig, ServerConfig, Sharding,
};

/// Structured validation error for `AppPlatformSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "appplatform.io",
    version = "v1alpha1",
    kind = "AppPlatform",
    namespaced,
    status = "AppPlatformStatus",
    shortname = "ap",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Controller Replicas","type":"integer","jsonPath":".status.controllerReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppPlatformSpec {
    /// Container image (without tag) for the platform components
    #[serde(default = "default_image")]
    pub image: String,

    /// Image tag shared by the platform components
    #[serde(default = "default_version")]
    pub version: String,

    /// Grant cluster-wide (instead of namespace-scoped) permissions to the
    /// application controller and API server
    #[serde(default)]
    pub cluster_scoped: bool,

    /// Replica policy for the application controller
    #[serde(default)]
    pub sharding: Sharding,

    /// Namespaces from which application objects may be sourced
    #[serde(default)]
    pub source_namespaces: Vec<String>,

    /// Namespaces from which ApplicationSet objects may be sourced
    #[serde(default)]
    pub appset_source_namespaces: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_server: Option<RepoServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicationset: Option<ApplicationSetConfig>,
}

fn default_image() -> String {
    "ghcr.io/appplatform/appplatform".to_string()
}

fn default_version() -> String {
    "v1.0.0".to_string()
}

impl AppPlatformSpec {
    /// Validate the spec
    ///
    /// Collects every violation instead of stopping at the first so a user
    /// can fix the whole spec in one edit.
    ///
    /// # Errors
    ///
    /// Returns the full list of violations if the spec fails validation.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        if self.version.is_empty() {
            errors.push(SpecValidationError::new(
                "spec.version",
                "version must not be empty",
                "Set spec.version to a released platform image tag.",
            ));
        }

        if self.sharding.enabled && self.sharding.replicas.is_none() {
            errors.push(SpecValidationError::new(
                "spec.sharding.replicas",
                "static sharding is enabled but no replica count is set",
                "Set spec.sharding.replicas, or disable spec.sharding.enabled.",
            ));
        }

        if self.sharding.dynamic_scaling_enabled
            && self.sharding.max_shards < self.sharding.min_shards
        {
            errors.push(SpecValidationError::new(
                "spec.sharding.maxShards",
                "maxShards is below minShards",
                "Raise spec.sharding.maxShards to at least spec.sharding.minShards.",
            ));
        }

        if let Some(server) = &self.server {
            if let Some(autoscaling) = &server.autoscaling {
                if autoscaling.max_replicas < autoscaling.min_replicas {
                    errors.push(SpecValidationError::new(
                        "spec.server.autoscaling.maxReplicas",
                        "maxReplicas is below minReplicas",
                        "Raise maxReplicas to at least minReplicas.",
                    ));
                }
                if server.replicas.is_some() {
                    errors.push(SpecValidationError::new(
                        "spec.server.replicas",
                        "replicas and autoscaling are mutually exclusive",
                        "Remove spec.server.replicas or spec.server.autoscaling.",
                    ));
                }
            }

            if let Some(ingress) = &server.ingress {
                if ingress.host.is_empty() {
                    errors.push(SpecValidationError::new(
                        "spec.server.ingress.host",
                        "ingress host must not be empty",
                        "Set spec.server.ingress.host to the DNS name the server is reachable at.",
                    ));
                }
            }
        }

        for (field, namespaces) in [
            ("spec.sourceNamespaces", &self.source_namespaces),
            ("spec.appsetSourceNamespaces", &self.appset_source_namespaces),
        ] {
            if namespaces.iter().any(|ns| ns.is_empty()) {
                errors.push(SpecValidationError::new(
                    field,
                    "namespace entries must not be empty",
                    "Remove the empty entry.",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Whether the applicationset controller should be deployed
    pub fn applicationset_enabled(&self) -> bool {
        self.applicationset.as_ref().is_some_and(|a| a.enabled)
    }
}

/// Status subresource for AppPlatform
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppPlatformStatus {
    /// Current lifecycle phase: Pending, Creating, Ready, Failed
    #[serde(default)]
    pub phase: String,

    /// Human-readable detail for the current phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last .metadata.generation the operator fully processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Replica count the application controller is currently scaled to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_replicas: Option<i32>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
