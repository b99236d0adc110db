//! Unit tests for AppPlatformSpec validation and serde behavior
//!
//! Tests the `AppPlatformSpec::validate()` function to ensure it correctly
//! accepts valid configurations and rejects invalid ones, plus the camelCase
//! wire format of the sharding block.

#[cfg(test)]
mod app_platform_spec_validation {
    use crate::crd::{
        AppPlatformSpec, ApplicationSetConfig, AutoscalingConfig, IngressConfig, ServerConfig,
        Sharding,
    };

    /// Helper to create a minimal valid AppPlatformSpec
    fn valid_spec() -> AppPlatformSpec {
        AppPlatformSpec {
            image: "ghcr.io/appplatform/appplatform".to_string(),
            version: "v1.0.0".to_string(),
            cluster_scoped: false,
            sharding: Sharding::default(),
            source_namespaces: vec![],
            appset_source_namespaces: vec![],
            server: None,
            repo_server: None,
            applicationset: None,
        }
    }

    #[test]
    fn test_minimal_spec_is_valid() {
        assert!(valid_spec().validate().is_ok());
    }

    #[test]
    fn test_empty_version_rejected() {
        let mut spec = valid_spec();
        spec.version = String::new();
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.version"));
    }

    #[test]
    fn test_static_sharding_requires_replicas() {
        let mut spec = valid_spec();
        spec.sharding.enabled = true;
        spec.sharding.replicas = None;
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.sharding.replicas"));

        spec.sharding.replicas = Some(3);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_dynamic_sharding_bounds_checked() {
        let mut spec = valid_spec();
        spec.sharding.dynamic_scaling_enabled = true;
        spec.sharding.min_shards = 5;
        spec.sharding.max_shards = 2;
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.sharding.maxShards"));
    }

    #[test]
    fn test_server_autoscaling_excludes_fixed_replicas() {
        let mut spec = valid_spec();
        spec.server = Some(ServerConfig {
            replicas: Some(2),
            insecure: false,
            ingress: None,
            autoscaling: Some(AutoscalingConfig::default()),
        });
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.server.replicas"));
    }

    #[test]
    fn test_ingress_host_required() {
        let mut spec = valid_spec();
        spec.server = Some(ServerConfig {
            replicas: None,
            insecure: false,
            ingress: Some(IngressConfig {
                class_name: None,
                host: String::new(),
                path: "/".to_string(),
                tls_secret_name: None,
                annotations: None,
            }),
            autoscaling: None,
        });
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.server.ingress.host"));
    }

    #[test]
    fn test_empty_source_namespace_entry_rejected() {
        let mut spec = valid_spec();
        spec.source_namespaces = vec!["team-a".to_string(), String::new()];
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.sourceNamespaces"));
    }

    #[test]
    fn test_applicationset_enabled_helper() {
        let mut spec = valid_spec();
        assert!(!spec.applicationset_enabled());

        spec.applicationset = Some(ApplicationSetConfig { enabled: true });
        assert!(spec.applicationset_enabled());
    }

    #[test]
    fn test_multiple_violations_all_reported() {
        let mut spec = valid_spec();
        spec.version = String::new();
        spec.sharding.enabled = true;
        let errors = spec.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}

#[cfg(test)]
mod sharding_wire_format {
    use crate::crd::Sharding;

    #[test]
    fn test_sharding_serializes_camel_case() {
        let sharding = Sharding {
            enabled: false,
            replicas: None,
            dynamic_scaling_enabled: true,
            min_shards: 2,
            max_shards: 8,
            clusters_per_shard: 3,
        };
        let json = serde_json::to_value(&sharding).unwrap();
        assert_eq!(json["dynamicScalingEnabled"], true);
        assert_eq!(json["minShards"], 2);
        assert_eq!(json["maxShards"], 8);
        assert_eq!(json["clustersPerShard"], 3);
    }

    #[test]
    fn test_sharding_defaults_from_empty_object() {
        let sharding: Sharding = serde_json::from_str("{}").unwrap();
        assert!(!sharding.enabled);
        assert!(!sharding.dynamic_scaling_enabled);
        assert_eq!(sharding.min_shards, 1);
        assert_eq!(sharding.max_shards, 1);
        assert_eq!(sharding.clusters_per_shard, 1);
    }
}
