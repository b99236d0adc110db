//! Unit tests for Kubernetes resource builders.
//!
//! Run with: `cargo test -p appplatform-k8s resources_test`

#[cfg(test)]
mod tests {
    use crate::controller::context::{InstanceIdentity, LABEL_MANAGED_BY};
    use crate::controller::resources::{
        active_components, build_component_deployment, build_component_service,
        build_controller_statefulset, build_server_hpa, build_server_ingress, image_ref,
        owner_reference, selector_labels, standard_labels,
    };
    use crate::crd::{
        AppPlatformSpec, ApplicationSetConfig, AutoscalingConfig, Component, IngressConfig,
        ServerConfig, Sharding,
    };

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn identity() -> InstanceIdentity {
        InstanceIdentity {
            instance_name: "demo".to_string(),
            instance_namespace: "platform".to_string(),
            instance_uid: "uid-1234".to_string(),
            cluster_scoped: false,
        }
    }

    fn minimal_spec() -> AppPlatformSpec {
        AppPlatformSpec {
            image: "ghcr.io/appplatform/appplatform".to_string(),
            version: "v1.2.3".to_string(),
            cluster_scoped: false,
            sharding: Sharding::default(),
            source_namespaces: vec![],
            appset_source_namespaces: vec![],
            server: None,
            repo_server: None,
            applicationset: None,
        }
    }

    // -----------------------------------------------------------------------
    // Labels and ownership
    // -----------------------------------------------------------------------

    #[test]
    fn test_standard_labels_carry_the_durable_record() {
        let labels = standard_labels(&identity(), Component::Server);

        assert_eq!(
            labels.get(LABEL_MANAGED_BY).map(String::as_str),
            Some("platform.demo")
        );
        assert_eq!(
            labels.get("app.kubernetes.io/component").map(String::as_str),
            Some("server")
        );
        assert_eq!(
            labels.get("app.kubernetes.io/instance").map(String::as_str),
            Some("demo")
        );
    }

    #[test]
    fn test_selector_labels_are_a_stable_subset() {
        let selector = selector_labels(&identity(), Component::RepoServer);
        let full = standard_labels(&identity(), Component::RepoServer);

        // Selectors are immutable on workloads, so every selector label must
        // also be present (unchanged) on the full label set.
        for (key, value) in &selector {
            assert_eq!(full.get(key), Some(value), "selector label {key} diverged");
        }
        assert!(!selector.contains_key(LABEL_MANAGED_BY));
    }

    #[test]
    fn test_owner_reference_points_at_the_instance() {
        let owner = owner_reference(&identity());
        assert_eq!(owner.kind, "AppPlatform");
        assert_eq!(owner.name, "demo");
        assert_eq!(owner.uid, "uid-1234");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_image_ref_joins_image_and_version() {
        assert_eq!(
            image_ref(&minimal_spec()),
            "ghcr.io/appplatform/appplatform:v1.2.3"
        );
    }

    #[test]
    fn test_active_components_include_appset_only_when_enabled() {
        let mut spec = minimal_spec();
        assert_eq!(active_components(&spec).len(), 3);

        spec.applicationset = Some(ApplicationSetConfig { enabled: true });
        let components = active_components(&spec);
        assert_eq!(components.len(), 4);
        assert!(components.contains(&Component::ApplicationSetController));
    }

    // -----------------------------------------------------------------------
    // Workloads
    // -----------------------------------------------------------------------

    #[test]
    fn test_controller_statefulset_uses_computed_replicas() {
        let statefulset = build_controller_statefulset(&identity(), &minimal_spec(), 5);

        assert_eq!(
            statefulset.metadata.name.as_deref(),
            Some("demo-application-controller")
        );
        let spec = statefulset.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(5));
        assert_eq!(spec.service_name, "demo-application-controller");

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(
            pod.service_account_name.as_deref(),
            Some("demo-application-controller")
        );
        assert_eq!(
            pod.containers[0].image.as_deref(),
            Some("ghcr.io/appplatform/appplatform:v1.2.3")
        );
    }

    #[test]
    fn test_server_deployment_env_reflects_insecure_flag() {
        let mut spec = minimal_spec();
        spec.server = Some(ServerConfig {
            replicas: Some(2),
            insecure: true,
            ingress: None,
            autoscaling: None,
        });

        let deployment =
            build_component_deployment(&identity(), &spec, Component::Server, Some(2));
        assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(2));

        let container = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        let insecure = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "APPPLATFORM_SERVER_INSECURE")
            .and_then(|e| e.value.as_deref());
        assert_eq!(insecure, Some("true"));
    }

    #[test]
    fn test_autoscaled_server_deployment_leaves_replicas_unset() {
        let deployment =
            build_component_deployment(&identity(), &minimal_spec(), Component::Server, None);
        assert_eq!(deployment.spec.as_ref().unwrap().replicas, None);
    }

    #[test]
    fn test_workload_selector_matches_pod_labels() {
        let deployment = build_component_deployment(
            &identity(),
            &minimal_spec(),
            Component::RepoServer,
            Some(1),
        );
        let spec = deployment.spec.as_ref().unwrap();
        let selector = spec.selector.match_labels.as_ref().unwrap();
        let pod_labels = spec.template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(selector, pod_labels);
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    #[test]
    fn test_component_service_shape() {
        let service = build_component_service(&identity(), Component::Server, vec![]);
        let spec = service.spec.as_ref().unwrap();

        assert_eq!(service.metadata.name.as_deref(), Some("demo-server"));
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(
            spec.selector.as_ref().unwrap(),
            &selector_labels(&identity(), Component::Server)
        );
    }

    // -----------------------------------------------------------------------
    // Ingress
    // -----------------------------------------------------------------------

    #[test]
    fn test_server_ingress_routes_host_to_server_service() {
        let config = IngressConfig {
            class_name: Some("nginx".to_string()),
            host: "platform.example.com".to_string(),
            path: "/".to_string(),
            tls_secret_name: Some("platform-tls".to_string()),
            annotations: None,
        };
        let ingress = build_server_ingress(&identity(), &config);
        let spec = ingress.spec.as_ref().unwrap();

        assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));

        let rule = &spec.rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("platform.example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path_type, "Prefix");
        assert_eq!(
            path.backend.service.as_ref().unwrap().name,
            "demo-server"
        );

        let tls = &spec.tls.as_ref().unwrap()[0];
        assert_eq!(tls.secret_name.as_deref(), Some("platform-tls"));
        assert_eq!(
            tls.hosts.as_ref().unwrap(),
            &vec!["platform.example.com".to_string()]
        );
    }

    // -----------------------------------------------------------------------
    // Autoscaler
    // -----------------------------------------------------------------------

    #[test]
    fn test_server_hpa_targets_the_server_deployment() {
        let config = AutoscalingConfig {
            min_replicas: 2,
            max_replicas: 6,
            target_cpu_utilization_percentage: Some(70),
        };
        let hpa = build_server_hpa(&identity(), &config);
        let spec = hpa.spec.as_ref().unwrap();

        assert_eq!(spec.scale_target_ref.kind, "Deployment");
        assert_eq!(spec.scale_target_ref.name, "demo-server");
        assert_eq!(spec.min_replicas, Some(2));
        assert_eq!(spec.max_replicas, 6);

        let metric = &spec.metrics.as_ref().unwrap()[0];
        let target = &metric.resource.as_ref().unwrap().target;
        assert_eq!(target.average_utilization, Some(70));
    }

    #[test]
    fn test_server_hpa_without_cpu_target_has_no_metrics() {
        let config = AutoscalingConfig {
            min_replicas: 1,
            max_replicas: 3,
            target_cpu_utilization_percentage: None,
        };
        let hpa = build_server_hpa(&identity(), &config);
        assert!(hpa.spec.as_ref().unwrap().metrics.is_none());
    }
}
