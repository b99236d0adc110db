//! Kubernetes resource builders for AppPlatform components
//!
//! This module translates the AppPlatform spec into the workloads,
//! service accounts, services, ingress and autoscaler objects for the four
//! platform components, and feeds them through the reconciliation protocol
//! with the field comparisons appropriate for each kind.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricSpec, MetricTarget, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServiceAccount,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::Api;
use kube::Resource;

use crate::controller::context::{InstanceIdentity, ReconcileContext, LABEL_MANAGED_BY};
use crate::controller::protocol::{
    delete_object, reconcile_object, FieldComparison, ManagedObjectRequest,
};
use crate::crd::{AppPlatform, AppPlatformSpec, AutoscalingConfig, Component, IngressConfig};
use crate::error::{AggregateError, Result};

/// Annotation stamped on a workload when its container image was corrected.
pub const IMAGE_CHANGED_ANNOTATION: &str = "appplatform.io/image-changed-at";

/// Get the standard labels for an instance's component resources
pub fn standard_labels(ctx: &InstanceIdentity, component: Component) -> BTreeMap<String, String> {
    let mut labels = selector_labels(ctx, component);
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        "appplatform".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "appplatform-operator".to_string(),
    );
    labels.insert(LABEL_MANAGED_BY.to_string(), ctx.managed_by_value());
    labels
}

/// Stable subset of the labels used as pod selector; selectors are
/// immutable, so nothing instance-pass-dependent may appear here.
pub fn selector_labels(ctx: &InstanceIdentity, component: Component) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        "appplatform".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        ctx.instance_name.clone(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.suffix().to_string(),
    );
    labels
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(ctx: &InstanceIdentity) -> OwnerReference {
    OwnerReference {
        api_version: AppPlatform::api_version(&()).to_string(),
        kind: AppPlatform::kind(&()).to_string(),
        name: ctx.instance_name.clone(),
        uid: ctx.instance_uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Full image reference shared by the platform components
pub fn image_ref(spec: &AppPlatformSpec) -> String {
    format!("{}:{}", spec.image, spec.version)
}

/// Components active for this spec
pub fn active_components(spec: &AppPlatformSpec) -> Vec<Component> {
    let mut components = vec![
        Component::ApplicationController,
        Component::Server,
        Component::RepoServer,
    ];
    if spec.applicationset_enabled() {
        components.push(Component::ApplicationSetController);
    }
    components
}

fn component_meta(ctx: &InstanceIdentity, component: Component) -> ObjectMeta {
    ObjectMeta {
        name: Some(ctx.component_name(component)),
        namespace: Some(ctx.instance_namespace.clone()),
        labels: Some(standard_labels(ctx, component)),
        ..Default::default()
    }
}

// ============================================================================
// ServiceAccounts
// ============================================================================

fn build_service_account(ctx: &InstanceIdentity, component: Component) -> ServiceAccount {
    ServiceAccount {
        metadata: component_meta(ctx, component),
        ..Default::default()
    }
}

/// Ensure one ServiceAccount per active component.
///
/// Token secrets and image-pull secrets are attached to service accounts by
/// other controllers, so drift is ignored once the object exists.
pub async fn ensure_service_accounts(
    ctx: &ReconcileContext,
    platform: &AppPlatform,
) -> Result<()> {
    let api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), &ctx.instance_namespace);
    let mut failures = AggregateError::new();

    for component in active_components(&platform.spec) {
        let request = ManagedObjectRequest::new(build_service_account(ctx, component))
            .owned_by(owner_reference(ctx))
            .ignore_drift();
        failures.collect(reconcile_object(ctx, &api, request).await.map(|_| ()));
    }

    failures.into_result()
}

// ============================================================================
// Containers
// ============================================================================

fn platform_container(
    spec: &AppPlatformSpec,
    component: Component,
    ports: Vec<ContainerPort>,
    env: Vec<EnvVar>,
) -> Container {
    Container {
        name: component.suffix().to_string(),
        image: Some(image_ref(spec)),
        command: Some(vec![format!("appplatform-{}", component.suffix())]),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(ports),
        env: Some(env),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn pod_template(
    ctx: &InstanceIdentity,
    component: Component,
    container: Container,
) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(selector_labels(ctx, component)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(ctx.component_name(component)),
            containers: vec![container],
            ..Default::default()
        }),
    }
}

// ============================================================================
// Workloads
// ============================================================================

/// Build the application controller StatefulSet with the sharded replica
/// count computed for this pass
pub fn build_controller_statefulset(
    ctx: &InstanceIdentity,
    spec: &AppPlatformSpec,
    replicas: i32,
) -> StatefulSet {
    let component = Component::ApplicationController;
    let env = vec![EnvVar {
        name: "APPPLATFORM_CONTROLLER_REPLICAS".to_string(),
        value: Some(replicas.to_string()),
        ..Default::default()
    }];
    let container = platform_container(
        spec,
        component,
        vec![container_port("metrics", 8082)],
        env,
    );

    StatefulSet {
        metadata: component_meta(ctx, component),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(ctx, component)),
                ..Default::default()
            },
            service_name: ctx.component_name(component),
            template: pod_template(ctx, component, container),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build a Deployment for one of the stateless components
pub fn build_component_deployment(
    ctx: &InstanceIdentity,
    spec: &AppPlatformSpec,
    component: Component,
    replicas: Option<i32>,
) -> Deployment {
    let (ports, env) = match component {
        Component::Server => {
            let insecure = spec.server.as_ref().is_some_and(|s| s.insecure);
            (
                vec![container_port("http", 8080), container_port("https", 8083)],
                vec![EnvVar {
                    name: "APPPLATFORM_SERVER_INSECURE".to_string(),
                    value: Some(insecure.to_string()),
                    ..Default::default()
                }],
            )
        }
        Component::RepoServer => (
            vec![
                container_port("server", 8081),
                container_port("metrics", 8084),
            ],
            vec![],
        ),
        _ => (vec![container_port("metrics", 8085)], vec![]),
    };
    let container = platform_container(spec, component, ports, env);

    Deployment {
        metadata: component_meta(ctx, component),
        spec: Some(DeploymentSpec {
            replicas,
            selector: LabelSelector {
                match_labels: Some(selector_labels(ctx, component)),
                ..Default::default()
            },
            template: pod_template(ctx, component, container),
            ..Default::default()
        }),
        status: None,
    }
}

/// Mutation run on every desired workload before comparison: re-asserts the
/// managed-by label for the current pass, so an object adopted from an older
/// instance name is relabeled rather than silently kept.
fn apply_managed_by_label<K: Resource>(
    obj: &mut K,
    ctx: &ReconcileContext,
) -> std::result::Result<(), String> {
    obj.meta_mut()
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(LABEL_MANAGED_BY.to_string(), ctx.managed_by_value());
    Ok(())
}

fn stamp_image_change<K: Resource>(obj: &mut K) {
    obj.meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            IMAGE_CHANGED_ANNOTATION.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );
}

/// Ensure the workloads for every active component.
///
/// `strict_tls` reflects the ownership resolution of the repo-server
/// certificate secret and is surfaced to the API server as environment.
/// Compared fields are the ones this operator owns: replica count, the
/// container image (stamping the change annotation when corrected),
/// command and environment. The pod selector is immutable on both workload
/// kinds, so selector drift replaces the object. Fields the API server
/// defaults (strategy, history limits, scheduler knobs) are left alone.
pub async fn ensure_workloads(
    ctx: &ReconcileContext,
    platform: &AppPlatform,
    controller_replicas: i32,
    strict_tls: bool,
) -> Result<()> {
    let mut failures = AggregateError::new();
    let spec = &platform.spec;

    let statefulsets: Api<StatefulSet> =
        Api::namespaced(ctx.client.clone(), &ctx.instance_namespace);
    let controller = build_controller_statefulset(ctx, spec, controller_replicas);
    let request = ManagedObjectRequest::new(controller)
        .owned_by(owner_reference(ctx))
        .mutate(apply_managed_by_label)
        .compare(FieldComparison::field(
            "replicas",
            |s: &StatefulSet| s.spec.as_ref().map(|sp| &sp.replicas),
            |s: &mut StatefulSet| s.spec.as_mut().map(|sp| &mut sp.replicas),
        ))
        .compare(
            FieldComparison::field(
                "image",
                |s: &StatefulSet| {
                    s.spec
                        .as_ref()
                        .and_then(|sp| sp.template.spec.as_ref())
                        .and_then(|p| p.containers.first())
                        .map(|c| &c.image)
                },
                |s: &mut StatefulSet| {
                    s.spec
                        .as_mut()
                        .and_then(|sp| sp.template.spec.as_mut())
                        .and_then(|p| p.containers.first_mut())
                        .map(|c| &mut c.image)
                },
            )
            .with_side_effect(stamp_image_change),
        )
        .compare(FieldComparison::field(
            "env",
            |s: &StatefulSet| {
                s.spec
                    .as_ref()
                    .and_then(|sp| sp.template.spec.as_ref())
                    .and_then(|p| p.containers.first())
                    .map(|c| &c.env)
            },
            |s: &mut StatefulSet| {
                s.spec
                    .as_mut()
                    .and_then(|sp| sp.template.spec.as_mut())
                    .and_then(|p| p.containers.first_mut())
                    .map(|c| &mut c.env)
            },
        ))
        .compare(FieldComparison::immutable("selector", |s: &StatefulSet| {
            s.spec.as_ref().map(|sp| &sp.selector)
        }));
    failures.collect(
        reconcile_object(ctx, &statefulsets, request)
            .await
            .map(|_| ()),
    );

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.instance_namespace);

    let autoscaled = spec
        .server
        .as_ref()
        .is_some_and(|s| s.autoscaling.is_some());
    let server_replicas = if autoscaled {
        // The autoscaler owns the count once it exists.
        None
    } else {
        spec.server.as_ref().and_then(|s| s.replicas).or(Some(1))
    };
    let mut server = build_component_deployment(ctx, spec, Component::Server, server_replicas);
    if let Some(container) = server
        .spec
        .as_mut()
        .and_then(|sp| sp.template.spec.as_mut())
        .and_then(|p| p.containers.first_mut())
    {
        container.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: "APPPLATFORM_REPO_SERVER_STRICT_TLS".to_string(),
            value: Some(strict_tls.to_string()),
            ..Default::default()
        });
    }
    failures.collect(ensure_deployment(ctx, &deployments, server, !autoscaled).await);

    let repo_replicas = spec.repo_server.as_ref().and_then(|r| r.replicas).or(Some(1));
    failures.collect(
        ensure_deployment(
            ctx,
            &deployments,
            build_component_deployment(ctx, spec, Component::RepoServer, repo_replicas),
            true,
        )
        .await,
    );

    if spec.applicationset_enabled() {
        failures.collect(
            ensure_deployment(
                ctx,
                &deployments,
                build_component_deployment(
                    ctx,
                    spec,
                    Component::ApplicationSetController,
                    Some(1),
                ),
                true,
            )
            .await,
        );
    } else {
        failures.collect(
            delete_object(
                &deployments,
                &ctx.component_name(Component::ApplicationSetController),
            )
            .await
            .map(|_| ()),
        );
    }

    failures.into_result()
}

async fn ensure_deployment(
    ctx: &ReconcileContext,
    api: &Api<Deployment>,
    deployment: Deployment,
    compare_replicas: bool,
) -> Result<()> {
    let mut request = ManagedObjectRequest::new(deployment)
        .owned_by(owner_reference(ctx))
        .mutate(apply_managed_by_label)
        .compare(
            FieldComparison::field(
                "image",
                |d: &Deployment| {
                    d.spec
                        .as_ref()
                        .and_then(|sp| sp.template.spec.as_ref())
                        .and_then(|p| p.containers.first())
                        .map(|c| &c.image)
                },
                |d: &mut Deployment| {
                    d.spec
                        .as_mut()
                        .and_then(|sp| sp.template.spec.as_mut())
                        .and_then(|p| p.containers.first_mut())
                        .map(|c| &mut c.image)
                },
            )
            .with_side_effect(stamp_image_change),
        )
        .compare(FieldComparison::field(
            "env",
            |d: &Deployment| {
                d.spec
                    .as_ref()
                    .and_then(|sp| sp.template.spec.as_ref())
                    .and_then(|p| p.containers.first())
                    .map(|c| &c.env)
            },
            |d: &mut Deployment| {
                d.spec
                    .as_mut()
                    .and_then(|sp| sp.template.spec.as_mut())
                    .and_then(|p| p.containers.first_mut())
                    .map(|c| &mut c.env)
            },
        ))
        .compare(FieldComparison::immutable("selector", |d: &Deployment| {
            d.spec.as_ref().map(|sp| &sp.selector)
        }));
    if compare_replicas {
        request = request.compare(FieldComparison::field(
            "replicas",
            |d: &Deployment| d.spec.as_ref().map(|sp| &sp.replicas),
            |d: &mut Deployment| d.spec.as_mut().map(|sp| &mut sp.replicas),
        ));
    }

    reconcile_object(ctx, api, request).await.map(|_| ())
}

// ============================================================================
// Services
// ============================================================================

fn service_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Build the ClusterIP Service for one component
pub fn build_component_service(
    ctx: &InstanceIdentity,
    component: Component,
    ports: Vec<ServicePort>,
) -> Service {
    Service {
        metadata: component_meta(ctx, component),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(ctx, component)),
            ports: Some(ports),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Ensure the component Services.
///
/// Only the fields this operator sets are compared; the cluster-assigned
/// fields (clusterIP, ipFamilies) are expected to drift and left alone.
pub async fn ensure_services(ctx: &ReconcileContext, platform: &AppPlatform) -> Result<()> {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &ctx.instance_namespace);
    let mut failures = AggregateError::new();

    let mut services = vec![
        build_component_service(
            ctx,
            Component::ApplicationController,
            vec![service_port("metrics", 8082, 8082)],
        ),
        build_component_service(
            ctx,
            Component::Server,
            vec![
                service_port("http", 80, 8080),
                service_port("https", 443, 8083),
            ],
        ),
        build_component_service(
            ctx,
            Component::RepoServer,
            vec![
                service_port("server", 8081, 8081),
                service_port("metrics", 8084, 8084),
            ],
        ),
    ];
    if platform.spec.applicationset_enabled() {
        services.push(build_component_service(
            ctx,
            Component::ApplicationSetController,
            vec![service_port("metrics", 8085, 8085)],
        ));
    }

    for service in services {
        let request = ManagedObjectRequest::new(service)
            .owned_by(owner_reference(ctx))
            .compare(FieldComparison::field(
                "selector",
                |s: &Service| s.spec.as_ref().map(|sp| &sp.selector),
                |s: &mut Service| s.spec.as_mut().map(|sp| &mut sp.selector),
            ))
            .compare(FieldComparison::field(
                "ports",
                |s: &Service| s.spec.as_ref().map(|sp| &sp.ports),
                |s: &mut Service| s.spec.as_mut().map(|sp| &mut sp.ports),
            ))
            .compare(FieldComparison::field(
                "type",
                |s: &Service| s.spec.as_ref().map(|sp| &sp.type_),
                |s: &mut Service| s.spec.as_mut().map(|sp| &mut sp.type_),
            ));
        failures.collect(reconcile_object(ctx, &api, request).await.map(|_| ()));
    }

    failures.into_result()
}

// ============================================================================
// Ingress
// ============================================================================

pub fn build_server_ingress(ctx: &InstanceIdentity, config: &IngressConfig) -> Ingress {
    let component = Component::Server;
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: ctx.component_name(component),
            port: Some(ServiceBackendPort {
                name: Some("http".to_string()),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    let tls = config.tls_secret_name.as_ref().map(|secret| {
        vec![IngressTLS {
            hosts: Some(vec![config.host.clone()]),
            secret_name: Some(secret.clone()),
        }]
    });

    let mut metadata = component_meta(ctx, component);
    if let Some(annotations) = &config.annotations {
        metadata.annotations = Some(annotations.clone());
    }

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: config.class_name.clone(),
            rules: Some(vec![IngressRule {
                host: Some(config.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(config.path.clone()),
                        path_type: "Prefix".to_string(),
                        backend,
                    }],
                }),
            }]),
            tls,
            ..Default::default()
        }),
        status: None,
    }
}

/// Ensure the server Ingress while configured, delete it once the config is
/// removed from the spec
pub async fn ensure_server_ingress(ctx: &ReconcileContext, platform: &AppPlatform) -> Result<()> {
    let api: Api<Ingress> = Api::namespaced(ctx.client.clone(), &ctx.instance_namespace);
    let name = ctx.component_name(Component::Server);

    let Some(config) = platform.spec.server.as_ref().and_then(|s| s.ingress.as_ref()) else {
        return delete_object(&api, &name).await.map(|_| ());
    };

    let request = ManagedObjectRequest::new(build_server_ingress(ctx, config))
        .owned_by(owner_reference(ctx))
        .compare(FieldComparison::field(
            "spec",
            |i: &Ingress| i.spec.as_ref(),
            |i: &mut Ingress| i.spec.as_mut(),
        ));
    reconcile_object(ctx, &api, request).await.map(|_| ())
}

// ============================================================================
// HorizontalPodAutoscaler
// ============================================================================

pub fn build_server_hpa(ctx: &InstanceIdentity, config: &AutoscalingConfig) -> HorizontalPodAutoscaler {
    let component = Component::Server;
    let metrics = config.target_cpu_utilization_percentage.map(|target| {
        vec![MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: "cpu".to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some(target),
                    ..Default::default()
                },
            }),
            ..Default::default()
        }]
    });

    HorizontalPodAutoscaler {
        metadata: component_meta(ctx, component),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: ctx.component_name(component),
            },
            min_replicas: Some(config.min_replicas),
            max_replicas: config.max_replicas,
            metrics,
            ..Default::default()
        }),
        status: None,
    }
}

/// Ensure the server HPA while autoscaling is configured, delete it once
/// autoscaling is disabled
pub async fn ensure_server_hpa(ctx: &ReconcileContext, platform: &AppPlatform) -> Result<()> {
    let api: Api<HorizontalPodAutoscaler> =
        Api::namespaced(ctx.client.clone(), &ctx.instance_namespace);
    let name = ctx.component_name(Component::Server);

    let Some(config) = platform
        .spec
        .server
        .as_ref()
        .and_then(|s| s.autoscaling.as_ref())
    else {
        return delete_object(&api, &name).await.map(|_| ());
    };

    let request = ManagedObjectRequest::new(build_server_hpa(ctx, config))
        .owned_by(owner_reference(ctx))
        .compare(FieldComparison::field(
            "spec",
            |h: &HorizontalPodAutoscaler| h.spec.as_ref(),
            |h: &mut HorizontalPodAutoscaler| h.spec.as_mut(),
        ));
    reconcile_object(ctx, &api, request).await.map(|_| ())
}
