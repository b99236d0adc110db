//! Unit tests for the generic reconciliation protocol.
//!
//! These tests exercise the pure comparison layer: idempotence, single
//! update per drift, immutable-field short-circuiting and side-effects.
//! The cluster-facing paths are driven by the same `sync_fields` walk, so
//! the write behavior follows directly from the outcomes verified here.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::controller::protocol::{sync_fields, DriftOutcome, FieldComparison};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn deployment(replicas: i32, image: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("demo-server".to_string()),
                namespace: Some("platform".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "server".to_string(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn replicas_comparison() -> FieldComparison<Deployment> {
        FieldComparison::field(
            "replicas",
            |d: &Deployment| d.spec.as_ref().map(|s| &s.replicas),
            |d: &mut Deployment| d.spec.as_mut().map(|s| &mut s.replicas),
        )
    }

    fn image_comparison() -> FieldComparison<Deployment> {
        FieldComparison::field(
            "image",
            |d: &Deployment| {
                d.spec
                    .as_ref()
                    .and_then(|s| s.template.spec.as_ref())
                    .and_then(|p| p.containers.first())
                    .map(|c| &c.image)
            },
            |d: &mut Deployment| {
                d.spec
                    .as_mut()
                    .and_then(|s| s.template.spec.as_mut())
                    .and_then(|p| p.containers.first_mut())
                    .map(|c| &mut c.image)
            },
        )
    }

    fn role_binding(role_name: &str, subject_name: &str) -> RoleBinding {
        RoleBinding {
            metadata: ObjectMeta {
                name: Some("demo-server".to_string()),
                namespace: Some("team-a".to_string()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: role_name.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: subject_name.to_string(),
                namespace: Some("platform".to_string()),
                ..Default::default()
            }]),
        }
    }

    fn role_binding_comparisons() -> Vec<FieldComparison<RoleBinding>> {
        vec![
            FieldComparison::immutable("roleRef", |b: &RoleBinding| Some(&b.role_ref)),
            FieldComparison::field(
                "subjects",
                |b: &RoleBinding| Some(&b.subjects),
                |b: &mut RoleBinding| Some(&mut b.subjects),
            ),
        ]
    }

    // -----------------------------------------------------------------------
    // Idempotence
    // -----------------------------------------------------------------------

    #[test]
    fn test_identical_objects_are_clean() {
        let mut existing = deployment(3, "app:v1.0.0");
        let desired = deployment(3, "app:v1.0.0");
        let comparisons = vec![replicas_comparison(), image_comparison()];

        assert_eq!(
            sync_fields(&mut existing, &desired, &comparisons),
            DriftOutcome::Clean
        );
    }

    #[test]
    fn test_second_sync_after_drift_is_clean() {
        let mut existing = deployment(1, "app:v1.0.0");
        let desired = deployment(3, "app:v1.0.0");
        let comparisons = vec![replicas_comparison(), image_comparison()];

        let first = sync_fields(&mut existing, &desired, &comparisons);
        assert_eq!(first, DriftOutcome::Updated(vec!["replicas"]));

        // The corrected object matches desired on every compared field, so
        // the next pass performs no write.
        assert_eq!(
            sync_fields(&mut existing, &desired, &comparisons),
            DriftOutcome::Clean
        );
    }

    // -----------------------------------------------------------------------
    // Single update per drift
    // -----------------------------------------------------------------------

    #[test]
    fn test_single_field_drift_updates_only_that_field() {
        let mut existing = deployment(3, "app:v1.0.0");
        let desired = deployment(3, "app:v1.1.0");
        let comparisons = vec![replicas_comparison(), image_comparison()];

        let outcome = sync_fields(&mut existing, &desired, &comparisons);
        assert_eq!(outcome, DriftOutcome::Updated(vec!["image"]));

        let image = existing
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.as_deref());
        assert_eq!(image, Some("app:v1.1.0"));
        assert_eq!(existing.spec.as_ref().and_then(|s| s.replicas), Some(3));
    }

    #[test]
    fn test_multiple_drifts_collected_into_one_outcome() {
        let mut existing = deployment(1, "app:v1.0.0");
        let desired = deployment(3, "app:v1.1.0");
        let comparisons = vec![replicas_comparison(), image_comparison()];

        // Both fields corrected in one walk: the caller issues exactly one
        // update call for the whole object.
        assert_eq!(
            sync_fields(&mut existing, &desired, &comparisons),
            DriftOutcome::Updated(vec!["replicas", "image"])
        );
    }

    // -----------------------------------------------------------------------
    // Immutable-field handling
    // -----------------------------------------------------------------------

    #[test]
    fn test_immutable_role_ref_drift_short_circuits() {
        let mut existing = role_binding("role-a", "demo-server");
        let desired = role_binding("role-b", "someone-else");

        let outcome = sync_fields(&mut existing, &desired, &role_binding_comparisons());
        assert_eq!(outcome, DriftOutcome::ImmutableDrift("roleRef"));

        // Nothing was written back: the object is deleted wholesale, not
        // partially corrected.
        assert_eq!(existing.role_ref.name, "role-a");
        let subject = existing.subjects.as_ref().and_then(|s| s.first()).unwrap();
        assert_eq!(subject.name, "demo-server");
    }

    #[test]
    fn test_mutable_drift_applies_when_role_ref_matches() {
        let mut existing = role_binding("role-a", "old-account");
        let desired = role_binding("role-a", "new-account");

        let outcome = sync_fields(&mut existing, &desired, &role_binding_comparisons());
        assert_eq!(outcome, DriftOutcome::Updated(vec!["subjects"]));

        let subject = existing.subjects.as_ref().and_then(|s| s.first()).unwrap();
        assert_eq!(subject.name, "new-account");
    }

    // -----------------------------------------------------------------------
    // Side-effects
    // -----------------------------------------------------------------------

    #[test]
    fn test_side_effect_runs_only_on_drift() {
        let fired = Arc::new(AtomicUsize::new(0));

        let comparison = |counter: Arc<AtomicUsize>| {
            image_comparison().with_side_effect(move |d: &mut Deployment| {
                counter.fetch_add(1, Ordering::SeqCst);
                d.metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert("image-changed".to_string(), "yes".to_string());
            })
        };

        let mut existing = deployment(3, "app:v1.0.0");
        let desired = deployment(3, "app:v1.0.0");
        sync_fields(&mut existing, &desired, &[comparison(Arc::clone(&fired))]);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(existing.metadata.annotations.is_none());

        let desired = deployment(3, "app:v1.1.0");
        sync_fields(&mut existing, &desired, &[comparison(Arc::clone(&fired))]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let annotations = existing.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations.get("image-changed").map(String::as_str), Some("yes"));
    }

    // -----------------------------------------------------------------------
    // Absent parents
    // -----------------------------------------------------------------------

    #[test]
    fn test_missing_nested_parent_counts_as_difference() {
        let mut existing = Deployment::default();
        let desired = deployment(3, "app:v1.0.0");

        // Existing has no spec at all; the comparison reports drift but the
        // write-back has no slot and leaves the object untouched.
        let outcome = sync_fields(&mut existing, &desired, &[replicas_comparison()]);
        assert_eq!(outcome, DriftOutcome::Updated(vec!["replicas"]));
        assert!(existing.spec.is_none());
    }

    #[test]
    fn test_empty_comparison_list_is_clean() {
        let mut existing = deployment(1, "app:v1.0.0");
        let desired = deployment(9, "app:v2.0.0");
        assert_eq!(
            sync_fields(&mut existing, &desired, &[]),
            DriftOutcome::Clean
        );
    }
}
