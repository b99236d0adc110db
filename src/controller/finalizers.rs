//! Finalizer handling for AppPlatform cleanup
//!
//! Finalizers ensure that when an AppPlatform is deleted:
//! 1. Cross-namespace RBAC pairs are removed (they carry no owner reference)
//! 2. Cluster-scoped grants are removed
//!
//! Objects in the instance's own namespace are owner-referenced and left to
//! Kubernetes garbage collection.

use kube::ResourceExt;

use crate::crd::AppPlatform;

/// Finalizer name used to protect AppPlatform resources
///
/// This finalizer is added when an AppPlatform is created and prevents
/// the resource from being deleted until cleanup is complete.
pub const APP_PLATFORM_FINALIZER: &str = "appplatform.appplatform.io/finalizer";

/// Check if the platform is being deleted
///
/// A deletion timestamp indicates the user has requested deletion,
/// but finalizers are preventing the actual removal.
#[allow(dead_code)]
pub fn is_being_deleted(platform: &AppPlatform) -> bool {
    platform.metadata.deletion_timestamp.is_some()
}

/// Check if the platform has our finalizer
#[allow(dead_code)]
pub fn has_finalizer(platform: &AppPlatform) -> bool {
    platform
        .finalizers()
        .iter()
        .any(|f| f == APP_PLATFORM_FINALIZER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_name() {
        assert_eq!(APP_PLATFORM_FINALIZER, "appplatform.appplatform.io/finalizer");
    }
}
