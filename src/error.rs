//! Error types for the AppPlatform operator
//!
//! Hard errors abort the reconciliation of the object they occurred on and
//! are surfaced to the controller's error policy. Multi-object sweeps (the
//! RBAC namespace loops, cleanup passes) collect per-item errors into an
//! [`AggregateError`] so one failing namespace never blocks the rest.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// A cluster call failed; carries the operation and the object identity.
    #[error("{operation} {kind} {name}: {source}")]
    ClusterApi {
        operation: &'static str,
        kind: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// A desired-object mutation failed before any cluster call was made.
    #[error("mutation failed for {kind} {name}: {reason}")]
    Mutation {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("finalizer error: {0}")]
    FinalizerError(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl Error {
    pub fn cluster_api(
        operation: &'static str,
        kind: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::ClusterApi {
            operation,
            kind: kind.into(),
            name: name.into(),
            source,
        }
    }

    /// Whether a shorter requeue is worthwhile.
    ///
    /// Conflicts, throttling and server-side failures clear on their own;
    /// validation and configuration errors do not change until the spec does.
    pub fn is_retriable(&self) -> bool {
        fn retriable_kube(err: &kube::Error) -> bool {
            match err {
                kube::Error::Api(ae) => ae.code == 409 || ae.code == 429 || ae.code >= 500,
                _ => true,
            }
        }

        match self {
            Error::KubeError(e) => retriable_kube(e),
            Error::ClusterApi { source, .. } => retriable_kube(source),
            Error::Aggregate(agg) => agg.errors().iter().any(Error::is_retriable),
            Error::Mutation { .. } | Error::ValidationError(_) | Error::ConfigError(_) => false,
            Error::FinalizerError(_) => true,
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        use kube::runtime::finalizer::Error as Finalizer;
        match err {
            Finalizer::ApplyFailed(e) | Finalizer::CleanupFailed(e) => e,
            other => Error::FinalizerError(other.to_string()),
        }
    }
}

/// Container preserving every error from a multi-item sweep.
///
/// Items are pushed as they fail; [`AggregateError::into_result`] collapses
/// the container back into `Ok(())` when nothing was collected.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn extend(&mut self, other: AggregateError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Collect a fallible step, keeping the sweep going.
    pub fn collect(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(self))
        }
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s): ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_aggregate_is_ok() {
        let agg = AggregateError::new();
        assert!(agg.is_empty());
        assert!(agg.into_result().is_ok());
    }

    #[test]
    fn test_aggregate_preserves_all_errors() {
        let mut agg = AggregateError::new();
        agg.push(Error::ConfigError("first".to_string()));
        agg.push(Error::ValidationError("second".to_string()));
        agg.collect(Ok(()));
        agg.collect(Err(Error::ConfigError("third".to_string())));

        assert_eq!(agg.len(), 3);
        let err = agg.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("3 error(s)"));
        assert!(msg.contains("first"));
        assert!(msg.contains("third"));
    }

    #[test]
    fn test_mutation_errors_are_not_retriable() {
        let err = Error::Mutation {
            kind: "Deployment".to_string(),
            name: "demo-server".to_string(),
            reason: "bad image".to_string(),
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_aggregate_retriable_if_any_member_is() {
        let mut agg = AggregateError::new();
        agg.push(Error::ConfigError("static".to_string()));
        assert!(!Error::Aggregate(agg).is_retriable());
    }
}
