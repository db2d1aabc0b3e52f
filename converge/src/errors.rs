//! Error types for the convergence engine.
//!
//! The taxonomy distinguishes hard stage failures (propagated, counted in
//! failure metrics, recorded in status) from recoverable conditions that are
//! expressed as outcomes rather than errors (a missing desired-state object,
//! a stage waiting on a dependency, a lost status-write race).

use crate::cluster::StoreError;
use crate::stages::StageName;
use thiserror::Error;

/// The main error type for convergence operations.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// A stage could not converge; carries the failing stage's name so
    /// operators can diagnose which phase broke.
    #[error("reconciler error in stage '{stage}': {source}")]
    Stage {
        /// The stage that failed.
        stage: StageName,
        /// The underlying failure.
        #[source]
        source: Box<ConvergeError>,
    },

    /// Version detection against the instance's administrative API failed.
    ///
    /// Client construction, credential resolution, request execution and
    /// response decoding all collapse into this single class, with the
    /// cause chained for diagnostics.
    #[error("version detection failed: {source}")]
    VersionDetection {
        /// The underlying failure.
        #[source]
        source: Box<ConvergeError>,
    },

    /// A secret reference named a nonexistent secret or key.
    #[error("secret '{namespace}/{name}' has no value for key '{key}'")]
    SecretNotFound {
        /// Namespace of the referenced secret.
        namespace: String,
        /// Name of the referenced secret.
        name: String,
        /// Key within the secret.
        key: String,
    },

    /// A content object's JSON section could not be interpreted.
    #[error("malformed content in '{section}': {reason}")]
    MalformedContent {
        /// The offending section (e.g. `secureJsonData`).
        section: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The server reported an empty version string; an empty version must
    /// never be recorded as a successful detection.
    #[error("empty version received from server")]
    EmptyVersion,

    /// The administrative API answered with a non-success status code.
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
        /// The requested URL.
        url: String,
    },

    /// The desired-state object is misconfigured beyond repair.
    #[error("invalid specification: {0}")]
    InvalidSpec(String),

    /// Authentication material required for the instance is not available.
    #[error("missing credential material: {0}")]
    MissingCredentials(String),

    /// The ambient run context was cancelled by the caller.
    #[error("run cancelled: {0}")]
    Cancelled(String),

    /// A cluster store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An HTTP request against the instance failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConvergeError {
    /// Wraps an error with the name of the stage it occurred in.
    #[must_use]
    pub fn stage(stage: StageName, source: ConvergeError) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Wraps an error into the version-detection failure class.
    #[must_use]
    pub fn version_detection(source: ConvergeError) -> Self {
        Self::VersionDetection {
            source: Box::new(source),
        }
    }

    /// Returns the failing stage name for stage-wrapped errors.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageName> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_carries_stage_name() {
        let err = ConvergeError::stage(
            StageName::Storage,
            ConvergeError::InvalidSpec("bad size".to_string()),
        );

        assert_eq!(err.failed_stage(), Some(StageName::Storage));
        assert!(err.to_string().contains("stage 'storage'"));
        assert!(err.to_string().contains("bad size"));
    }

    #[test]
    fn test_version_detection_chains_cause() {
        let err = ConvergeError::version_detection(ConvergeError::EmptyVersion);

        assert!(err.to_string().starts_with("version detection failed"));
        assert!(err.to_string().contains("empty version"));
    }

    #[test]
    fn test_secret_not_found_message() {
        let err = ConvergeError::SecretNotFound {
            namespace: "monitoring".to_string(),
            name: "prom-token".to_string(),
            key: "token".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "secret 'monitoring/prom-token' has no value for key 'token'"
        );
    }
}
