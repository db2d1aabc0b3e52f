//! Ambient run context threaded through every layer of a reconcile run.

use crate::cancellation::CancellationToken;
use crate::errors::ConvergeError;
use std::sync::Arc;

/// The ambient context for one reconcile run.
///
/// Owned by the caller; every blocking operation observes its cancellation
/// token and aborts promptly with a cancellation-class error.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: Arc<CancellationToken>,
}

impl RunContext {
    /// Creates a context that is never cancelled externally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context driven by an existing cancellation token.
    #[must_use]
    pub fn with_token(token: Arc<CancellationToken>) -> Self {
        Self { token }
    }

    /// Returns the cancellation token for this run.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Errors out if the run has been cancelled.
    pub fn ensure_active(&self) -> Result<(), ConvergeError> {
        if self.token.is_cancelled() {
            let reason = self
                .token
                .reason()
                .unwrap_or_else(|| "cancelled".to_string());
            return Err(ConvergeError::Cancelled(reason));
        }
        Ok(())
    }
}
