//! Controller configuration.

use std::time::Duration;

/// Version deployed when the spec pins none.
pub const DEFAULT_GRAFANA_VERSION: &str = "10.4.3";

/// Environment variable carrying a digest-pinned image override.
pub const IMAGE_OVERRIDE_ENV: &str = "RELATED_IMAGE_GRAFANA";

/// Tunable knobs for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Digest-pinned image reference overriding the default version, if the
    /// deployment environment supplies one.
    pub image_override: Option<String>,
    /// Requeue delay when a stage reports in-progress.
    pub requeue_in_progress: Duration,
    /// Base delay for exponential failure backoff.
    pub backoff_base: Duration,
    /// Cap on the failure backoff delay.
    pub backoff_max: Duration,
    /// How many times a lost status-write race is retried before giving up.
    pub conflict_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            image_override: None,
            requeue_in_progress: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
            conflict_retries: 3,
        }
    }
}

impl ControllerConfig {
    /// Reads configuration from the process environment.
    ///
    /// An image override is honored only when it is pinned by digest;
    /// anything else is ignored so a mistyped tag cannot silently replace
    /// the default image.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(IMAGE_OVERRIDE_ENV) {
            config = config.with_image_override(&value);
        }
        config
    }

    /// Sets the image override, keeping it only when digest-pinned.
    #[must_use]
    pub fn with_image_override(mut self, image: &str) -> Self {
        if is_digest_pinned(image) {
            self.image_override = Some(image.to_string());
        } else if !image.is_empty() {
            tracing::warn!(%image, "ignoring image override without a digest pin");
        }
        self
    }

    /// The version an unpinned spec is converged to.
    #[must_use]
    pub fn pinned_version(&self) -> String {
        self.image_override
            .clone()
            .unwrap_or_else(|| DEFAULT_GRAFANA_VERSION.to_string())
    }

    /// Exponential backoff delay for the given consecutive failure count.
    #[must_use]
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.backoff_max)
    }
}

/// Whether an image reference carries a sha256 digest pin.
fn is_digest_pinned(image: &str) -> bool {
    use regex::Regex;
    use std::sync::OnceLock;

    static DIGEST: OnceLock<Regex> = OnceLock::new();
    let digest = DIGEST
        .get_or_init(|| Regex::new(r"@sha256:[0-9a-f]{64}$").unwrap_or_else(|_| unreachable!()));
    digest.is_match(image)
}
