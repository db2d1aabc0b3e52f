//! HTTP client for talking to a running Grafana instance.
//!
//! The client resolves its base URL and credentials from the instance
//! object, builds a `reqwest` client honoring the spec's TLS and timeout
//! settings, and exposes the version probe used after every successful
//! convergence.

use crate::api::Grafana;
use crate::cluster::SecretStore;
use crate::context::RunContext;
use crate::errors::ConvergeError;
use crate::stages::admin_user::{ADMIN_PASSWORD_KEY, ADMIN_USER_KEY};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Default request timeout when the spec does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the settings endpoint the version probe reads.
const FRONTEND_SETTINGS_PATH: &str = "/api/frontend/settings";

/// Resolved credentials for the instance API.
#[derive(Debug, Clone)]
enum Credentials {
    /// Bearer token from an API key secret.
    Token(String),
    /// Basic auth from admin user and password.
    Basic { user: String, password: String },
    /// No credentials resolved.
    Anonymous,
}

/// A client bound to one instance, carrying its base URL and credentials.
pub struct InstanceClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl InstanceClient {
    /// Builds a client for the instance.
    ///
    /// The base URL is the reported admin URL when present, falling back to
    /// the external URL for external instances. Credential precedence is an
    /// API key, then explicit admin selectors, then the managed admin
    /// secret.
    pub async fn new(
        ctx: &RunContext,
        instance: &Grafana,
        secrets: &Arc<dyn SecretStore>,
    ) -> Result<Self, ConvergeError> {
        ctx.ensure_active()?;

        let base_url = resolve_admin_url(instance)?;
        let credentials = resolve_credentials(instance, secrets).await?;
        let http = build_http_client(instance, secrets).await?;

        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// The resolved base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probes the instance for its running version.
    ///
    /// Reads `buildInfo.version` from the frontend settings endpoint. A
    /// reachable instance reporting an empty version is an error, as is any
    /// non-success status. The request is abandoned as soon as the run is
    /// cancelled.
    pub async fn get_version(&self, ctx: &RunContext) -> Result<String, ConvergeError> {
        ctx.ensure_active()?;
        let url = format!("{}{FRONTEND_SETTINGS_PATH}", self.base_url);
        tracing::debug!(%url, "probing instance version");

        let request = self.with_auth(self.http.get(&url));
        let response = tokio::select! {
            response = request.send() => response?,
            () = ctx.token().cancelled() => {
                return Err(ConvergeError::Cancelled(
                    ctx.token().reason().unwrap_or_else(|| "run cancelled".to_string()),
                ));
            }
        };

        if !response.status().is_success() {
            return Err(ConvergeError::UnexpectedStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let settings: FrontendSettings = response.json().await?;
        if settings.build_info.version.is_empty() {
            return Err(ConvergeError::EmptyVersion);
        }
        Ok(settings.build_info.version)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Credentials::Token(token) => {
                request.header("Authorization", format!("Bearer {token}"))
            }
            Credentials::Basic { user, password } => {
                let encoded = BASE64.encode(format!("{user}:{password}"));
                request.header("Authorization", format!("Basic {encoded}"))
            }
            Credentials::Anonymous => request,
        }
    }
}

/// Returns the URL the instance is administered at.
///
/// The reported admin URL wins once a convergence has recorded one; before
/// that, external instances fall back to their spec URL. A managed instance
/// with no recorded URL is not reachable yet.
pub fn resolve_admin_url(instance: &Grafana) -> Result<String, ConvergeError> {
    if !instance.status.admin_url.is_empty() {
        return Ok(trim_trailing_slash(&instance.status.admin_url));
    }
    if let Some(external) = &instance.spec.external {
        if !external.url.is_empty() {
            return Ok(trim_trailing_slash(&external.url));
        }
    }
    Err(ConvergeError::InvalidSpec(
        "no admin URL is available for the instance".to_string(),
    ))
}

fn trim_trailing_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

async fn resolve_credentials(
    instance: &Grafana,
    secrets: &Arc<dyn SecretStore>,
) -> Result<Credentials, ConvergeError> {
    let namespace = &instance.metadata.namespace;

    if let Some(external) = &instance.spec.external {
        if let Some(selector) = &external.api_key {
            let token = require_secret(secrets, namespace, &selector.name, &selector.key)
                .await?;
            return Ok(Credentials::Token(token));
        }
        return match (&external.admin_user, &external.admin_password) {
            (Some(user_ref), Some(password_ref)) => {
                let user =
                    require_secret(secrets, namespace, &user_ref.name, &user_ref.key)
                        .await?;
                let password = require_secret(
                    secrets,
                    namespace,
                    &password_ref.name,
                    &password_ref.key,
                )
                .await?;
                Ok(Credentials::Basic { user, password })
            }
            (None, None) => Ok(Credentials::Anonymous),
            _ => Err(ConvergeError::MissingCredentials(
                "external basic auth needs both adminUser and adminPassword".to_string(),
            )),
        };
    }

    // Managed instances authenticate with the admin secret owned by the
    // admin-user stage.
    let secret_name = instance.admin_secret_name();
    let user = require_secret(secrets, namespace, &secret_name, ADMIN_USER_KEY).await?;
    let password =
        require_secret(secrets, namespace, &secret_name, ADMIN_PASSWORD_KEY).await?;
    Ok(Credentials::Basic { user, password })
}

async fn require_secret(
    secrets: &Arc<dyn SecretStore>,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String, ConvergeError> {
    secrets
        .get_value(namespace, name, key)
        .await?
        .ok_or_else(|| ConvergeError::SecretNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        })
}

async fn build_http_client(
    instance: &Grafana,
    secrets: &Arc<dyn SecretStore>,
) -> Result<reqwest::Client, ConvergeError> {
    let mut builder = reqwest::Client::builder().timeout(
        instance
            .spec
            .client
            .as_ref()
            .and_then(|c| c.timeout_seconds)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
    );

    if let Some(tls) = instance.spec.client.as_ref().and_then(|c| c.tls.as_ref()) {
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(selector) = &tls.client_certificate {
            let pem = require_secret(
                secrets,
                &instance.metadata.namespace,
                &selector.name,
                &selector.key,
            )
            .await?;
            let identity = reqwest::Identity::from_pem(pem.as_bytes())?;
            builder = builder.identity(identity);
        }
    }

    Ok(builder.build()?)
}

/// Probes a running instance for its version.
///
/// The controller depends on this trait rather than the concrete client so
/// tests can substitute canned probes.
#[async_trait]
pub trait VersionProbe: Send + Sync {
    /// Returns the version the instance reports.
    async fn probe(&self, ctx: &RunContext, instance: &Grafana)
        -> Result<String, ConvergeError>;
}

/// The production probe, building a fresh [`InstanceClient`] per call.
pub struct HttpVersionProbe {
    secrets: Arc<dyn SecretStore>,
}

impl HttpVersionProbe {
    /// Creates a probe reading credentials from the secret store.
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl VersionProbe for HttpVersionProbe {
    async fn probe(
        &self,
        ctx: &RunContext,
        instance: &Grafana,
    ) -> Result<String, ConvergeError> {
        let client = InstanceClient::new(ctx, instance, &self.secrets)
            .await
            .map_err(ConvergeError::version_detection)?;
        client
            .get_version(ctx)
            .await
            .map_err(ConvergeError::version_detection)
    }
}

#[derive(Debug, Deserialize)]
struct FrontendSettings {
    #[serde(rename = "buildInfo", default)]
    build_info: BuildInfo,
}

#[derive(Debug, Default, Deserialize)]
struct BuildInfo {
    #[serde(default)]
    version: String,
}
