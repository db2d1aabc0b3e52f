//! Content model building for externally synced payloads.
//!
//! A [`DatasourceModel`] is the exact payload the instance API expects, plus
//! a deterministic content hash. The hash is the sole signal used to decide
//! whether a payload must be pushed again: stable for identical inputs,
//! changed whenever the plaintext config or any resolved secure field
//! changes.

use crate::api::GrafanaDatasource;
use crate::cluster::SecretStore;
use crate::context::RunContext;
use crate::errors::ConvergeError;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// The built datasource payload ready for the instance API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceModel {
    /// Display name.
    pub name: String,
    /// Datasource type.
    #[serde(rename = "type")]
    pub type_: String,
    /// Access mode.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub access: String,
    /// Target URL.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Datasource user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Database name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Whether this is the default datasource.
    pub is_default: bool,
    /// Whether the datasource stays editable.
    pub editable: bool,
    /// Plaintext configuration, copied verbatim from the spec.
    pub json_data: Value,
    /// Secure configuration with secret references resolved to plaintext.
    pub secure_json_data: Map<String, Value>,
}

/// Builds [`DatasourceModel`]s, dereferencing secret references through the
/// secret store.
pub struct ContentModelBuilder {
    secrets: Arc<dyn SecretStore>,
}

impl ContentModelBuilder {
    /// Creates a builder over the secret store.
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    /// Builds the payload and its content hash.
    ///
    /// Plaintext config is copied verbatim. Every secure sub-field that is a
    /// `{"secretKeyRef": {"name", "key"}}` reference is dereferenced; a
    /// reference naming a nonexistent secret or key is a hard error, never
    /// an empty fallback. Sub-fields that are already literal values are
    /// preserved byte-for-byte. The source object is never mutated.
    pub async fn build(
        &self,
        ctx: &RunContext,
        datasource: &GrafanaDatasource,
    ) -> Result<(DatasourceModel, String), ConvergeError> {
        ctx.ensure_active()?;

        let spec = &datasource.spec.datasource;
        let json_data = match &spec.json_data {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => spec.json_data.clone(),
            other => {
                return Err(ConvergeError::MalformedContent {
                    section: "jsonData".to_string(),
                    reason: format!("expected an object, got {}", value_kind(other)),
                })
            }
        };

        let secure_json_data = self
            .resolve_secure_section(&datasource.metadata.namespace, &spec.secure_json_data)
            .await?;

        let model = DatasourceModel {
            name: spec.name.clone(),
            type_: spec.type_.clone(),
            access: spec.access.clone(),
            url: spec.url.clone(),
            user: spec.user.clone(),
            database: spec.database.clone(),
            is_default: spec.is_default,
            editable: spec.editable,
            json_data,
            secure_json_data,
        };
        let hash = content_hash(&model)?;
        Ok((model, hash))
    }

    async fn resolve_secure_section(
        &self,
        namespace: &str,
        secure: &Value,
    ) -> Result<Map<String, Value>, ConvergeError> {
        let fields = match secure {
            Value::Null => return Ok(Map::new()),
            Value::Object(fields) => fields,
            other => {
                return Err(ConvergeError::MalformedContent {
                    section: "secureJsonData".to_string(),
                    reason: format!("expected an object, got {}", value_kind(other)),
                })
            }
        };

        let mut resolved = Map::new();
        for (key, value) in fields {
            match secret_reference(value)? {
                Some((name, secret_key)) => {
                    let plaintext = self
                        .secrets
                        .get_value(namespace, name, secret_key)
                        .await?
                        .ok_or_else(|| ConvergeError::SecretNotFound {
                            namespace: namespace.to_string(),
                            name: name.to_string(),
                            key: secret_key.to_string(),
                        })?;
                    resolved.insert(key.clone(), Value::String(plaintext));
                }
                // Literal values round-trip untouched, including template
                // strings like `Bearer ${TOKEN}`.
                None => {
                    resolved.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(resolved)
    }
}

/// Extracts a `{"secretKeyRef": {"name", "key"}}` reference, if the value is
/// one. A value carrying `secretKeyRef` in any other shape is malformed.
fn secret_reference(value: &Value) -> Result<Option<(&str, &str)>, ConvergeError> {
    let Some(reference) = value.get("secretKeyRef") else {
        return Ok(None);
    };

    let name = reference.get("name").and_then(Value::as_str);
    let key = reference.get("key").and_then(Value::as_str);
    match (name, key) {
        (Some(name), Some(key)) if !name.is_empty() && !key.is_empty() => {
            Ok(Some((name, key)))
        }
        _ => Err(ConvergeError::MalformedContent {
            section: "secureJsonData".to_string(),
            reason: "secretKeyRef requires non-empty 'name' and 'key'".to_string(),
        }),
    }
}

/// Digests the model's canonical serialization.
///
/// Serialization order is stable (object keys are sorted), so the digest is
/// deterministic for identical input.
pub fn content_hash<T: Serialize>(model: &T) -> Result<String, ConvergeError> {
    let canonical = serde_json::to_vec(model)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Returns whether a payload must be pushed to the external API.
#[must_use]
pub fn needs_sync(recorded_hash: &str, built_hash: &str) -> bool {
    recorded_hash != built_hash
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
