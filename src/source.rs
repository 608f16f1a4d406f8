//! # Sync Secret Source
//!
//! Reads the Kubernetes secret whose entries are synced into Vault.
//!
//! The source exposes a last-updated timestamp alongside the data. It is the
//! latest `managedFields[].time` of the secret (every server-side write
//! records one), falling back to `creationTimestamp` for secrets that were
//! never modified through a field manager.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Snapshot of the sync secret taken at the start of a cycle
#[derive(Clone)]
pub struct SourceSecret {
    /// Entry key to JSON-encoded credential payload
    pub data: BTreeMap<String, String>,
    pub last_updated_time: DateTime<Utc>,
}

impl std::fmt::Debug for SourceSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSecret")
            .field("keys", &self.data.keys())
            .field("last_updated_time", &self.last_updated_time)
            .finish()
    }
}

/// Read access to the sync secret
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the secret `name` in `namespace`
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<SourceSecret>;
}

/// [`SecretSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Read a single key of a secret as UTF-8.
    ///
    /// Used by token-based Vault authentication to fetch the Vault token.
    pub async fn get_secret_value(&self, name: &str, namespace: &str, key: &str) -> Result<String> {
        let secret = self.fetch(name, namespace).await?;
        secret_value(&secret, key)
            .with_context(|| format!("Failed to read key '{key}' of secret {namespace}/{name}"))
    }

    async fn fetch(&self, name: &str, namespace: &str) -> Result<Secret> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        secrets
            .get(name)
            .await
            .with_context(|| format!("Failed to get secret {namespace}/{name}"))
    }
}

#[async_trait]
impl SecretSource for KubeSecretStore {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<SourceSecret> {
        let secret = self.fetch(name, namespace).await?;

        let data = secret_string_data(&secret);
        let last_updated_time = last_updated_time(&secret).ok_or_else(|| {
            anyhow::anyhow!("Secret {namespace}/{name} has no creation or update timestamp")
        })?;

        debug!(
            "Read secret {}/{} with {} entries (last updated {})",
            namespace,
            name,
            data.len(),
            last_updated_time.to_rfc3339()
        );

        Ok(SourceSecret {
            data,
            last_updated_time,
        })
    }
}

/// Merge `data` (decoded bytes) and `stringData` into one map.
///
/// `stringData` wins on collision, matching how the API server folds it
/// into `data` on write. Values that are not UTF-8 are decoded lossily so
/// they fail later as a single bad entry instead of hiding the whole secret.
pub fn secret_string_data(secret: &Secret) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();

    if let Some(data) = &secret.data {
        for (key, value) in data {
            let decoded = match String::from_utf8(value.0.clone()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Value of key '{}' is not valid UTF-8: {}", key, e);
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            merged.insert(key.clone(), decoded);
        }
    }

    if let Some(string_data) = &secret.string_data {
        for (key, value) in string_data {
            merged.insert(key.clone(), value.clone());
        }
    }

    merged
}

/// Read one key strictly: missing keys and non-UTF-8 values are errors
pub fn secret_value(secret: &Secret, key: &str) -> Result<String> {
    if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
        return Ok(value.clone());
    }

    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| anyhow::anyhow!("Key '{key}' not found"))?;
    String::from_utf8(bytes.0.clone())
        .with_context(|| format!("Value of key '{key}' is not valid UTF-8"))
}

/// Latest managed field time, else the creation timestamp
pub fn last_updated_time(secret: &Secret) -> Option<DateTime<Utc>> {
    let managed = secret
        .metadata
        .managed_fields
        .iter()
        .flatten()
        .filter_map(|entry| entry.time.as_ref())
        .filter_map(to_utc)
        .max();

    managed.or_else(|| {
        secret
            .metadata
            .creation_timestamp
            .as_ref()
            .and_then(to_utc)
    })
}

/// Convert through the RFC 3339 wire form so this does not depend on the
/// datetime library behind `Time`.
fn to_utc(time: &Time) -> Option<DateTime<Utc>> {
    let rendered = match serde_json::to_value(time) {
        Ok(serde_json::Value::String(rendered)) => rendered,
        Ok(other) => {
            warn!("Unexpected timestamp encoding in secret metadata: {}", other);
            return None;
        }
        Err(e) => {
            warn!("Failed to encode secret metadata timestamp: {}", e);
            return None;
        }
    };

    DateTime::parse_from_rfc3339(&rendered)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| warn!("Failed to parse secret metadata timestamp '{}': {}", rendered, e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secret_from(value: serde_json::Value) -> Secret {
        serde_json::from_value(value).unwrap()
    }

    fn utc(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_last_updated_prefers_latest_managed_field() {
        let secret = secret_from(json!({
            "metadata": {
                "name": "vault-cred-sync-data",
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "managedFields": [
                    {"manager": "kubectl", "operation": "Update", "time": "2024-03-01T10:00:00Z"},
                    {"manager": "helm", "operation": "Update", "time": "2024-04-01T10:00:00Z"},
                    {"manager": "argocd", "operation": "Apply"}
                ]
            }
        }));

        assert_eq!(
            last_updated_time(&secret),
            Some(utc("2024-04-01T10:00:00Z"))
        );
    }

    #[test]
    fn test_last_updated_falls_back_to_creation_timestamp() {
        let secret = secret_from(json!({
            "metadata": {
                "name": "vault-cred-sync-data",
                "creationTimestamp": "2024-01-01T00:00:00Z"
            }
        }));

        assert_eq!(
            last_updated_time(&secret),
            Some(utc("2024-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_last_updated_missing_everywhere() {
        let secret = secret_from(json!({"metadata": {"name": "empty"}}));
        assert_eq!(last_updated_time(&secret), None);
    }

    #[test]
    fn test_string_data_merges_over_data() {
        // "c2VydmljZQ==" is base64 for "service"
        let secret = secret_from(json!({
            "metadata": {"name": "vault-cred-sync-data"},
            "data": {"SERVICE-CRED-a": "c2VydmljZQ==", "GENERIC-b": "c2VydmljZQ=="},
            "stringData": {"GENERIC-b": "override"}
        }));

        let data = secret_string_data(&secret);
        assert_eq!(data["SERVICE-CRED-a"], "service");
        assert_eq!(data["GENERIC-b"], "override");
    }

    #[test]
    fn test_non_utf8_value_does_not_hide_other_entries() {
        // "/w==" is base64 for the single byte 0xFF
        let secret = secret_from(json!({
            "metadata": {"name": "vault-cred-sync-data"},
            "data": {"UNKNOWN-blob": "/w==", "CERTS-bad": "/w=="},
            "stringData": {
                "SERVICE-CRED-db": "{\"entityName\":\"orders\",\"userName\":\"svc\",\"password\":\"p1\"}"
            }
        }));

        let data = secret_string_data(&secret);
        assert_eq!(data.len(), 3);
        assert!(data["SERVICE-CRED-db"].contains("orders"));
        assert_eq!(data["CERTS-bad"], "\u{FFFD}");
    }

    #[test]
    fn test_secret_value_is_strict() {
        let secret = secret_from(json!({
            "metadata": {"name": "vault-server-init"},
            "data": {"root-token": "aHZzLnRva2Vu", "binary": "/w=="},
            "stringData": {"plain": "s.plain"}
        }));

        // "aHZzLnRva2Vu" is base64 for "hvs.token"
        assert_eq!(secret_value(&secret, "root-token").unwrap(), "hvs.token");
        assert_eq!(secret_value(&secret, "plain").unwrap(), "s.plain");

        let err = secret_value(&secret, "binary").unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
        let err = secret_value(&secret, "missing").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
