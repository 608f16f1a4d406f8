//! # Configuration
//!
//! Process-wide settings loaded once from environment variables at startup.
//! Environment variables are populated from a ConfigMap using `envFrom` in the
//! deployment.

use crate::constants::{
    DEFAULT_CREDENTIAL_MOUNT, DEFAULT_METRICS_PORT, DEFAULT_NAMESPACE,
    DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH, DEFAULT_SYNC_FREQUENCY, DEFAULT_SYNC_SECRET_NAME,
    DEFAULT_VAULT_ADDR, DEFAULT_VAULT_HTTP_TIMEOUT_SECS, DEFAULT_VAULT_K8S_AUTH_MOUNT,
    DEFAULT_VAULT_ROLE, DEFAULT_VAULT_TOKEN_KEY_NAME, DEFAULT_VAULT_TOKEN_SECRET_NAME,
};
use crate::scheduler::Schedule;
use anyhow::{Context, Result};
use std::time::Duration;

/// How the job authenticates to Vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultAuthMethod {
    /// Read a token from a Kubernetes secret
    Token {
        secret_name: String,
        secret_namespace: String,
        token_key: String,
    },
    /// Log in with the pod's service account JWT
    Kubernetes {
        role: String,
        auth_mount: String,
        jwt_path: String,
    },
}

/// Vault connection settings
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Base address, e.g. `http://vault:8200`
    pub address: String,
    pub auth: VaultAuthMethod,
    /// KV v2 mount under which credential paths are written
    pub credential_mount: String,
    /// Timeout applied to every Vault HTTP request (seconds)
    pub http_timeout_secs: u64,
}

impl VaultConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Sync job configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Name of the Kubernetes secret holding credentials to sync
    pub secret_name: String,
    /// Namespace of that secret
    pub namespace: String,
    /// Frequency descriptor (`@every 2m`, `@hourly`, or a cron expression)
    pub frequency: String,
    pub vault: VaultConfig,
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            secret_name: DEFAULT_SYNC_SECRET_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            frequency: DEFAULT_SYNC_FREQUENCY.to_string(),
            vault: VaultConfig {
                address: DEFAULT_VAULT_ADDR.to_string(),
                auth: VaultAuthMethod::Token {
                    secret_name: DEFAULT_VAULT_TOKEN_SECRET_NAME.to_string(),
                    secret_namespace: DEFAULT_NAMESPACE.to_string(),
                    token_key: DEFAULT_VAULT_TOKEN_KEY_NAME.to_string(),
                },
                credential_mount: DEFAULT_CREDENTIAL_MOUNT.to_string(),
                http_timeout_secs: DEFAULT_VAULT_HTTP_TIMEOUT_SECS,
            },
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: "text".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    /// Returns an error if `VAULT_AUTH_METHOD` names an unknown method.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Split out from [`SyncConfig::from_env`] so tests don't have to mutate
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("VAULT_CRED_SYNC_SECRET_NAMESPACE")
            .or_else(|| lookup("POD_NAMESPACE"))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let auth_method = lookup_or_default_str(&lookup, "VAULT_AUTH_METHOD", "token");
        let auth = match auth_method.to_lowercase().as_str() {
            "token" => VaultAuthMethod::Token {
                secret_name: lookup_or_default_str(
                    &lookup,
                    "VAULT_SECRET_NAME",
                    DEFAULT_VAULT_TOKEN_SECRET_NAME,
                ),
                secret_namespace: lookup_or_default_str(
                    &lookup,
                    "VAULT_SECRET_NAMESPACE",
                    &namespace,
                ),
                token_key: lookup_or_default_str(
                    &lookup,
                    "VAULT_SECRET_TOKEN_KEY_NAME",
                    DEFAULT_VAULT_TOKEN_KEY_NAME,
                ),
            },
            "kubernetes" => VaultAuthMethod::Kubernetes {
                role: lookup_or_default_str(&lookup, "VAULT_ROLE", DEFAULT_VAULT_ROLE),
                auth_mount: lookup_or_default_str(
                    &lookup,
                    "VAULT_K8S_AUTH_MOUNT",
                    DEFAULT_VAULT_K8S_AUTH_MOUNT,
                ),
                jwt_path: lookup_or_default_str(
                    &lookup,
                    "VAULT_SA_TOKEN_PATH",
                    DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH,
                ),
            },
            other => {
                return Err(anyhow::anyhow!(
                    "Unsupported VAULT_AUTH_METHOD '{other}'. Expected 'token' or 'kubernetes'"
                ));
            }
        };

        Ok(Self {
            secret_name: lookup_or_default_str(
                &lookup,
                "VAULT_CRED_SYNC_SECRET_NAME",
                DEFAULT_SYNC_SECRET_NAME,
            ),
            frequency: lookup_or_default_str(
                &lookup,
                "VAULT_CRED_SYNC_FREQUENCY",
                DEFAULT_SYNC_FREQUENCY,
            ),
            vault: VaultConfig {
                address: lookup_or_default_str(&lookup, "VAULT_ADDR", DEFAULT_VAULT_ADDR)
                    .trim_end_matches('/')
                    .to_string(),
                auth,
                credential_mount: lookup_or_default_str(
                    &lookup,
                    "VAULT_CREDENTIAL_MOUNT",
                    DEFAULT_CREDENTIAL_MOUNT,
                )
                .trim_matches('/')
                .to_string(),
                http_timeout_secs: lookup_or_default(
                    &lookup,
                    "VAULT_HTTP_TIMEOUT_SECS",
                    DEFAULT_VAULT_HTTP_TIMEOUT_SECS,
                ),
            },
            metrics_port: lookup_or_default(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: lookup_or_default_str(&lookup, "LOG_FORMAT", "text"),
            namespace,
        })
    }

    /// Check settings that would otherwise only fail at the first cycle
    ///
    /// # Errors
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.secret_name.trim().is_empty() {
            return Err(anyhow::anyhow!("VAULT_CRED_SYNC_SECRET_NAME cannot be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(anyhow::anyhow!("Sync secret namespace cannot be empty"));
        }
        if self.vault.address.is_empty() {
            return Err(anyhow::anyhow!("VAULT_ADDR cannot be empty"));
        }
        if self.vault.credential_mount.is_empty() {
            return Err(anyhow::anyhow!("VAULT_CREDENTIAL_MOUNT cannot be empty"));
        }
        if self.vault.http_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "VAULT_HTTP_TIMEOUT_SECS must be greater than 0"
            ));
        }
        self.frequency
            .parse::<Schedule>()
            .with_context(|| format!("Invalid VAULT_CRED_SYNC_FREQUENCY '{}'", self.frequency))?;
        Ok(())
    }
}

/// Read a key and parse it, or return the default when unset or unparseable
fn lookup_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a key as a string, or return the default when unset or blank
fn lookup_or_default_str<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
