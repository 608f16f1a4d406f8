//! # Constants
//!
//! Shared constants used throughout the sync job.
//!
//! Defaults can be overridden via environment variables where applicable
//! (see [`crate::config::SyncConfig::from_env`]).

/// Key prefix marking a service credential entry in the sync secret
pub const SERVICE_CRED_SECRET_KEY_PREFIX: &str = "SERVICE-CRED";

/// Key prefix marking a certificate bundle entry in the sync secret
pub const CERT_SECRET_KEY_PREFIX: &str = "CERTS";

/// Key prefix marking a generic credential entry in the sync secret
pub const GENERIC_SECRET_KEY_PREFIX: &str = "GENERIC";

/// Vault attribute holding the CA certificate of a certificate bundle
pub const CA_DATA_KEY: &str = "ca.pem";

/// Vault attribute holding the certificate body of a certificate bundle
pub const CERT_DATA_KEY: &str = "cert.crt";

/// Vault attribute holding the private key of a certificate bundle
pub const KEY_DATA_KEY: &str = "key.key";

/// Vault attribute holding a service credential's user name
pub const SERVICE_CREDENTIAL_USER_NAME_KEY: &str = "userName";

/// Vault attribute holding a service credential's password
pub const SERVICE_CREDENTIAL_PASSWORD_KEY: &str = "password";

/// Default KV v2 mount under which every credential path is nested
pub const DEFAULT_CREDENTIAL_MOUNT: &str = "secret";

/// Default name of the Kubernetes secret holding credentials to sync
pub const DEFAULT_SYNC_SECRET_NAME: &str = "vault-cred-sync-data";

/// Default namespace for the sync secret when neither env var is set
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default sync frequency descriptor
pub const DEFAULT_SYNC_FREQUENCY: &str = "@every 2m";

/// Default Vault address
pub const DEFAULT_VAULT_ADDR: &str = "http://vault:8200";

/// Default name of the Kubernetes secret holding the Vault token
pub const DEFAULT_VAULT_TOKEN_SECRET_NAME: &str = "vault-server-init";

/// Default key of the Vault token inside the token secret
pub const DEFAULT_VAULT_TOKEN_KEY_NAME: &str = "root-token";

/// Default Vault role for Kubernetes auth
pub const DEFAULT_VAULT_ROLE: &str = "vault-cred-sync";

/// Default mount of the Vault Kubernetes auth method
pub const DEFAULT_VAULT_K8S_AUTH_MOUNT: &str = "kubernetes";

/// Projected service account token used for Kubernetes auth
pub const DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Default timeout for each Vault HTTP request (seconds)
pub const DEFAULT_VAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Delay before re-evaluating a schedule that produced no upcoming fire time (seconds)
pub const SCHEDULE_EXHAUSTED_RETRY_SECS: u64 = 60;
