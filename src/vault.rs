//! # Vault Client
//!
//! Native REST client for the HashiCorp Vault HTTP API.
//! Uses reqwest for HTTP requests and supports two authentication methods:
//!
//! - **Token**: a token stored in a Kubernetes secret (for example the root
//!   token written by the Vault init job), verified with `lookup-self`
//! - **Kubernetes**: login with the pod's service account JWT
//!
//! Credentials are written to a KV v2 mount:
//! `POST /v1/{mount}/data/{path}` with body `{"data": {...}}`.
//!
//! References:
//! - [KV v2 API](https://developer.hashicorp.com/vault/api-docs/secret/kv/kv-v2)
//! - [Kubernetes auth API](https://developer.hashicorp.com/vault/api-docs/auth/kubernetes)

use crate::config::{VaultAuthMethod, VaultConfig};
use crate::credential::Attributes;
use crate::source::KubeSecretStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument};
use zeroize::Zeroizing;

/// Write access to the credential store
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Write (create or overwrite) `attributes` at `secret_path` under `mount_path`
    async fn put_credential(
        &self,
        mount_path: &str,
        secret_path: &str,
        attributes: &Attributes,
    ) -> Result<()>;
}

/// Produces an authenticated [`CredentialVault`] session.
///
/// The sync job authenticates once per cycle and drops the session at the
/// end of the cycle.
#[async_trait]
pub trait VaultConnector: Send + Sync {
    async fn authenticate(&self) -> Result<Box<dyn CredentialVault>>;
}

// ============================================================================
// Vault API Request/Response Structures
// ============================================================================

/// Request body for a KV v2 write
#[derive(Debug, Serialize)]
struct KvWriteRequest<'a> {
    data: &'a Attributes,
}

/// Request body for Kubernetes auth login
#[derive(Serialize)]
struct KubernetesLoginRequest<'a> {
    role: &'a str,
    jwt: &'a str,
}

/// Response from an auth login endpoint
#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
}

impl std::fmt::Debug for LoginAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginAuth")
            .field("lease_duration", &self.lease_duration)
            .finish_non_exhaustive()
    }
}

/// Vault API error response
///
/// Vault returns `{"errors": ["..."]}` for every failed request.
#[derive(Debug, Deserialize)]
struct VaultErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated Vault session
pub struct VaultClient {
    http_client: Client,
    address: String,
    token: Zeroizing<String>,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl VaultClient {
    /// Create a session from an existing token and verify it against Vault
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or Vault rejects the token.
    pub async fn with_token(address: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Self {
            http_client: build_http_client(timeout)?,
            address: address.trim_end_matches('/').to_string(),
            token: Zeroizing::new(token.trim().to_string()),
        };

        let response = client
            .make_request(Method::GET, "auth/token/lookup-self")
            .send()
            .await
            .context("Failed to reach Vault for token lookup")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(handle_error_response(status, &error_text)
                .context("Vault token lookup failed"));
        }

        debug!("Vault token verified against {}", client.address);
        Ok(client)
    }

    /// Log in with a Kubernetes service account JWT
    ///
    /// # Errors
    /// Returns an error if the login request fails or Vault returns no token.
    pub async fn login_kubernetes(
        address: &str,
        auth_mount: &str,
        role: &str,
        jwt: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = build_http_client(timeout)?;
        let address = address.trim_end_matches('/').to_string();
        let url = format!(
            "{}/v1/auth/{}/login",
            address,
            auth_mount.trim_matches('/')
        );

        let response = http_client
            .post(&url)
            .json(&KubernetesLoginRequest {
                role,
                jwt: jwt.trim(),
            })
            .send()
            .await
            .context("Failed to reach Vault for Kubernetes login")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(handle_error_response(status, &error_text)
                .context(format!("Vault Kubernetes login failed for role '{role}'")));
        }

        let login: LoginResponse = response
            .json()
            .await
            .context("Failed to parse Vault login response")?;

        info!(
            "Authenticated to Vault with Kubernetes role '{}' (lease {}s)",
            role, login.auth.lease_duration
        );

        Ok(Self {
            http_client,
            address,
            token: Zeroizing::new(login.auth.client_token),
        })
    }

    /// Build an HTTP request against `/v1/{path}` with the session token
    fn make_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));
        self.http_client
            .request(method, url)
            .header("X-Vault-Token", self.token.as_str())
    }
}

#[async_trait]
impl CredentialVault for VaultClient {
    async fn put_credential(
        &self,
        mount_path: &str,
        secret_path: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        let mount = mount_path.trim_matches('/');
        let path = secret_path.trim_matches('/');
        let span = info_span!("vault.kv.put", vault.mount = mount, vault.path = path);

        async move {
            let response = self
                .make_request(Method::POST, &format!("{mount}/data/{path}"))
                .json(&KvWriteRequest { data: attributes })
                .send()
                .await
                .with_context(|| format!("Failed to write {mount}/{path}"))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(handle_error_response(status, &error_text)
                    .context(format!("Vault rejected write to {mount}/{path}")));
            }

            debug!("Wrote {} attributes to {}/{}", attributes.len(), mount, path);
            Ok(())
        }
        .instrument(span)
        .await
    }
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Turn a Vault error response into an error
fn handle_error_response(status: StatusCode, error_text: &str) -> anyhow::Error {
    match serde_json::from_str::<VaultErrorResponse>(error_text) {
        Ok(error_response) if !error_response.errors.is_empty() => anyhow::anyhow!(
            "Vault API error (HTTP {}): {}",
            status.as_u16(),
            error_response.errors.join("; ")
        ),
        _ => anyhow::anyhow!("HTTP {} (status: {}): {}", status.as_u16(), status, error_text),
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Authenticates to Vault using the configured [`VaultAuthMethod`]
pub struct VaultAuthenticator {
    config: VaultConfig,
    secrets: KubeSecretStore,
}

impl std::fmt::Debug for VaultAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultAuthenticator")
            .field("address", &self.config.address)
            .finish_non_exhaustive()
    }
}

impl VaultAuthenticator {
    pub fn new(config: VaultConfig, secrets: KubeSecretStore) -> Self {
        Self { config, secrets }
    }
}

#[async_trait]
impl VaultConnector for VaultAuthenticator {
    async fn authenticate(&self) -> Result<Box<dyn CredentialVault>> {
        let client = match &self.config.auth {
            VaultAuthMethod::Token {
                secret_name,
                secret_namespace,
                token_key,
            } => {
                let token = Zeroizing::new(
                    self.secrets
                        .get_secret_value(secret_name, secret_namespace, token_key)
                        .await
                        .context("Failed to read Vault token")?,
                );
                VaultClient::with_token(&self.config.address, &token, self.config.http_timeout())
                    .await?
            }
            VaultAuthMethod::Kubernetes {
                role,
                auth_mount,
                jwt_path,
            } => {
                let jwt = Zeroizing::new(
                    tokio::fs::read_to_string(jwt_path)
                        .await
                        .with_context(|| {
                            format!("Failed to read service account token from {jwt_path}")
                        })?,
                );
                VaultClient::login_kubernetes(
                    &self.config.address,
                    auth_mount,
                    role,
                    &jwt,
                    self.config.http_timeout(),
                )
                .await?
            }
        };

        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Debug, Default)]
    struct Recorded {
        writes: Vec<(String, Option<String>, Value)>,
    }

    type Shared = Arc<Mutex<Recorded>>;

    async fn lookup_self(headers: HeaderMap) -> (AxumStatus, Json<Value>) {
        match headers.get("X-Vault-Token").and_then(|v| v.to_str().ok()) {
            Some("good-token") => (AxumStatus::OK, Json(json!({"data": {"ttl": 0}}))),
            _ => (
                AxumStatus::FORBIDDEN,
                Json(json!({"errors": ["permission denied"]})),
            ),
        }
    }

    async fn kv_write(
        State(state): State<Shared>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> AxumStatus {
        let token = headers
            .get("X-Vault-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        state.lock().unwrap().writes.push((
            "/v1/secret/data/service-cred/orders/primary".to_string(),
            token,
            body,
        ));
        AxumStatus::OK
    }

    async fn kv_write_denied() -> (AxumStatus, Json<Value>) {
        (
            AxumStatus::FORBIDDEN,
            Json(json!({"errors": ["1 error occurred:\n\t* permission denied\n\n"]})),
        )
    }

    async fn k8s_login(Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
        if body["role"] == "cred-writer" && body["jwt"] == "sa-jwt" {
            (
                AxumStatus::OK,
                Json(json!({"auth": {"client_token": "good-token", "lease_duration": 3600}})),
            )
        } else {
            (
                AxumStatus::BAD_REQUEST,
                Json(json!({"errors": ["invalid role name"]})),
            )
        }
    }

    async fn start_mock_vault() -> (String, Shared) {
        let state = Shared::default();
        let app = Router::new()
            .route("/v1/auth/token/lookup-self", get(lookup_self))
            .route(
                "/v1/secret/data/service-cred/orders/primary",
                post(kv_write),
            )
            .route("/v1/secret/data/certs/web/denied", post(kv_write_denied))
            .route("/v1/auth/kubernetes/login", post(k8s_login))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (address, state)
    }

    #[tokio::test]
    async fn test_put_credential_writes_kv2_body_with_token() {
        let (address, state) = start_mock_vault().await;
        let client = VaultClient::with_token(&address, "good-token\n", Duration::from_secs(5))
            .await
            .unwrap();

        let attributes = Attributes::from([
            ("userName".to_string(), "svc".to_string()),
            ("password".to_string(), "p1".to_string()),
        ]);
        client
            .put_credential("secret", "service-cred/orders/primary", &attributes)
            .await
            .unwrap();

        let recorded = state.lock().unwrap();
        assert_eq!(recorded.writes.len(), 1);
        let (_, token, body) = &recorded.writes[0];
        assert_eq!(token.as_deref(), Some("good-token"));
        assert_eq!(
            body,
            &json!({"data": {"userName": "svc", "password": "p1"}})
        );
    }

    #[tokio::test]
    async fn test_put_credential_normalizes_slashes() {
        let (address, state) = start_mock_vault().await;
        let client = VaultClient::with_token(&address, "good-token", Duration::from_secs(5))
            .await
            .unwrap();

        client
            .put_credential("/secret/", "/service-cred/orders/primary", &Attributes::new())
            .await
            .unwrap();

        assert_eq!(state.lock().unwrap().writes.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_token_fails_authentication() {
        let (address, _) = start_mock_vault().await;
        let err = VaultClient::with_token(&address, "bad-token", Duration::from_secs(5))
            .await
            .unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("Vault token lookup failed"));
        assert!(message.contains("permission denied"));
    }

    #[tokio::test]
    async fn test_vault_write_error_is_surfaced() {
        let (address, _) = start_mock_vault().await;
        let client = VaultClient::with_token(&address, "good-token", Duration::from_secs(5))
            .await
            .unwrap();

        let err = client
            .put_credential("secret", "certs/web/denied", &Attributes::new())
            .await
            .unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("HTTP 403"));
        assert!(message.contains("permission denied"));
    }

    #[tokio::test]
    async fn test_kubernetes_login_uses_returned_token() {
        let (address, state) = start_mock_vault().await;
        let client = VaultClient::login_kubernetes(
            &address,
            "/kubernetes/",
            "cred-writer",
            "sa-jwt\n",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        client
            .put_credential("secret", "service-cred/orders/primary", &Attributes::new())
            .await
            .unwrap();

        let recorded = state.lock().unwrap();
        assert_eq!(recorded.writes[0].1.as_deref(), Some("good-token"));
    }

    #[tokio::test]
    async fn test_kubernetes_login_failure() {
        let (address, _) = start_mock_vault().await;
        let err = VaultClient::login_kubernetes(
            &address,
            "kubernetes",
            "unknown-role",
            "sa-jwt",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("unknown-role"));
        assert!(message.contains("invalid role name"));
    }

    #[test]
    fn test_handle_error_response_without_vault_body() {
        let err = handle_error_response(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(
            err.to_string(),
            "HTTP 502 (status: 502 Bad Gateway): upstream down"
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let client = VaultClient {
            http_client: Client::new(),
            address: "http://vault:8200".to_string(),
            token: Zeroizing::new("s.secret".to_string()),
        };
        assert!(!format!("{client:?}").contains("s.secret"));
    }
}
