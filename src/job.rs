//! # Vault Credential Sync Job
//!
//! One sync cycle:
//!
//! 1. Read the sync secret
//! 2. Stop early if its last-updated time equals the one remembered from the
//!    previous completed cycle
//! 3. Authenticate a fresh Vault session
//! 4. Classify, validate and write every entry; a failing entry is logged
//!    and skipped
//! 5. Remember the secret's last-updated time
//!
//! Failures never escape a cycle. Reading the source and authenticating
//! abort the cycle and leave the remembered time untouched, so the next
//! scheduled cycle retries from scratch. Entries that fail are not retried
//! until the secret changes again.

use crate::config::SyncConfig;
use crate::credential::{CredentialKind, CredentialRecord};
use crate::error::CredentialError;
use crate::observability::metrics;
use crate::source::{SecretSource, SourceSecret};
use crate::vault::{CredentialVault, VaultConnector};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Counts for one cycle that processed entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries written to Vault
    pub written: usize,
    /// Entries that failed to parse, validate or write
    pub failed: usize,
    /// Entries whose key prefix is not supported
    pub unsupported: usize,
}

/// What a call to [`VaultCredSync::run_cycle`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The sync secret could not be read
    SourceUnavailable,
    /// The sync secret has not changed since the last completed cycle
    Unchanged,
    /// Vault authentication failed
    AuthenticationFailed,
    /// Every entry was attempted and the cursor advanced
    Completed(CycleReport),
}

/// Scheduled job syncing one Kubernetes secret into Vault.
///
/// `run_cycle` takes `&mut self`, so two cycles of the same job can never
/// run at once.
pub struct VaultCredSync {
    secret_name: String,
    namespace: String,
    frequency: String,
    credential_mount: String,
    source: Arc<dyn SecretSource>,
    vault: Arc<dyn VaultConnector>,
    /// Last-updated time of the secret as of the last completed cycle
    last_updated_time: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for VaultCredSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultCredSync")
            .field("secret_name", &self.secret_name)
            .field("namespace", &self.namespace)
            .field("frequency", &self.frequency)
            .field("last_updated_time", &self.last_updated_time)
            .finish_non_exhaustive()
    }
}

impl VaultCredSync {
    pub fn new(
        config: &SyncConfig,
        source: Arc<dyn SecretSource>,
        vault: Arc<dyn VaultConnector>,
    ) -> Self {
        Self {
            secret_name: config.secret_name.clone(),
            namespace: config.namespace.clone(),
            frequency: config.frequency.clone(),
            credential_mount: config.vault.credential_mount.clone(),
            source,
            vault,
            last_updated_time: None,
        }
    }

    /// Frequency descriptor this job should be scheduled with
    pub fn cron_spec(&self) -> &str {
        &self.frequency
    }

    /// Last-updated time of the secret as of the last completed cycle
    pub fn last_updated_time(&self) -> Option<DateTime<Utc>> {
        self.last_updated_time
    }

    /// Run one sync cycle
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let span = info_span!(
            "sync.cycle",
            secret.name = %self.secret_name,
            secret.namespace = %self.namespace
        );
        self.run_cycle_inner().instrument(span).await
    }

    async fn run_cycle_inner(&mut self) -> CycleOutcome {
        debug!("Started vault credential sync cycle");
        metrics::increment_cycles();

        let secret = match self
            .source
            .get_secret(&self.secret_name, &self.namespace)
            .await
        {
            Ok(secret) => secret,
            Err(e) => {
                if is_not_found(&e) {
                    debug!(
                        "Sync secret {}/{} not found, nothing to sync",
                        self.namespace, self.secret_name
                    );
                } else {
                    error!("Failed to read sync secret: {:#}", e);
                }
                metrics::increment_cycle_errors("source");
                return CycleOutcome::SourceUnavailable;
            }
        };
        debug!("Found {} secret values to sync", secret.data.len());

        if self.last_updated_time == Some(secret.last_updated_time) {
            debug!("No change in sync secret since last cycle");
            metrics::increment_cycles_unchanged();
            return CycleOutcome::Unchanged;
        }

        let vault = match self.vault.authenticate().await {
            Ok(vault) => vault,
            Err(e) => {
                error!("Failed to authenticate to Vault: {:#}", e);
                metrics::increment_cycle_errors("auth");
                return CycleOutcome::AuthenticationFailed;
            }
        };

        let start = Instant::now();
        let report = self.sync_entries(vault.as_ref(), &secret).await;
        metrics::observe_cycle_duration(start.elapsed().as_secs_f64());
        metrics::set_last_successful_sync(Utc::now().timestamp());

        self.last_updated_time = Some(secret.last_updated_time);

        if report.failed > 0 {
            warn!(
                "Vault credential sync completed with failures: {} written, {} failed, {} unsupported",
                report.written, report.failed, report.unsupported
            );
        } else {
            debug!(
                "Vault credential sync completed: {} written, {} unsupported",
                report.written, report.unsupported
            );
        }

        CycleOutcome::Completed(report)
    }

    async fn sync_entries(&self, vault: &dyn CredentialVault, secret: &SourceSecret) -> CycleReport {
        let mut report = CycleReport::default();

        for (key, value) in &secret.data {
            let Some(kind) = CredentialKind::classify(key) else {
                info!("Credential type {} not supported", key);
                metrics::increment_unsupported_keys();
                report.unsupported += 1;
                continue;
            };

            match self.store_credential(vault, kind, key, value).await {
                Ok(record) => {
                    info!(
                        credential_type = kind.label(),
                        "Stored sync credential for {}/{}",
                        record.entity_name(),
                        record.identifier()
                    );
                    metrics::increment_credentials_written(kind.label());
                    report.written += 1;
                }
                Err(e) => {
                    error!(credential_type = kind.label(), reason = e.kind(), "{}", e);
                    metrics::increment_credential_failures(kind.label(), e.kind());
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Parse, validate and write a single entry
    async fn store_credential(
        &self,
        vault: &dyn CredentialVault,
        kind: CredentialKind,
        key: &str,
        value: &str,
    ) -> Result<CredentialRecord, CredentialError> {
        let record = CredentialRecord::parse(kind, key, value)?;

        vault
            .put_credential(
                &self.credential_mount,
                &record.secret_path(),
                &record.attributes(),
            )
            .await
            .map_err(|source| CredentialError::Write {
                key: key.to_string(),
                source,
            })?;

        Ok(record)
    }
}

/// Whether the error chain contains a Kubernetes 404
fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<kube::Error>(),
            Some(kube::Error::Api(api_err)) if api_err.code == 404
        )
    })
}
