//! Vault Credential Sync Library
//!
//! Periodically copies credentials from one Kubernetes secret into Vault.
//! Each entry of the secret is a JSON document whose key prefix names its
//! credential type:
//!
//! | Key prefix     | Vault path                                 |
//! |----------------|--------------------------------------------|
//! | `SERVICE-CRED` | `service-cred/{entityName}/{credIndetifier}` |
//! | `CERTS`        | `certs/{entityName}/{certIndetifier}`      |
//! | `GENERIC`      | `{credentialType}/{entityName}/{credIndetifier}` |
//!
//! The job remembers the secret's last-updated time and skips cycles where
//! it has not changed.

pub mod config;
pub mod constants;
pub mod credential;
pub mod error;
pub mod job;
pub mod observability;
pub mod scheduler;
pub mod server;
pub mod source;
pub mod vault;

pub use config::SyncConfig;
pub use job::{CycleOutcome, CycleReport, VaultCredSync};
