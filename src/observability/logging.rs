//! # Logging
//!
//! Installs the global tracing subscriber.
//!
//! The filter comes from `RUST_LOG` and defaults to `vault_cred_sync=info`.
//! `LOG_FORMAT=json` switches to one JSON object per line for log shippers;
//! anything else uses the human-readable text format.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "vault_cred_sync=info";

/// Install the global subscriber
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(log_format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if log_format.eq_ignore_ascii_case("json") {
        builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
    }
}
