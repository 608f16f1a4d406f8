//! # Errors
//!
//! Entry-scoped failures raised while storing a single credential.
//!
//! None of these abort a sync cycle: the orchestrator logs them and moves on
//! to the next entry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    /// The entry value is not valid JSON for its credential shape
    #[error("failed to parse {key} secret data: {source}")]
    Parse {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// One or more required attributes decoded as empty strings
    #[error("credential attributes are empty for {key} secret data: missing {}", .missing.join(", "))]
    EmptyAttributes {
        key: String,
        missing: Vec<&'static str>,
    },

    /// The vault rejected the write or could not be reached
    #[error("failed to write {key} secret data to vault: {source:#}")]
    Write {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CredentialError {
    /// Secret key of the entry that failed
    pub fn key(&self) -> &str {
        match self {
            Self::Parse { key, .. } | Self::EmptyAttributes { key, .. } | Self::Write { key, .. } => {
                key
            }
        }
    }

    /// Short label used for metrics and structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::EmptyAttributes { .. } => "validation",
            Self::Write { .. } => "write",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_attributes_message_names_missing_fields() {
        let err = CredentialError::EmptyAttributes {
            key: "SERVICE-CRED-db".to_string(),
            missing: vec!["userName", "password"],
        };
        assert_eq!(
            err.to_string(),
            "credential attributes are empty for SERVICE-CRED-db secret data: missing userName, password"
        );
        assert_eq!(err.kind(), "validation");
        assert_eq!(err.key(), "SERVICE-CRED-db");
    }

    #[test]
    fn test_write_error_includes_cause_chain() {
        let cause = anyhow::anyhow!("connection refused").context("vault unreachable");
        let err = CredentialError::Write {
            key: "CERTS-web".to_string(),
            source: cause,
        };
        let message = err.to_string();
        assert!(message.starts_with("failed to write CERTS-web secret data to vault"));
        assert!(message.contains("connection refused"));
    }
}
