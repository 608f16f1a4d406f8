//! # Credentials
//!
//! Classification and validation of entries in the sync secret.
//!
//! Each entry key carries a prefix naming its shape:
//!
//! | Prefix | Shape | Vault attributes |
//! |---|---|---|
//! | `SERVICE-CRED` | [`ServiceCredential`] | `userName`, `password`, plus `additionalData` |
//! | `CERTS` | [`CertificateData`] | `ca.pem`, `cert.crt`, `key.key` |
//! | `GENERIC` | [`GenericCredential`] | copy of `credential` |
//!
//! Entry values are JSON documents. The field names (including the
//! `credIndetifier` / `certIndetifier` spelling) are the contract with the
//! producers of the sync secret and must not be corrected.

use crate::constants::{
    CA_DATA_KEY, CERT_DATA_KEY, CERT_SECRET_KEY_PREFIX, GENERIC_SECRET_KEY_PREFIX, KEY_DATA_KEY,
    SERVICE_CREDENTIAL_PASSWORD_KEY, SERVICE_CREDENTIAL_USER_NAME_KEY,
    SERVICE_CRED_SECRET_KEY_PREFIX,
};
use crate::error::CredentialError;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// Flat attribute set written to a single vault path
pub type Attributes = BTreeMap<String, String>;

/// Credential shape selected by key prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    ServiceCredential,
    Certificate,
    Generic,
}

impl CredentialKind {
    /// Precedence order used by [`CredentialKind::classify`]
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::ServiceCredential,
        CredentialKind::Certificate,
        CredentialKind::Generic,
    ];

    /// Classify a secret key by prefix.
    ///
    /// Prefixes are tested in a fixed order (service credential, then
    /// certificate, then generic), so a key matching more than one prefix is
    /// routed to the first. Returns `None` for unrecognized keys.
    pub fn classify(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| key.starts_with(kind.key_prefix()))
    }

    /// Key prefix identifying this shape in the sync secret
    pub fn key_prefix(self) -> &'static str {
        match self {
            Self::ServiceCredential => SERVICE_CRED_SECRET_KEY_PREFIX,
            Self::Certificate => CERT_SECRET_KEY_PREFIX,
            Self::Generic => GENERIC_SECRET_KEY_PREFIX,
        }
    }

    /// Label for metrics and log fields
    pub fn label(self) -> &'static str {
        match self {
            Self::ServiceCredential => "service_credential",
            Self::Certificate => "certificate",
            Self::Generic => "generic",
        }
    }
}

/// Username/password pair for a service, with optional extra attributes
#[derive(Clone, Default, Deserialize)]
pub struct ServiceCredential {
    #[serde(rename = "entityName", default, deserialize_with = "null_as_default")]
    pub entity_name: String,
    #[serde(rename = "credIndetifier", default, deserialize_with = "null_as_default")]
    pub cred_identifier: String,
    #[serde(rename = "userName", default, deserialize_with = "null_as_default")]
    pub user_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub password: String,
    #[serde(rename = "additionalData", default, deserialize_with = "null_as_default")]
    pub additional_data: Attributes,
}

/// TLS material for one certificate identifier
#[derive(Clone, Default, Deserialize)]
pub struct CertificateData {
    #[serde(rename = "entityName", default, deserialize_with = "null_as_default")]
    pub entity_name: String,
    #[serde(rename = "certIndetifier", default, deserialize_with = "null_as_default")]
    pub cert_identifier: String,
    #[serde(rename = "caCert", default, deserialize_with = "null_as_default")]
    pub ca_cert: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cert: String,
}

/// Arbitrary key/value credential whose type segment is chosen by the producer
#[derive(Clone, Default, Deserialize)]
pub struct GenericCredential {
    #[serde(rename = "credentialType", default, deserialize_with = "null_as_default")]
    pub credential_type: String,
    #[serde(rename = "entityName", default, deserialize_with = "null_as_default")]
    pub entity_name: String,
    #[serde(rename = "credIndetifier", default, deserialize_with = "null_as_default")]
    pub cred_identifier: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub credential: Attributes,
}

// Credential values never reach logs through Debug.
impl std::fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("entity_name", &self.entity_name)
            .field("cred_identifier", &self.cred_identifier)
            .field("user_name", &self.user_name)
            .field("additional_keys", &self.additional_data.keys())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for CertificateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateData")
            .field("entity_name", &self.entity_name)
            .field("cert_identifier", &self.cert_identifier)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for GenericCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericCredential")
            .field("credential_type", &self.credential_type)
            .field("entity_name", &self.entity_name)
            .field("cred_identifier", &self.cred_identifier)
            .field("credential_keys", &self.credential.keys())
            .finish_non_exhaustive()
    }
}

/// A decoded and validated entry, ready to be written
#[derive(Debug, Clone)]
pub enum CredentialRecord {
    Service(ServiceCredential),
    Certificate(CertificateData),
    Generic(GenericCredential),
}

impl CredentialRecord {
    /// Decode `value` as the shape named by `kind` and check required fields.
    ///
    /// `key` is the secret key the value came from; it is only used to label
    /// errors.
    ///
    /// # Errors
    /// [`CredentialError::Parse`] if the JSON does not decode, and
    /// [`CredentialError::EmptyAttributes`] if a required field is empty.
    pub fn parse(kind: CredentialKind, key: &str, value: &str) -> Result<Self, CredentialError> {
        let record = match kind {
            CredentialKind::ServiceCredential => Self::Service(decode(key, value)?),
            CredentialKind::Certificate => Self::Certificate(decode(key, value)?),
            CredentialKind::Generic => Self::Generic(decode(key, value)?),
        };

        let missing = record.missing_attributes();
        if !missing.is_empty() {
            return Err(CredentialError::EmptyAttributes {
                key: key.to_string(),
                missing,
            });
        }

        Ok(record)
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Service(_) => CredentialKind::ServiceCredential,
            Self::Certificate(_) => CredentialKind::Certificate,
            Self::Generic(_) => CredentialKind::Generic,
        }
    }

    /// Required fields that are empty, in the order they are checked
    fn missing_attributes(&self) -> Vec<&'static str> {
        let required: Vec<(&'static str, &str)> = match self {
            Self::Service(cred) => vec![
                ("userName", cred.user_name.as_str()),
                ("password", cred.password.as_str()),
                ("entityName", cred.entity_name.as_str()),
            ],
            Self::Certificate(cert) => vec![
                ("caCert", cert.ca_cert.as_str()),
                ("cert", cert.cert.as_str()),
                ("key", cert.key.as_str()),
                ("entityName", cert.entity_name.as_str()),
                ("certIndetifier", cert.cert_identifier.as_str()),
            ],
            Self::Generic(cred) => vec![
                ("entityName", cred.entity_name.as_str()),
                ("credIndetifier", cred.cred_identifier.as_str()),
                ("credentialType", cred.credential_type.as_str()),
            ],
        };

        required
            .into_iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    pub fn entity_name(&self) -> &str {
        match self {
            Self::Service(cred) => &cred.entity_name,
            Self::Certificate(cert) => &cert.entity_name,
            Self::Generic(cred) => &cred.entity_name,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Service(cred) => &cred.cred_identifier,
            Self::Certificate(cert) => &cert.cert_identifier,
            Self::Generic(cred) => &cred.cred_identifier,
        }
    }

    /// Type segment of the vault path.
    ///
    /// Fixed (lower-cased key prefix) for service credentials and
    /// certificates; taken from the record for generic credentials.
    pub fn path_prefix(&self) -> String {
        match self {
            Self::Service(_) | Self::Certificate(_) => self.kind().key_prefix().to_lowercase(),
            Self::Generic(cred) => cred.credential_type.clone(),
        }
    }

    /// Vault path relative to the credential mount
    pub fn secret_path(&self) -> String {
        prepare_path(&self.path_prefix(), self.entity_name(), self.identifier())
    }

    /// Attribute set to write.
    ///
    /// For service credentials, `additionalData` is applied after the seeded
    /// `userName`/`password` keys and wins on collision.
    pub fn attributes(&self) -> Attributes {
        match self {
            Self::Service(cred) => {
                let mut attributes = Attributes::from([
                    (
                        SERVICE_CREDENTIAL_USER_NAME_KEY.to_string(),
                        cred.user_name.clone(),
                    ),
                    (
                        SERVICE_CREDENTIAL_PASSWORD_KEY.to_string(),
                        cred.password.clone(),
                    ),
                ]);
                attributes.extend(
                    cred.additional_data
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                attributes
            }
            Self::Certificate(cert) => Attributes::from([
                (CA_DATA_KEY.to_string(), cert.ca_cert.clone()),
                (CERT_DATA_KEY.to_string(), cert.cert.clone()),
                (KEY_DATA_KEY.to_string(), cert.key.clone()),
            ]),
            Self::Generic(cred) => cred.credential.clone(),
        }
    }
}

/// Build the vault path for a credential.
///
/// Format: `{type_prefix}/{entity_name}/{credential_identifier}`
///
/// Pure and deterministic; distinct triples map to distinct paths as long as
/// no segment contains `/`.
pub fn prepare_path(type_prefix: &str, entity_name: &str, credential_identifier: &str) -> String {
    format!("{type_prefix}/{entity_name}/{credential_identifier}")
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T, CredentialError> {
    serde_json::from_str(value).map_err(|source| CredentialError::Parse {
        key: key.to_string(),
        source,
    })
}

/// Treat an explicit JSON `null` like an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_prefixes() {
        assert_eq!(
            CredentialKind::classify("SERVICE-CRED-db"),
            Some(CredentialKind::ServiceCredential)
        );
        assert_eq!(
            CredentialKind::classify("CERTS-web"),
            Some(CredentialKind::Certificate)
        );
        assert_eq!(
            CredentialKind::classify("GENERIC-x"),
            Some(CredentialKind::Generic)
        );
    }

    #[test]
    fn test_classify_unknown_and_case_sensitive() {
        assert_eq!(CredentialKind::classify("UNKNOWN-y"), None);
        assert_eq!(CredentialKind::classify("service-cred-db"), None);
        assert_eq!(CredentialKind::classify(""), None);
    }

    #[test]
    fn test_classify_precedence_follows_fixed_order() {
        // Every key that starts with SERVICE-CRED is a service credential,
        // regardless of what follows the prefix.
        assert_eq!(
            CredentialKind::classify("SERVICE-CREDCERTS-GENERIC"),
            Some(CredentialKind::ServiceCredential)
        );
        assert_eq!(
            CredentialKind::classify("CERTSGENERIC-x"),
            Some(CredentialKind::Certificate)
        );
        // Containing a prefix is not the same as starting with it.
        assert_eq!(
            CredentialKind::classify("GENERIC-SERVICE-CRED"),
            Some(CredentialKind::Generic)
        );
    }

    #[test]
    fn test_service_credential_attributes_and_path() {
        let value = r#"{"entityName":"orders","credIndetifier":"primary","userName":"svc","password":"p1"}"#;
        let record =
            CredentialRecord::parse(CredentialKind::ServiceCredential, "SERVICE-CRED-db", value)
                .unwrap();

        assert_eq!(record.secret_path(), "service-cred/orders/primary");
        assert_eq!(
            record.attributes(),
            Attributes::from([
                ("userName".to_string(), "svc".to_string()),
                ("password".to_string(), "p1".to_string()),
            ])
        );
    }

    #[test]
    fn test_service_credential_additional_data_overrides_seeded_keys() {
        let value = r#"{"entityName":"orders","credIndetifier":"primary","userName":"svc","password":"p1",
            "additionalData":{"password":"override","host":"db.local"}}"#;
        let record =
            CredentialRecord::parse(CredentialKind::ServiceCredential, "SERVICE-CRED-db", value)
                .unwrap();

        let attributes = record.attributes();
        assert_eq!(attributes["password"], "override");
        assert_eq!(attributes["userName"], "svc");
        assert_eq!(attributes["host"], "db.local");
        assert_eq!(attributes.len(), 3);
    }

    #[test]
    fn test_service_credential_empty_username_is_rejected() {
        let value = r#"{"entityName":"orders","credIndetifier":"primary","userName":"","password":"p1"}"#;
        let err =
            CredentialRecord::parse(CredentialKind::ServiceCredential, "SERVICE-CRED-db", value)
                .unwrap_err();

        match err {
            CredentialError::EmptyAttributes { key, missing } => {
                assert_eq!(key, "SERVICE-CRED-db");
                assert_eq!(missing, vec!["userName"]);
            }
            other => panic!("expected EmptyAttributes, got {other:?}"),
        }
    }

    #[test]
    fn test_service_credential_identifier_is_optional() {
        let value = r#"{"entityName":"orders","userName":"svc","password":"p1"}"#;
        let record =
            CredentialRecord::parse(CredentialKind::ServiceCredential, "SERVICE-CRED-db", value)
                .unwrap();
        assert_eq!(record.secret_path(), "service-cred/orders/");
    }

    #[test]
    fn test_null_fields_are_treated_as_missing() {
        let value = r#"{"entityName":null,"userName":"svc","password":"p1","additionalData":null}"#;
        let err =
            CredentialRecord::parse(CredentialKind::ServiceCredential, "SERVICE-CRED-db", value)
                .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::EmptyAttributes { ref missing, .. } if missing == &vec!["entityName"]
        ));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = CredentialRecord::parse(CredentialKind::Certificate, "CERTS-web", "{not json")
            .unwrap_err();
        assert_eq!(err.kind(), "parse");
        assert!(err.to_string().starts_with("failed to parse CERTS-web secret data"));
    }

    #[test]
    fn test_certificate_attributes_and_path() {
        let value =
            r#"{"entityName":"web","certIndetifier":"tls1","caCert":"A","cert":"B","key":"C"}"#;
        let record =
            CredentialRecord::parse(CredentialKind::Certificate, "CERTS-web", value).unwrap();

        assert_eq!(record.secret_path(), "certs/web/tls1");
        assert_eq!(
            record.attributes(),
            Attributes::from([
                ("ca.pem".to_string(), "A".to_string()),
                ("cert.crt".to_string(), "B".to_string()),
                ("key.key".to_string(), "C".to_string()),
            ])
        );
    }

    #[test]
    fn test_certificate_requires_all_fields() {
        let value = r#"{"entityName":"web","caCert":"A","cert":"B"}"#;
        let err =
            CredentialRecord::parse(CredentialKind::Certificate, "CERTS-web", value).unwrap_err();
        match err {
            CredentialError::EmptyAttributes { missing, .. } => {
                assert_eq!(missing, vec!["key", "certIndetifier"]);
            }
            other => panic!("expected EmptyAttributes, got {other:?}"),
        }
    }

    #[test]
    fn test_generic_credential_uses_own_type_segment() {
        let value = r#"{"credentialType":"api-key","entityName":"svc1","credIndetifier":"k1","credential":{"token":"t"}}"#;
        let record = CredentialRecord::parse(CredentialKind::Generic, "GENERIC-x", value).unwrap();

        assert_eq!(record.path_prefix(), "api-key");
        assert_eq!(record.secret_path(), "api-key/svc1/k1");
        assert_eq!(
            record.attributes(),
            Attributes::from([("token".to_string(), "t".to_string())])
        );
    }

    #[test]
    fn test_generic_credential_requires_type() {
        let value = r#"{"entityName":"svc1","credIndetifier":"k1","credential":{"token":"t"}}"#;
        let err = CredentialRecord::parse(CredentialKind::Generic, "GENERIC-x", value).unwrap_err();
        assert!(err.to_string().contains("missing credentialType"));
    }

    #[test]
    fn test_prepare_path_is_deterministic_and_distinct() {
        let a = prepare_path("service-cred", "orders", "primary");
        assert_eq!(a, prepare_path("service-cred", "orders", "primary"));

        let triples = [
            ("service-cred", "orders", "primary"),
            ("service-cred", "orders", "replica"),
            ("service-cred", "billing", "primary"),
            ("certs", "orders", "primary"),
            ("api-key", "orders", "primary"),
        ];
        let paths: std::collections::HashSet<String> = triples
            .iter()
            .map(|(p, e, i)| prepare_path(p, e, i))
            .collect();
        assert_eq!(paths.len(), triples.len());
    }

    #[test]
    fn test_debug_does_not_leak_secret_values() {
        let value = r#"{"entityName":"orders","credIndetifier":"primary","userName":"svc","password":"hunter2"}"#;
        let record =
            CredentialRecord::parse(CredentialKind::ServiceCredential, "SERVICE-CRED-db", value)
                .unwrap();
        let rendered = format!("{record:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("orders"));
    }
}
