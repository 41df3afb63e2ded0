//! Long-lived pairing credentials
//!
//! [`Credentials`] are produced once by a successful pairing and are always
//! complete. Storage sees them only as a [`CredentialRecord`] of PEM strings
//! plus an ISO-8601 timestamp; a record with a missing or unparsable field is
//! treated as "no credentials" rather than an error.

use crate::certificate::{fingerprint, pem_string, ClientIdentity};
use crate::Result;
use chrono::{DateTime, Utc};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Client certificate/key pair plus the pinned server certificate
#[derive(Clone)]
pub struct Credentials {
    pub client_certificate: X509,
    pub client_private_key: PKey<Private>,
    pub server_certificate: X509,
    pub last_updated: DateTime<Utc>,
}

impl Credentials {
    /// Bundle a freshly paired identity with the server certificate
    pub fn new(identity: ClientIdentity, server_certificate: X509) -> Self {
        Self {
            client_certificate: identity.certificate,
            client_private_key: identity.private_key,
            server_certificate,
            last_updated: Utc::now(),
        }
    }

    /// The client half, for presenting on the remote port
    pub fn client_identity(&self) -> ClientIdentity {
        ClientIdentity {
            certificate: self.client_certificate.clone(),
            private_key: self.client_private_key.clone(),
        }
    }

    /// Fingerprint of the pinned server certificate
    pub fn server_fingerprint(&self) -> String {
        self.server_certificate
            .to_der()
            .map(|der| fingerprint(&der))
            .unwrap_or_default()
    }

    /// Serialise for the storage collaborator
    pub fn to_record(&self) -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            certificate: Some(pem_string(self.client_certificate.to_pem()?)?),
            private_key: Some(pem_string(
                self.client_private_key.private_key_to_pem_pkcs8()?,
            )?),
            server_certificate: Some(pem_string(self.server_certificate.to_pem()?)?),
            last_updated: Some(self.last_updated.to_rfc3339()),
        })
    }

    /// Rebuild from a stored record, `None` unless every field is valid
    pub fn from_record(record: &CredentialRecord) -> Option<Self> {
        let certificate = parse_pem(record.certificate.as_deref(), "CERTIFICATE")?;
        let private_key = parse_pem(record.private_key.as_deref(), "PRIVATE KEY")?;
        let server_certificate = parse_pem(record.server_certificate.as_deref(), "CERTIFICATE")?;

        let last_updated = match record
            .last_updated
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
        {
            Some(Ok(timestamp)) => timestamp.with_timezone(&Utc),
            _ => {
                warn!("Credential record has no valid lastUpdated, ignoring it");
                return None;
            }
        };

        let client_certificate = X509::from_pem(certificate.as_bytes()).ok()?;
        let client_private_key = PKey::private_key_from_pem(private_key.as_bytes()).ok()?;
        let server_certificate = X509::from_pem(server_certificate.as_bytes()).ok()?;

        Some(Self {
            client_certificate,
            client_private_key,
            server_certificate,
            last_updated,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server_fingerprint", &self.server_fingerprint())
            .field("last_updated", &self.last_updated)
            .finish_non_exhaustive()
    }
}

/// Checks a PEM block is present and carries the expected tag
///
/// Private keys may be PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`).
fn parse_pem<'a>(value: Option<&'a str>, tag: &str) -> Option<&'a str> {
    let value = value?;
    match pem::parse(value) {
        Ok(block) if block.tag().ends_with(tag) => Some(value),
        Ok(block) => {
            warn!("Expected PEM {} but found {}", tag, block.tag());
            None
        }
        Err(e) => {
            warn!("Invalid PEM in credential record: {}", e);
            None
        }
    }
}

/// Credential record as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub server_certificate: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}
