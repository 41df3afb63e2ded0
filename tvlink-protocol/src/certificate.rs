//! Client TLS identity and pairing secret
//!
//! ## Certificate Requirements
//!
//! - **Algorithm**: RSA 2048-bit
//! - **Common Name (CN)**: client name shown on the TV
//! - **Validity**: 10 years
//! - **Self-signed**, no CA chain
//!
//! ## Pairing Secret
//!
//! The TV shows six hexadecimal characters. The first byte is a check byte,
//! the remaining two bytes are entropy mixed into the secret:
//!
//! ```text
//! secret = SHA-256(client.n ∥ client.e ∥ server.n ∥ server.e ∥ entropy)
//! ```
//!
//! `secret[0]` must equal the check byte; this is verified locally before any
//! `SECRET` frame leaves the client.

use crate::{ProtocolError, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509Ref, X509};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Certificate validity period (10 years)
const CERT_VALIDITY_DAYS: u32 = 10 * 365;

/// RSA modulus size
const RSA_BITS: u32 = 2048;

/// Length of the pairing code in hex characters
pub const PAIRING_CODE_LEN: usize = 6;

/// Ephemeral client identity presented during pairing and then pinned
#[derive(Clone)]
pub struct ClientIdentity {
    pub certificate: X509,
    pub private_key: PKey<Private>,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field(
                "fingerprint",
                &self.certificate.to_der().map(|der| fingerprint(&der)).ok(),
            )
            .finish_non_exhaustive()
    }
}

impl ClientIdentity {
    /// Generate a fresh self-signed certificate
    ///
    /// This is CPU bound (100-500ms); async callers use [`generate_async`].
    ///
    /// [`generate_async`]: ClientIdentity::generate_async
    pub fn generate(common_name: &str) -> Result<Self> {
        let rsa = Rsa::generate(RSA_BITS)?;
        let pkey = PKey::from_rsa(rsa)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;

        let mut serial = BigNum::new()?;
        serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
        let serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;

        let mut name = X509Name::builder()?;
        name.append_entry_by_text("CN", common_name)?;
        let name = name.build();
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;

        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(CERT_VALIDITY_DAYS)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(&pkey)?;
        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.sign(&pkey, MessageDigest::sha256())?;

        let certificate = builder.build();
        info!(
            "Generated client certificate for {} with fingerprint: {}",
            common_name,
            fingerprint(&certificate.to_der()?)
        );

        Ok(Self {
            certificate,
            private_key: pkey,
        })
    }

    /// Generate on the blocking pool so event processing is not stalled
    pub async fn generate_async(common_name: impl Into<String>) -> Result<Self> {
        let common_name = common_name.into();
        tokio::task::spawn_blocking(move || Self::generate(&common_name))
            .await
            .map_err(|e| ProtocolError::Io(std::io::Error::other(e)))?
    }

    /// Rebuild from stored PEM strings
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self> {
        Ok(Self {
            certificate: X509::from_pem(certificate_pem.as_bytes())?,
            private_key: PKey::private_key_from_pem(private_key_pem.as_bytes())?,
        })
    }

    pub fn certificate_pem(&self) -> Result<String> {
        pem_string(self.certificate.to_pem()?)
    }

    pub fn private_key_pem(&self) -> Result<String> {
        pem_string(self.private_key.private_key_to_pem_pkcs8()?)
    }
}

pub(crate) fn pem_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| ProtocolError::InvalidMessage(format!("PEM is not UTF-8: {}", e)))
}

/// The six character code displayed by the TV
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PairingCode {
    bytes: [u8; 3],
}

impl PairingCode {
    /// Leading byte that the computed secret must start with
    pub fn check_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Trailing two bytes mixed into the secret
    pub fn entropy(&self) -> [u8; 2] {
        [self.bytes[1], self.bytes[2]]
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PairingCode").field(&self.to_string()).finish()
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.bytes))
    }
}

impl FromStr for PairingCode {
    type Err = ProtocolError;

    /// Trims and uppercases; anything but six hex characters is rejected
    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim().to_ascii_uppercase();
        if code.len() != PAIRING_CODE_LEN {
            return Err(ProtocolError::validation(
                "code",
                format!("Pairing code must be {} characters", PAIRING_CODE_LEN),
            ));
        }

        let mut bytes = [0u8; 3];
        hex::decode_to_slice(&code, &mut bytes).map_err(|_| {
            ProtocolError::validation("code", "Pairing code must be hexadecimal")
        })?;

        Ok(Self { bytes })
    }
}

/// Compute the secret we send, client certificate first
pub fn pairing_secret(client: &X509Ref, server: &X509Ref, code: &PairingCode) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    for certificate in [client, server] {
        let rsa = certificate.public_key()?.rsa()?;
        hasher.update(rsa.n().to_vec());
        hasher.update(rsa.e().to_vec());
    }
    hasher.update(code.entropy());
    Ok(hasher.finalize().into())
}

/// The secret the TV is expected to echo, server certificate first
pub fn server_secret(client: &X509Ref, server: &X509Ref, code: &PairingCode) -> Result<[u8; 32]> {
    pairing_secret(server, client, code)
}

/// Check the computed secret against the code's leading byte
pub fn verify_check_byte(secret: &[u8], code: &PairingCode) -> Result<()> {
    match secret.first() {
        Some(first) if *first == code.check_byte() => {
            debug!("Pairing code check byte verified");
            Ok(())
        }
        _ => Err(ProtocolError::Verification(format!(
            "Pairing code {} does not match the certificates",
            code
        ))),
    }
}

/// SHA256 fingerprint of a DER certificate, as colon separated hex
pub fn fingerprint(certificate_der: &[u8]) -> String {
    Sha256::digest(certificate_der)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
