//! Pairing port messages
//!
//! Bodies are ordinary protobuf messages; [`PairingMessage`] ties each body
//! to its envelope field number.

use crate::codec::Envelope;
use crate::{ProtocolError, Result};
use prost::Message;

/// Envelope field numbers for pairing messages
pub mod message_type {
    pub const PAIRING_REQUEST: u32 = 10;
    pub const PAIRING_REQUEST_ACK: u32 = 11;
    pub const OPTIONS: u32 = 20;
    pub const CONFIGURATION: u32 = 30;
    pub const CONFIGURATION_ACK: u32 = 31;
    pub const SECRET: u32 = 40;
    pub const SECRET_ACK: u32 = 41;
}

/// How the pairing code is presented on the TV
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EncodingType {
    Unknown = 0,
    Alphanumeric = 1,
    Numeric = 2,
    Hexadecimal = 3,
    Qrcode = 4,
}

/// Which side enters the code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RoleType {
    Unknown = 0,
    Input = 1,
    Output = 2,
}

/// Number of symbols in the code shown on screen
pub const CODE_SYMBOL_LENGTH: u32 = 6;

#[derive(Clone, PartialEq, Message)]
pub struct PairingRequest {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(string, tag = "2")]
    pub client_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PairingRequestAck {
    #[prost(string, tag = "1")]
    pub server_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PairingEncoding {
    #[prost(enumeration = "EncodingType", tag = "1")]
    pub r#type: i32,
    #[prost(uint32, tag = "2")]
    pub symbol_length: u32,
}

impl PairingEncoding {
    /// The only encoding we offer: six hexadecimal symbols
    pub fn hexadecimal() -> Self {
        Self {
            r#type: EncodingType::Hexadecimal as i32,
            symbol_length: CODE_SYMBOL_LENGTH,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct PairingOptions {
    #[prost(message, repeated, tag = "1")]
    pub input_encodings: Vec<PairingEncoding>,
    #[prost(message, repeated, tag = "2")]
    pub output_encodings: Vec<PairingEncoding>,
    #[prost(enumeration = "RoleType", tag = "3")]
    pub preferred_role: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct PairingConfiguration {
    #[prost(message, optional, tag = "1")]
    pub encoding: Option<PairingEncoding>,
    #[prost(enumeration = "RoleType", tag = "2")]
    pub client_role: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct PairingSecret {
    #[prost(bytes = "vec", tag = "1")]
    pub secret: Vec<u8>,
}

/// Typed pairing message
#[derive(Debug, Clone, PartialEq)]
pub enum PairingMessage {
    Request(PairingRequest),
    RequestAck(PairingRequestAck),
    Options(PairingOptions),
    Configuration(PairingConfiguration),
    ConfigurationAck,
    Secret(PairingSecret),
    SecretAck(PairingSecret),
}

impl PairingMessage {
    /// Pairing request naming our service and client
    pub fn request(service_name: &str, client_name: &str) -> Self {
        PairingMessage::Request(PairingRequest {
            service_name: service_name.to_string(),
            client_name: client_name.to_string(),
        })
    }

    /// Our options: we input a hexadecimal code
    pub fn options() -> Self {
        PairingMessage::Options(PairingOptions {
            input_encodings: vec![PairingEncoding::hexadecimal()],
            output_encodings: Vec::new(),
            preferred_role: RoleType::Input as i32,
        })
    }

    /// Our configuration: hexadecimal code, client is the input side
    pub fn configuration() -> Self {
        PairingMessage::Configuration(PairingConfiguration {
            encoding: Some(PairingEncoding::hexadecimal()),
            client_role: RoleType::Input as i32,
        })
    }

    /// Secret frame carrying our hash
    pub fn secret(secret: &[u8]) -> Self {
        PairingMessage::Secret(PairingSecret {
            secret: secret.to_vec(),
        })
    }

    /// Envelope field number of this message
    pub fn message_type(&self) -> u32 {
        use message_type::*;
        match self {
            PairingMessage::Request(_) => PAIRING_REQUEST,
            PairingMessage::RequestAck(_) => PAIRING_REQUEST_ACK,
            PairingMessage::Options(_) => OPTIONS,
            PairingMessage::Configuration(_) => CONFIGURATION,
            PairingMessage::ConfigurationAck => CONFIGURATION_ACK,
            PairingMessage::Secret(_) => SECRET,
            PairingMessage::SecretAck(_) => SECRET_ACK,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PairingMessage::Request(_) => "PAIRING_REQUEST",
            PairingMessage::RequestAck(_) => "PAIRING_REQUEST_ACK",
            PairingMessage::Options(_) => "OPTIONS",
            PairingMessage::Configuration(_) => "CONFIGURATION",
            PairingMessage::ConfigurationAck => "CONFIGURATION_ACK",
            PairingMessage::Secret(_) => "SECRET",
            PairingMessage::SecretAck(_) => "SECRET_ACK",
        }
    }

    /// Wrap in a pairing envelope (version 2, status OK)
    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            PairingMessage::Request(m) => m.encode_to_vec(),
            PairingMessage::RequestAck(m) => m.encode_to_vec(),
            PairingMessage::Options(m) => m.encode_to_vec(),
            PairingMessage::Configuration(m) => m.encode_to_vec(),
            PairingMessage::ConfigurationAck => Vec::new(),
            PairingMessage::Secret(m) | PairingMessage::SecretAck(m) => m.encode_to_vec(),
        };
        Envelope::pairing(self.message_type(), payload)
    }

    /// Decode a pairing envelope
    ///
    /// A non-OK status is reported as [`ProtocolError::BadStatus`] before the
    /// body is looked at.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        use message_type::*;

        if !envelope.is_ok() {
            return Err(ProtocolError::BadStatus(envelope.status));
        }

        let body = &envelope.payload[..];
        let message = match envelope.message_type {
            PAIRING_REQUEST => PairingMessage::Request(PairingRequest::decode(body)?),
            PAIRING_REQUEST_ACK => PairingMessage::RequestAck(PairingRequestAck::decode(body)?),
            OPTIONS => PairingMessage::Options(PairingOptions::decode(body)?),
            CONFIGURATION => PairingMessage::Configuration(PairingConfiguration::decode(body)?),
            CONFIGURATION_ACK => PairingMessage::ConfigurationAck,
            SECRET => PairingMessage::Secret(PairingSecret::decode(body)?),
            SECRET_ACK => PairingMessage::SecretAck(PairingSecret::decode(body)?),
            other => {
                return Err(ProtocolError::InvalidMessage(format!(
                    "Unknown pairing message type {}",
                    other
                )))
            }
        };
        Ok(message)
    }
}
