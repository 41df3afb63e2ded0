//! Message envelope
//!
//! Every message is wrapped in the same three-field protobuf shape:
//!
//! ```text
//! field 1 (varint)           protocol version   (pairing only)
//! field 2 (varint)           status code        (pairing only)
//! field N (length-delimited) message body, N = message type (1..=100)
//! ```
//!
//! Field numbers overlap: field 1 as a varint is the protocol version, field 1
//! as a length-delimited value is a type-1 message (remote configure). The
//! wire type tells them apart, which is why this is hand-coded instead of
//! going through a schema.
//!
//! Remote-control messages carry no version or status; zero values are not
//! written, matching protobuf default-value elision.

use super::varint::{decode_varint, encode_varint, encoded_len, VarintError};
use crate::{ProtocolError, Result, PROTOCOL_VERSION};
use bytes::{Bytes, BytesMut};

/// Request handled successfully
pub const STATUS_OK: u32 = 200;
/// Generic failure
pub const STATUS_ERROR: u32 = 400;
/// Options/configuration rejected
pub const STATUS_BAD_CONFIGURATION: u32 = 401;
/// Secret did not match
pub const STATUS_BAD_SECRET: u32 = 402;

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LEN: u32 = 2;
const WIRE_FIXED32: u32 = 5;

const FIELD_VERSION: u32 = 1;
const FIELD_STATUS: u32 = 2;

/// Lowest message type / payload field number
pub const MIN_MESSAGE_TYPE: u32 = 1;
/// Highest message type / payload field number
pub const MAX_MESSAGE_TYPE: u32 = 100;

/// One decoded wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Protocol version (0 when absent)
    pub protocol_version: u32,
    /// Status code (0 when absent)
    pub status: u32,
    /// Payload field number, doubling as the message type
    pub message_type: u32,
    /// Encoded message body
    pub payload: Bytes,
}

impl Envelope {
    /// Envelope for the pairing port: current version, status OK
    pub fn pairing(message_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            status: STATUS_OK,
            message_type,
            payload: payload.into(),
        }
    }

    /// Envelope for the remote-control port: no version or status
    pub fn remote(message_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            protocol_version: 0,
            status: 0,
            message_type,
            payload: payload.into(),
        }
    }

    /// Whether the status field is absent or OK
    pub fn is_ok(&self) -> bool {
        self.status == 0 || self.status == STATUS_OK
    }

    /// Encode the envelope body (without the frame length prefix)
    pub fn encode(&self) -> Bytes {
        debug_assert!(
            (MIN_MESSAGE_TYPE..=MAX_MESSAGE_TYPE).contains(&self.message_type),
            "message type out of range"
        );

        let payload_len = self.payload.len() as u32;
        let mut buf = BytesMut::with_capacity(
            12 + encoded_len(self.message_type << 3) + encoded_len(payload_len) + self.payload.len(),
        );

        if self.protocol_version != 0 {
            encode_varint(key(FIELD_VERSION, WIRE_VARINT), &mut buf);
            encode_varint(self.protocol_version, &mut buf);
        }
        if self.status != 0 {
            encode_varint(key(FIELD_STATUS, WIRE_VARINT), &mut buf);
            encode_varint(self.status, &mut buf);
        }

        encode_varint(key(self.message_type, WIRE_LEN), &mut buf);
        encode_varint(payload_len, &mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Encode the envelope and prefix it with its varint length
    pub fn to_frame(&self) -> Bytes {
        super::frame::encode_frame(&self.encode())
    }

    /// Decode one envelope body
    ///
    /// Unknown scalar fields are skipped. Exactly one length-delimited field
    /// in the message type range must be present.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = FieldReader { bytes, pos: 0 };
        let mut protocol_version = 0;
        let mut status = 0;
        let mut body: Option<(u32, Bytes)> = None;

        while !reader.is_empty() {
            let field_key = reader.varint()?;
            let field = field_key >> 3;
            let wire_type = field_key & 0x07;

            match wire_type {
                WIRE_VARINT => {
                    let value = reader.varint()?;
                    match field {
                        FIELD_VERSION => protocol_version = value,
                        FIELD_STATUS => status = value,
                        _ => {}
                    }
                }
                WIRE_LEN => {
                    let len = reader.varint()? as usize;
                    let value = reader.take(len)?;
                    if !(MIN_MESSAGE_TYPE..=MAX_MESSAGE_TYPE).contains(&field) {
                        continue;
                    }
                    if let Some((existing, _)) = body {
                        return Err(ProtocolError::InvalidMessage(format!(
                            "Envelope carries both message type {} and {}",
                            existing, field
                        )));
                    }
                    body = Some((field, Bytes::copy_from_slice(value)));
                }
                WIRE_FIXED64 => {
                    reader.take(8)?;
                }
                WIRE_FIXED32 => {
                    reader.take(4)?;
                }
                other => {
                    return Err(ProtocolError::InvalidMessage(format!(
                        "Unsupported wire type {} for field {}",
                        other, field
                    )));
                }
            }
        }

        let (message_type, payload) = body.ok_or_else(|| {
            ProtocolError::InvalidMessage("Envelope has no message body".to_string())
        })?;

        Ok(Self {
            protocol_version,
            status,
            message_type,
            payload,
        })
    }
}

fn key(field: u32, wire_type: u32) -> u32 {
    (field << 3) | wire_type
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn varint(&mut self) -> Result<u32> {
        match decode_varint(&self.bytes[self.pos..]) {
            Ok((value, used)) => {
                self.pos += used;
                Ok(value)
            }
            Err(VarintError::Incomplete) => Err(ProtocolError::InvalidMessage(
                "Envelope truncated inside a varint".to_string(),
            )),
            // The frame boundary is already known, so the stream is still in sync
            Err(VarintError::Overflow) => Err(ProtocolError::InvalidMessage(
                "Envelope varint exceeds 32 bits".to_string(),
            )),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                ProtocolError::InvalidMessage(format!(
                    "Field length {} runs past end of envelope",
                    len
                ))
            })?;
        let value = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(value)
    }
}
