//! Length-delimited framing
//!
//! Every message on both TLS ports is sent as `varint(length) ++ payload`.
//! TLS records do not line up with frames, so [`FrameReader`] accepts input
//! in arbitrary chunks and hands back only complete frames.

use super::varint::{decode_varint, encode_varint, encoded_len, VarintError};
use crate::{ProtocolError, Result};
use bytes::{Buf, Bytes, BytesMut};

/// Largest frame we accept (the device never sends anything close to this)
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Prefix `payload` with its varint length
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let len = payload.len() as u32;
    let mut buf = BytesMut::with_capacity(encoded_len(len) + payload.len());
    encode_varint(len, &mut buf);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Streaming frame splitter
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Create a reader with the default frame size limit
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    /// Create a reader with a custom frame size limit
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Feed a chunk of input, returning every frame it completes
    ///
    /// A trailing partial frame stays buffered for the next call. An error
    /// means the stream is corrupt and the connection should be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let (len, header_len) = match decode_varint(&self.buffer) {
                Ok(decoded) => decoded,
                Err(VarintError::Incomplete) => break,
                Err(e) => return Err(e.into()),
            };

            let len = len as usize;
            if len > self.max_frame_len {
                return Err(ProtocolError::InvalidMessage(format!(
                    "Frame too large: {} bytes (max {})",
                    len, self.max_frame_len
                )));
            }

            if self.buffer.len() < header_len + len {
                break;
            }

            self.buffer.advance(header_len);
            frames.push(self.buffer.split_to(len).freeze());
        }

        Ok(frames)
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let frame = encode_frame(b"hello");
        assert_eq!(&frame[..], b"\x05hello");

        let mut reader = FrameReader::new();
        let frames = reader.push(&frame).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_byte_at_a_time_with_long_payload() {
        let payload: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        let frame = encode_frame(&payload);
        assert_eq!(frame[0] & 0x80, 0x80, "length needs two varint bytes");

        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        for byte in frame.iter() {
            frames.extend(reader.push(&[*byte]).unwrap());
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &payload[..]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk_with_trailing_partial() {
        let mut input = Vec::new();
        input.extend_from_slice(&encode_frame(b"one"));
        input.extend_from_slice(&encode_frame(b""));
        input.extend_from_slice(&encode_frame(b"three"));
        let partial = encode_frame(b"four");
        input.extend_from_slice(&partial[..3]);

        let mut reader = FrameReader::new();
        let frames = reader.push(&input).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"one");
        assert!(frames[1].is_empty());
        assert_eq!(&frames[2][..], b"three");
        assert_eq!(reader.buffered(), 3);

        let rest = reader.push(&partial[3..]).unwrap();
        assert_eq!(rest, vec![Bytes::from_static(b"four")]);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut reader = FrameReader::with_max_frame_len(16);
        let frame = encode_frame(&[0u8; 17]);
        assert!(matches!(
            reader.push(&frame),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_malformed_length_rejected() {
        let mut reader = FrameReader::new();
        let result = reader.push(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(
            result,
            Err(ProtocolError::Varint(VarintError::Overflow))
        ));
    }
}
