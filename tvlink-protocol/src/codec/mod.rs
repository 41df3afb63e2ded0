//! Wire codec
//!
//! Three layers, each usable on its own:
//!
//! - [`varint`]: protobuf base-128 varints limited to 32 bits
//! - [`frame`]: `varint(length) ++ payload` framing with a streaming reader
//! - [`envelope`]: the version/status/typed-payload wrapper around every message

pub mod envelope;
pub mod frame;
pub mod varint;

pub use envelope::{Envelope, STATUS_BAD_CONFIGURATION, STATUS_BAD_SECRET, STATUS_ERROR, STATUS_OK};
pub use frame::{encode_frame, FrameReader, MAX_FRAME_LEN};
pub use varint::{decode_varint, encode_varint, encoded_len, VarintError, MAX_VARINT_LEN};
