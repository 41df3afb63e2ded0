//! Platform implementations
//!
//! Only Android TV Remote v2 is implemented; other platforms plug into
//! [`crate::device::Platform`] the same way.

pub mod androidtv;

pub use androidtv::{AndroidTvPairing, AndroidTvPlatform, AndroidTvSession};
