//! Android TV Remote message bodies
//!
//! Bodies use ordinary protobuf field encoding via `prost` derives; the
//! envelope around them is hand-coded in [`crate::codec::envelope`].

pub mod keys;
pub mod pairing;
pub mod remote;

pub use keys::{KeyDirection, RemoteKey};
pub use pairing::PairingMessage;
pub use remote::RemoteMessage;
