//! TV Link Protocol Implementation
//!
//! Pairing and remote control for smart TVs. Every platform shares one
//! per-device lifecycle state machine ([`DeviceMachine`]); the Android TV
//! Remote v2 protocol is the concrete platform implemented here:
//!
//! - a TLS pairing handshake secured by a 6 character code shown on the TV,
//! - a varint-framed protobuf envelope carrying pairing and remote messages,
//! - a persistent mutually authenticated session with ping/heartbeat and
//!   reconnect policy.
//!
//! ## Layers
//!
//! 1. [`codec`]: varints, length-delimited frames, the message envelope
//! 2. [`messages`]: pairing and remote message bodies
//! 3. [`certificate`]: client identity generation and pairing secret hashing
//! 4. [`transport`]: TLS connector and framed message stream
//! 5. [`pairing`] / [`remote`]: the two session actors
//! 6. [`device`]: lifecycle machine, platform seam and async runtime
//! 7. [`platform`]: Android TV binding of the platform seam

pub mod certificate;
pub mod codec;
pub mod credentials;
pub mod device;
pub mod messages;
pub mod observer;
pub mod pairing;
pub mod platform;
pub mod registry;
pub mod remote;
pub mod transport;

mod error;
pub use certificate::{ClientIdentity, PairingCode};
pub use credentials::{CredentialRecord, Credentials};
pub use device::{
    DeviceHandle, DeviceIdentity, DeviceMachine, DeviceRuntime, DeviceStore, Effect,
    MachineConfig, MachineEvent, MachineSnapshot, MachineState, Platform,
};
pub use error::{ProtocolError, Result};
pub use observer::{Observer, TracingObserver};
pub use platform::AndroidTvPlatform;
pub use registry::{DeviceEntry, DeviceRegistry, DeviceStatus, PlatformKind};

/// Pairing protocol version we implement
pub const PROTOCOL_VERSION: u32 = 2;

/// Default TLS port for the pairing handshake
pub const PAIRING_PORT: u16 = 6467;

/// Default TLS port for the remote-control session
pub const REMOTE_PORT: u16 = 6466;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_constants() {
        assert_eq!(PROTOCOL_VERSION, 2);
        assert_ne!(PAIRING_PORT, REMOTE_PORT);
    }
}
