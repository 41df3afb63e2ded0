//! Android TV Remote pairing
//!
//! ## Pairing Protocol
//!
//! 1. **Identity**: generate a fresh RSA 2048 self-signed client certificate
//! 2. **TLS**: connect to the pairing port, accept the TV's self-signed
//!    certificate and keep it
//! 3. **Request**: send `PAIRING_REQUEST`
//! 4. **Options**: on the TV's ack or options, send our `OPTIONS` and a
//!    hexadecimal six symbol `CONFIGURATION`
//! 5. **Code**: after `CONFIGURATION_ACK` the TV shows a code; the user types it
//! 6. **Secret**: hash both public keys with the code, verify the check byte
//!    locally, send `SECRET`
//! 7. **Done**: `SECRET_ACK` completes pairing and yields [`Credentials`]
//!
//! [`Credentials`]: crate::Credentials

pub mod events;
pub mod handshake;
pub mod session;

pub use events::PairingEvent;
pub use handshake::{HandshakeStep, PairingHandshake, PairingPhase};
pub use session::{PairingConfig, PairingSession};
