//! Transport layer
//!
//! TLS to the TV's pairing and remote ports, and envelope framing over the
//! resulting byte stream.

pub mod tls;
pub mod tls_config;

pub use tls::{connect_tls, MessageStream};
pub use tls_config::create_client_config;
