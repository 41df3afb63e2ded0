//! Android TV Remote v2 control channel
//!
//! A [`RemoteSession`] owns one TLS connection to the remote port at a time.
//! The TV opens with `REMOTE_CONFIGURE`; after our reply the session is ready
//! and accepts key, text and app link commands.

pub mod events;
pub mod reconnect;
pub mod session;

pub use events::RemoteEvent;
pub use reconnect::ReconnectPolicy;
pub use session::{ImeState, RemoteConfig, RemoteSession};
