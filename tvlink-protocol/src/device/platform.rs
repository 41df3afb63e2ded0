//! Platform seam
//!
//! Every TV platform provides the same two actors: a pairing session and a
//! remote session. The runtime drives them through these traits only, so the
//! lifecycle machine is identical across platforms.

use super::events::MachineEvent;
use super::runtime::{Origin, Tagged};
use crate::registry::PlatformKind;
use crate::{Credentials, Result};
use std::net::IpAddr;
use tokio::sync::mpsc;

/// Channel from a platform actor back to its device runtime
///
/// Each sink is bound to the actor instance it was created for; events from a
/// replaced or stopped actor are discarded by the runtime.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Tagged>,
    origin: Origin,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<Tagged>, origin: Origin) -> Self {
        Self { tx, origin }
    }

    /// Deliver an event; `false` once the runtime is gone
    pub async fn send(&self, event: MachineEvent) -> bool {
        self.tx
            .send(Tagged {
                origin: self.origin,
                event,
            })
            .await
            .is_ok()
    }
}

/// Control surface of a running pairing session
pub trait PairingControl: Send + 'static {
    fn submit_code(&self, code: &str) -> Result<()>;

    /// Dispose the session; must be idempotent
    fn stop(&self);
}

/// Control surface of a running remote session
pub trait SessionControl: Send + 'static {
    /// Unsupported key names are logged and dropped, not errors
    fn send_key(&self, key: &str) -> Result<()>;

    fn send_text(&self, text: &str) -> Result<()>;

    /// Open a deep link, e.g. `https://www.netflix.com/title/80057281`
    fn send_app_link(&self, link: &str) -> Result<()>;

    /// Request a liveness verdict, reported back as
    /// `HEARTBEAT_OK` / `HEARTBEAT_FAILED`
    fn check_heartbeat(&self) -> Result<()>;

    /// Dispose the session; must be idempotent
    fn stop(&self);
}

/// A TV platform: factory for its pairing and remote sessions
///
/// Actors report back through their [`EventSink`] with `PROMPT_RECEIVED`,
/// `PAIRED`, `PAIRING_ERROR` (pairing) and `CONNECTED`, `CONNECTION_LOST`,
/// `HEARTBEAT_OK`, `HEARTBEAT_FAILED` (session).
pub trait Platform: Send + 'static {
    type Pairing: PairingControl;
    type Session: SessionControl;

    fn kind(&self) -> PlatformKind;

    fn spawn_pairing(&self, ip: IpAddr, events: EventSink) -> Self::Pairing;

    fn spawn_session(
        &self,
        ip: IpAddr,
        credentials: &Credentials,
        events: EventSink,
    ) -> Self::Session;
}
