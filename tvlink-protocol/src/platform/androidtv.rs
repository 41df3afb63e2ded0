//! Android TV Remote v2 platform
//!
//! Binds [`PairingSession`] and [`RemoteSession`] to the device runtime.
//! Session events are translated into machine events by small forwarding
//! tasks. The machine owns the retry policy here, so remote sessions are
//! spawned with their own reconnect loop disabled.

use crate::device::{EventSink, MachineEvent, PairingControl, Platform, SessionControl};
use crate::messages::{KeyDirection, RemoteKey};
use crate::observer::Observer;
use crate::pairing::{PairingConfig, PairingEvent, PairingSession};
use crate::registry::PlatformKind;
use crate::remote::{RemoteConfig, RemoteEvent, RemoteSession};
use crate::{Credentials, Result};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffered session events per actor
const EVENT_QUEUE: usize = 16;

/// Android TV Remote v2 platform
pub struct AndroidTvPlatform {
    pairing: PairingConfig,
    remote: RemoteConfig,
    observer: Arc<dyn Observer>,
}

impl AndroidTvPlatform {
    pub fn new(pairing: PairingConfig, remote: RemoteConfig, observer: Arc<dyn Observer>) -> Self {
        let remote = RemoteConfig {
            max_reconnect_attempts: 0,
            ..remote
        };
        Self {
            pairing,
            remote,
            observer,
        }
    }

    pub fn remote_config(&self) -> &RemoteConfig {
        &self.remote
    }
}

impl Platform for AndroidTvPlatform {
    type Pairing = AndroidTvPairing;
    type Session = AndroidTvSession;

    fn kind(&self) -> PlatformKind {
        PlatformKind::AndroidTv
    }

    fn spawn_pairing(&self, ip: IpAddr, events: EventSink) -> AndroidTvPairing {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let session = PairingSession::spawn(ip, self.pairing.clone(), tx, self.observer.clone());
        AndroidTvPairing {
            session,
            forwarder: tokio::spawn(forward_pairing(rx, events)),
        }
    }

    fn spawn_session(
        &self,
        ip: IpAddr,
        credentials: &Credentials,
        events: EventSink,
    ) -> AndroidTvSession {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let session = RemoteSession::spawn(
            ip,
            credentials,
            self.remote.clone(),
            tx,
            self.observer.clone(),
        );
        AndroidTvSession {
            session,
            forwarder: tokio::spawn(forward_remote(rx, events)),
        }
    }
}

/// Running Android TV pairing attempt
pub struct AndroidTvPairing {
    session: PairingSession,
    forwarder: JoinHandle<()>,
}

impl PairingControl for AndroidTvPairing {
    fn submit_code(&self, code: &str) -> Result<()> {
        self.session.submit_code(code)
    }

    fn stop(&self) {
        self.session.dispose();
        self.forwarder.abort();
    }
}

impl Drop for AndroidTvPairing {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Running Android TV remote session
pub struct AndroidTvSession {
    session: RemoteSession,
    forwarder: JoinHandle<()>,
}

impl SessionControl for AndroidTvSession {
    fn send_key(&self, key: &str) -> Result<()> {
        match key.parse::<RemoteKey>() {
            Ok(key) => self.session.send_key(key, KeyDirection::Short),
            Err(e) => {
                warn!("Dropping unsupported key: {}", e);
                Ok(())
            }
        }
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.session.send_text(text)
    }

    fn send_app_link(&self, link: &str) -> Result<()> {
        self.session.send_app_link(link)
    }

    fn check_heartbeat(&self) -> Result<()> {
        self.session.check_heartbeat()
    }

    fn stop(&self) {
        self.session.dispose();
        self.forwarder.abort();
    }
}

impl Drop for AndroidTvSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pairing_event(event: PairingEvent) -> MachineEvent {
    match event {
        PairingEvent::PromptReceived => MachineEvent::PromptReceived,
        PairingEvent::Paired(credentials) => MachineEvent::Paired(credentials),
        PairingEvent::Failed { phase, message } => {
            debug!("Pairing failed in {}", phase);
            MachineEvent::PairingError(message)
        }
    }
}

/// Machine event for a remote event; informational events map to none
fn remote_event(event: RemoteEvent) -> Option<MachineEvent> {
    if event.is_informational() {
        info!("TV reported {:?}", event);
        return None;
    }
    match event {
        RemoteEvent::Ready => Some(MachineEvent::Connected),
        RemoteEvent::Closed { error, .. } => Some(MachineEvent::ConnectionLost(
            error.unwrap_or_else(|| "Connection closed".to_string()),
        )),
        RemoteEvent::HeartbeatOk => Some(MachineEvent::HeartbeatOk),
        RemoteEvent::HeartbeatFailed(reason) => Some(MachineEvent::HeartbeatFailed(reason)),
        _ => None,
    }
}

/// Forward until the session reports its last event
async fn forward_pairing(mut rx: mpsc::Receiver<PairingEvent>, sink: EventSink) {
    while let Some(event) = rx.recv().await {
        debug!("Pairing event: {}", event.name());
        let terminal = event.is_terminal();
        if !sink.send(pairing_event(event)).await || terminal {
            break;
        }
    }
}

async fn forward_remote(mut rx: mpsc::Receiver<RemoteEvent>, sink: EventSink) {
    while let Some(event) = rx.recv().await {
        let Some(event) = remote_event(event) else {
            continue;
        };
        if !sink.send(event).await {
            break;
        }
    }
}
