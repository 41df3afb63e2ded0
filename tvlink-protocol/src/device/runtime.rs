//! Device runtime actor
//!
//! Owns one [`DeviceMachine`] and processes its events strictly one at a
//! time. Effects are carried out here: platform actors are spawned and
//! stopped, timers started and aborted, credentials handed to the
//! [`DeviceStore`]. Every actor and timer is tagged with a generation number
//! and anything it sends after being replaced is dropped, so a stale timer or
//! a dying session can never act on a newer phase.

use super::events::{Effect, MachineEvent};
use super::machine::{DeviceIdentity, DeviceMachine, MachineSnapshot};
use super::platform::{EventSink, PairingControl, Platform, SessionControl};
use super::state::MachineState;
use crate::credentials::CredentialRecord;
use crate::observer::{ErrorContext, Observer};
use crate::{Credentials, ProtocolError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queued handle events per device
const COMMAND_QUEUE: usize = 32;

/// Queued actor and timer events per device
const ACTOR_QUEUE: usize = 64;

/// Which actor instance an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Pairing(u64),
    Session(u64),
    RetryTimer(u64),
    HeartbeatTimer(u64),
}

pub(crate) struct Tagged {
    pub(crate) origin: Origin,
    pub(crate) event: MachineEvent,
}

/// Persistence collaborator for identities and credentials
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// A device left setup with a new identity
    async fn identity_assigned(&self, identity: &DeviceIdentity) -> Result<()>;

    /// Pairing succeeded
    async fn store_credentials(
        &self,
        identity: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<()>;

    /// The device was forgotten
    async fn clear_credentials(&self, identity: &DeviceIdentity) -> Result<()>;

    /// The device went back to setup; drop the identity and its credentials
    async fn discard_identity(&self, identity: &DeviceIdentity) -> Result<()>;
}

/// In-memory [`DeviceStore`] keyed by device id
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: Mutex<HashMap<String, DeviceIdentity>>,
    records: Mutex<HashMap<String, CredentialRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self, id: &str) -> Option<DeviceIdentity> {
        self.identities
            .lock()
            .ok()
            .and_then(|identities| identities.get(id).cloned())
    }

    pub fn record(&self, id: &str) -> Option<CredentialRecord> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(id).cloned())
    }
}

fn poisoned() -> ProtocolError {
    ProtocolError::InvalidMessage("store lock poisoned".to_string())
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn identity_assigned(&self, identity: &DeviceIdentity) -> Result<()> {
        self.identities
            .lock()
            .map_err(|_| poisoned())?
            .insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn store_credentials(
        &self,
        identity: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<()> {
        let record = credentials.to_record()?;
        self.records
            .lock()
            .map_err(|_| poisoned())?
            .insert(identity.id.clone(), record);
        Ok(())
    }

    async fn clear_credentials(&self, identity: &DeviceIdentity) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| poisoned())?
            .remove(&identity.id);
        Ok(())
    }

    async fn discard_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        self.clear_credentials(identity).await?;
        self.identities
            .lock()
            .map_err(|_| poisoned())?
            .remove(&identity.id);
        Ok(())
    }
}

/// Cloneable handle to a device runtime
///
/// The runtime stops once every handle is dropped.
#[derive(Clone)]
pub struct DeviceHandle {
    events: mpsc::Sender<MachineEvent>,
    snapshots: watch::Receiver<MachineSnapshot>,
}

impl DeviceHandle {
    /// Queue an event for the machine
    pub async fn send(&self, event: MachineEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| ProtocolError::Disposed)
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> MachineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that changes on every state transition
    pub fn subscribe(&self) -> watch::Receiver<MachineSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&MachineSnapshot) -> bool,
    ) -> Result<MachineSnapshot> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_| ProtocolError::Disposed)?;
        Ok(snapshot.clone())
    }

    pub async fn set_device_info(&self, name: impl Into<String>, ip: impl Into<String>) -> Result<()> {
        self.send(MachineEvent::SetDeviceInfo {
            name: name.into(),
            ip: ip.into(),
        })
        .await
    }

    pub async fn start_pairing(&self) -> Result<()> {
        self.send(MachineEvent::StartPairing).await
    }

    pub async fn submit_code(&self, code: impl Into<String>) -> Result<()> {
        self.send(MachineEvent::SubmitCode(code.into())).await
    }

    pub async fn connect(&self) -> Result<()> {
        self.send(MachineEvent::Connect).await
    }

    pub async fn send_key(&self, key: impl Into<String>) -> Result<()> {
        self.send(MachineEvent::SendKey(key.into())).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(MachineEvent::SendText(text.into())).await
    }

    pub async fn send_app_link(&self, link: impl Into<String>) -> Result<()> {
        self.send(MachineEvent::SendAppLink(link.into())).await
    }

    pub async fn reset_to_setup(&self) -> Result<()> {
        self.send(MachineEvent::ResetToSetup).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(MachineEvent::Disconnect).await
    }

    pub async fn forget(&self) -> Result<()> {
        self.send(MachineEvent::Forget).await
    }
}

#[derive(Debug, Default)]
struct Generations {
    pairing: u64,
    session: u64,
    retry: u64,
    heartbeat: u64,
}

/// Async actor driving one device
pub struct DeviceRuntime<P: Platform> {
    machine: DeviceMachine,
    platform: P,
    store: Arc<dyn DeviceStore>,
    observer: Arc<dyn Observer>,
    commands: mpsc::Receiver<MachineEvent>,
    actor_tx: mpsc::Sender<Tagged>,
    actor_rx: mpsc::Receiver<Tagged>,
    snapshots: watch::Sender<MachineSnapshot>,
    pairing: Option<P::Pairing>,
    session: Option<P::Session>,
    retry_timer: Option<JoinHandle<()>>,
    heartbeat_timer: Option<JoinHandle<()>>,
    generations: Generations,
}

impl<P: Platform> DeviceRuntime<P> {
    pub fn new(
        machine: DeviceMachine,
        platform: P,
        store: Arc<dyn DeviceStore>,
        observer: Arc<dyn Observer>,
    ) -> (Self, DeviceHandle) {
        let (events, commands) = mpsc::channel(COMMAND_QUEUE);
        let (actor_tx, actor_rx) = mpsc::channel(ACTOR_QUEUE);
        let (snapshots, snapshot_rx) = watch::channel(machine.snapshot());

        let runtime = Self {
            machine,
            platform,
            store,
            observer,
            commands,
            actor_tx,
            actor_rx,
            snapshots,
            pairing: None,
            session: None,
            retry_timer: None,
            heartbeat_timer: None,
            generations: Generations::default(),
        };
        let handle = DeviceHandle {
            events,
            snapshots: snapshot_rx,
        };
        (runtime, handle)
    }

    /// Create the runtime and run it on its own task
    pub fn spawn(
        machine: DeviceMachine,
        platform: P,
        store: Arc<dyn DeviceStore>,
        observer: Arc<dyn Observer>,
    ) -> (DeviceHandle, JoinHandle<()>) {
        let (runtime, handle) = Self::new(machine, platform, store, observer);
        (handle, tokio::spawn(runtime.run()))
    }

    /// Process events until every handle is dropped or the machine is final
    pub async fn run(mut self) {
        info!(
            device_id = %self.device_id(),
            platform = %self.platform.kind(),
            "Device runtime started in {}",
            self.machine.state()
        );
        self.observer.on_transition(&self.machine.snapshot());

        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(event) => event,
                    None => break,
                },
                Some(tagged) = self.actor_rx.recv() => {
                    if !self.is_current(tagged.origin) {
                        debug!(
                            device_id = %self.device_id(),
                            "Dropping stale {} from {:?}",
                            tagged.event.name(),
                            tagged.origin
                        );
                        continue;
                    }
                    tagged.event
                }
            };

            self.dispatch(event).await;

            if self.machine.state().is_final() {
                break;
            }
        }

        info!(device_id = %self.device_id(), "Device runtime stopped");
        self.teardown();
    }

    fn device_id(&self) -> String {
        self.machine
            .identity()
            .map(|identity| identity.id.clone())
            .unwrap_or_default()
    }

    fn ip(&self) -> String {
        self.machine
            .identity()
            .map(|identity| identity.ip.to_string())
            .unwrap_or_default()
    }

    fn is_current(&self, origin: Origin) -> bool {
        match origin {
            Origin::Pairing(generation) => {
                self.pairing.is_some() && generation == self.generations.pairing
            }
            Origin::Session(generation) => {
                self.session.is_some() && generation == self.generations.session
            }
            Origin::RetryTimer(generation) => generation == self.generations.retry,
            Origin::HeartbeatTimer(generation) => generation == self.generations.heartbeat,
        }
    }

    /// Handle an event and every follow-up event its effects produce
    async fn dispatch(&mut self, event: MachineEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let before = self.machine.snapshot();
            let effects = self.machine.handle(event);

            for effect in effects {
                if let Some(follow_up) = self.apply(effect).await {
                    queue.push_back(follow_up);
                }
            }

            // After the effects: the new state's actors exist by now
            let after = self.machine.snapshot();
            if after.state == MachineState::Error && before.state != MachineState::Error {
                self.report("session", &ProtocolError::ExhaustedRetries(after.retry_count));
            }
            if after != before {
                self.observer.on_transition(&after);
                self.snapshots.send_replace(after);
            }
        }
    }

    async fn apply(&mut self, effect: Effect) -> Option<MachineEvent> {
        match effect {
            Effect::SpawnPairing { ip } => {
                self.stop_pairing();
                self.generations.pairing += 1;
                let sink = self.sink(Origin::Pairing(self.generations.pairing));
                debug!(device_id = %self.device_id(), %ip, "Spawning pairing session");
                self.pairing = Some(self.platform.spawn_pairing(ip, sink));
            }
            Effect::SubmitCode(code) => {
                let result = match &self.pairing {
                    Some(pairing) => pairing.submit_code(&code),
                    None => Err(ProtocolError::NotReady),
                };
                if let Err(e) = result {
                    self.report("pairing.verifying", &e);
                    return Some(MachineEvent::PairingError(e.to_string()));
                }
            }
            Effect::StopPairing => self.stop_pairing(),
            Effect::SpawnSession { ip, credentials } => {
                self.stop_session();
                self.generations.session += 1;
                let sink = self.sink(Origin::Session(self.generations.session));
                debug!(device_id = %self.device_id(), %ip, "Spawning remote session");
                self.session = Some(self.platform.spawn_session(ip, &credentials, sink));
            }
            Effect::StopSession => self.stop_session(),
            Effect::StartRetryTimer(delay) => {
                self.cancel_retry_timer();
                let origin = Origin::RetryTimer(self.generations.retry);
                self.retry_timer = Some(self.start_timer(delay, origin, MachineEvent::RetryDue));
            }
            Effect::CancelRetryTimer => self.cancel_retry_timer(),
            Effect::StartHeartbeatTimer(delay) => {
                self.cancel_heartbeat_timer();
                let origin = Origin::HeartbeatTimer(self.generations.heartbeat);
                self.heartbeat_timer =
                    Some(self.start_timer(delay, origin, MachineEvent::HeartbeatDue));
            }
            Effect::CancelHeartbeatTimer => self.cancel_heartbeat_timer(),
            Effect::CheckHeartbeat => {
                let result = match &self.session {
                    Some(session) => session.check_heartbeat(),
                    None => Err(ProtocolError::NotReady),
                };
                if let Err(e) = result {
                    self.report("session.heartbeat.checking", &e);
                    return Some(MachineEvent::HeartbeatFailed(e.to_string()));
                }
            }
            Effect::SendKey(key) => {
                if let Some(session) = &self.session {
                    if let Err(e) = session.send_key(&key) {
                        warn!(device_id = %self.device_id(), "Dropping key {}: {}", key, e);
                    }
                }
            }
            Effect::SendText(text) => {
                if let Some(session) = &self.session {
                    if let Err(e) = session.send_text(&text) {
                        warn!(device_id = %self.device_id(), "Dropping text input: {}", e);
                    }
                }
            }
            Effect::SendAppLink(link) => {
                if let Some(session) = &self.session {
                    if let Err(e) = session.send_app_link(&link) {
                        warn!(device_id = %self.device_id(), "Dropping app link {}: {}", link, e);
                    }
                }
            }
            Effect::IdentityAssigned(identity) => {
                if let Err(e) = self.store.identity_assigned(&identity).await {
                    self.report("setup", &e);
                }
            }
            Effect::StoreCredentials {
                identity,
                credentials,
            } => {
                if let Err(e) = self.store.store_credentials(&identity, &credentials).await {
                    self.report("pairing.complete", &e);
                }
            }
            Effect::ClearCredentials { identity } => {
                if let Err(e) = self.store.clear_credentials(&identity).await {
                    self.report("forget", &e);
                }
            }
            Effect::DiscardIdentity { identity } => {
                if let Err(e) = self.store.discard_identity(&identity).await {
                    self.report("setup", &e);
                }
            }
        }
        None
    }

    fn sink(&self, origin: Origin) -> EventSink {
        EventSink::new(self.actor_tx.clone(), origin)
    }

    fn start_timer(&self, delay: Duration, origin: Origin, event: MachineEvent) -> JoinHandle<()> {
        let tx = self.actor_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Tagged { origin, event }).await;
        })
    }

    fn stop_pairing(&mut self) {
        if let Some(pairing) = self.pairing.take() {
            pairing.stop();
        }
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    fn cancel_retry_timer(&mut self) {
        self.generations.retry += 1;
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn cancel_heartbeat_timer(&mut self) {
        self.generations.heartbeat += 1;
        if let Some(timer) = self.heartbeat_timer.take() {
            timer.abort();
        }
    }

    fn report(&self, phase: &str, error: &ProtocolError) {
        warn!(
            device_id = %self.device_id(),
            ip = %self.ip(),
            phase,
            "{}",
            error
        );
        self.observer
            .on_error(&ErrorContext::new(self.ip(), phase), error);
    }

    fn teardown(&mut self) {
        self.stop_pairing();
        self.stop_session();
        self.cancel_retry_timer();
        self.cancel_heartbeat_timer();
    }
}

impl<P: Platform> Drop for DeviceRuntime<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::machine::MachineConfig;
    use crate::device::state::{MachineState, PairingStep};
    use crate::observer::NoopObserver;
    use crate::pairing::handshake::tests::identities;
    use crate::registry::PlatformKind;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Everything the stub actors were asked to do
    #[derive(Default)]
    struct Calls {
        pairings: AtomicUsize,
        sessions: AtomicUsize,
        stops: AtomicUsize,
        keys: Mutex<Vec<String>>,
        links: Mutex<Vec<String>>,
        sinks: Mutex<Vec<EventSink>>,
    }

    struct StubPlatform {
        calls: Arc<Calls>,
    }

    struct StubActor {
        calls: Arc<Calls>,
    }

    impl PairingControl for StubActor {
        fn submit_code(&self, _code: &str) -> Result<()> {
            Ok(())
        }

        fn stop(&self) {
            self.calls.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SessionControl for StubActor {
        fn send_key(&self, key: &str) -> Result<()> {
            self.calls.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }

        fn send_text(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        fn send_app_link(&self, link: &str) -> Result<()> {
            self.calls.links.lock().unwrap().push(link.to_string());
            Ok(())
        }

        fn check_heartbeat(&self) -> Result<()> {
            Err(ProtocolError::NotReady)
        }

        fn stop(&self) {
            self.calls.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Platform for StubPlatform {
        type Pairing = StubActor;
        type Session = StubActor;

        fn kind(&self) -> PlatformKind {
            PlatformKind::AndroidTv
        }

        fn spawn_pairing(&self, _ip: IpAddr, events: EventSink) -> StubActor {
            self.calls.pairings.fetch_add(1, Ordering::SeqCst);
            self.calls.sinks.lock().unwrap().push(events);
            StubActor {
                calls: self.calls.clone(),
            }
        }

        fn spawn_session(&self, _ip: IpAddr, _credentials: &Credentials, events: EventSink) -> StubActor {
            self.calls.sessions.fetch_add(1, Ordering::SeqCst);
            self.calls.sinks.lock().unwrap().push(events);
            StubActor {
                calls: self.calls.clone(),
            }
        }
    }

    fn credentials() -> Credentials {
        let (client, server) = identities();
        Credentials::new(client.clone(), server.certificate.clone())
    }

    fn runtime(with_credentials: bool) -> (DeviceHandle, Arc<Calls>, Arc<MemoryStore>) {
        let calls = Arc::new(Calls::default());
        let store = Arc::new(MemoryStore::new());
        let identity = DeviceIdentity::generate("TV", "10.0.0.2".parse().unwrap());
        let machine = DeviceMachine::new(
            MachineConfig::default(),
            Some(identity),
            with_credentials.then(credentials),
        );
        let (handle, _task) = DeviceRuntime::spawn(
            machine,
            StubPlatform {
                calls: calls.clone(),
            },
            store.clone(),
            Arc::new(NoopObserver),
        );
        (handle, calls, store)
    }

    fn sink(calls: &Calls, index: usize) -> EventSink {
        calls.sinks.lock().unwrap()[index].clone()
    }

    #[tokio::test]
    async fn test_pairing_stores_credentials() {
        let (handle, calls, store) = runtime(false);
        handle.start_pairing().await.unwrap();
        handle
            .wait_for(|s| s.state == MachineState::pairing(PairingStep::Connecting))
            .await
            .unwrap();

        let pairing = sink(&calls, 0);
        assert!(pairing.send(MachineEvent::PromptReceived).await);
        handle
            .wait_for(|s| s.state == MachineState::pairing(PairingStep::WaitingForUser))
            .await
            .unwrap();
        handle.submit_code("AB12CD").await.unwrap();
        handle
            .wait_for(|s| s.state == MachineState::pairing(PairingStep::Verifying))
            .await
            .unwrap();
        assert!(pairing.send(MachineEvent::Paired(credentials())).await);

        let snapshot = handle
            .wait_for(|s| s.state == MachineState::Disconnected)
            .await
            .unwrap();
        assert!(snapshot.has_credentials);
        let id = snapshot.identity.unwrap().id;
        assert!(store.record(&id).is_some());
        assert_eq!(calls.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_actor_events_are_dropped() {
        let (handle, calls, _store) = runtime(false);
        handle.start_pairing().await.unwrap();
        handle
            .wait_for(|s| s.state == MachineState::pairing(PairingStep::Connecting))
            .await
            .unwrap();
        let stale = sink(&calls, 0);
        assert!(stale.send(MachineEvent::PairingError("first".into())).await);
        handle
            .wait_for(|s| s.state == MachineState::pairing(PairingStep::Error))
            .await
            .unwrap();

        handle.start_pairing().await.unwrap();
        handle
            .wait_for(|s| s.state == MachineState::pairing(PairingStep::Connecting))
            .await
            .unwrap();
        assert_eq!(calls.pairings.load(Ordering::SeqCst), 2);

        // The replaced attempt can no longer fail the new one
        assert!(stale.send(MachineEvent::PairingError("stale".into())).await);
        assert!(sink(&calls, 1).send(MachineEvent::PromptReceived).await);

        let snapshot = handle
            .wait_for(|s| s.state == MachineState::pairing(PairingStep::WaitingForUser))
            .await
            .unwrap();
        assert_eq!(snapshot.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timer_reconnects() {
        let (handle, calls, _store) = runtime(true);
        handle.connect().await.unwrap();
        handle.wait_for(|s| s.state.matches("session")).await.unwrap();

        let session = sink(&calls, 0);
        assert!(session.send(MachineEvent::Connected).await);
        handle
            .wait_for(|s| s.state.matches("session.connection.connected"))
            .await
            .unwrap();

        assert!(session.send(MachineEvent::ConnectionLost("reset".into())).await);
        let snapshot = handle
            .wait_for(|s| s.state.matches("session.connection.retrying"))
            .await
            .unwrap();
        assert_eq!(snapshot.retry_count, 1);

        // The paused clock advances through the backoff on its own
        handle
            .wait_for(|s| s.state.matches("session.connection.connecting"))
            .await
            .unwrap();
        assert_eq!(calls.sessions.load(Ordering::SeqCst), 2);

        // The dead session can no longer report
        assert!(session.send(MachineEvent::Connected).await);
        let next = sink(&calls, 1);
        assert!(next.send(MachineEvent::ConnectionLost("again".into())).await);
        let snapshot = handle
            .wait_for(|s| s.state.matches("session.connection.retrying"))
            .await
            .unwrap();
        assert_eq!(snapshot.retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_heartbeat_check_counts_as_failure() {
        let (handle, calls, _store) = runtime(true);
        handle.connect().await.unwrap();
        handle.wait_for(|s| s.state.matches("session")).await.unwrap();
        assert!(sink(&calls, 0).send(MachineEvent::Connected).await);

        // Heartbeat timer fires, the stub refuses the check
        let snapshot = handle
            .wait_for(|s| s.state.matches("session.connection.retrying"))
            .await
            .unwrap();
        assert_eq!(snapshot.retry_count, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some("Session not ready"));
    }

    #[tokio::test]
    async fn test_keys_reach_the_session() {
        let (handle, calls, _store) = runtime(true);
        handle.connect().await.unwrap();
        handle.wait_for(|s| s.state.matches("session")).await.unwrap();
        assert!(sink(&calls, 0).send(MachineEvent::Connected).await);
        handle
            .wait_for(|s| s.state.matches("session.connection.connected"))
            .await
            .unwrap();

        handle.send_key("HOME").await.unwrap();
        handle.send_app_link("https://www.youtube.com").await.unwrap();
        handle.disconnect().await.unwrap();
        handle
            .wait_for(|s| s.state == MachineState::Disconnected)
            .await
            .unwrap();
        assert_eq!(*calls.keys.lock().unwrap(), vec!["HOME".to_string()]);
        assert_eq!(
            *calls.links.lock().unwrap(),
            vec!["https://www.youtube.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reset_to_setup_discards_identity() {
        let (handle, _calls, store) = runtime(true);
        let identity = handle.snapshot().identity.unwrap();
        store.identity_assigned(&identity).await.unwrap();
        store.store_credentials(&identity, &credentials()).await.unwrap();

        handle.reset_to_setup().await.unwrap();
        let snapshot = handle
            .wait_for(|s| s.state == MachineState::Setup)
            .await
            .unwrap();
        assert!(snapshot.identity.is_none());
        assert!(store.identity(&identity.id).is_none());
        assert!(store.record(&identity.id).is_none());
    }

    #[tokio::test]
    async fn test_forget_clears_store() {
        let (handle, _calls, store) = runtime(true);
        let id = handle.snapshot().identity.unwrap().id;
        store
            .store_credentials(&handle.snapshot().identity.unwrap(), &credentials())
            .await
            .unwrap();

        handle.forget().await.unwrap();
        let snapshot = handle
            .wait_for(|s| s.state == MachineState::pairing(PairingStep::Idle))
            .await
            .unwrap();
        assert!(!snapshot.has_credentials);
        assert!(store.record(&id).is_none());
    }

    #[tokio::test]
    async fn test_stops_when_handles_dropped() {
        let calls = Arc::new(Calls::default());
        let machine = DeviceMachine::new(MachineConfig::default(), None, None);
        let (handle, task) = DeviceRuntime::spawn(
            machine,
            StubPlatform {
                calls: calls.clone(),
            },
            Arc::new(MemoryStore::new()),
            Arc::new(NoopObserver),
        );
        drop(handle);
        task.await.unwrap();
    }
}
