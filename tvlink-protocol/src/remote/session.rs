//! Remote control session actor
//!
//! ## Lifecycle
//!
//! 1. Connect with the paired client certificate
//! 2. Wait for the TV's `REMOTE_CONFIGURE` and answer with ours; only then is
//!    the session ready for commands
//! 3. Answer pings, follow IME counters, report power/app/volume changes
//! 4. On close: reset ready flag, IME counters and ping timer, then reconnect
//!    with backoff if the session had been ready and was not disposed
//!
//! Commands are validated against the ready flag on the caller's side and
//! written by the session task.

use super::events::RemoteEvent;
use super::reconnect::{
    ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_CAP,
};
use crate::codec::Envelope;
use crate::messages::remote::{
    RemoteAppLinkLaunchRequest, RemoteConfigure, RemoteDeviceInfo, RemotePingResponse,
    RemoteSetActive,
};
use crate::messages::{KeyDirection, RemoteKey, RemoteMessage};
use crate::observer::{ErrorContext, Observer};
use crate::transport::{connect_tls, MessageStream};
use crate::{Credentials, ProtocolError, Result, REMOTE_PORT};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default ping interval
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Inbound silence tolerated before a heartbeat check fails
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(20);

/// Default connect and configure timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Feature mask announced in our configure and set-active replies
pub const DEFAULT_FEATURE_MASK: i32 = 622;

/// Queued commands per session
const COMMAND_QUEUE: usize = 32;

/// Remote session configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// TLS port of the remote service
    pub port: u16,
    /// Proactive ping interval
    pub ping_interval: Duration,
    /// Heartbeat liveness window
    pub liveness_window: Duration,
    /// Initial reconnect delay
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling
    pub reconnect_cap: Duration,
    /// Reconnect attempts before giving up (0 disables reconnect)
    pub max_reconnect_attempts: u32,
    /// Timeout for connecting and for the configure exchange
    pub connect_timeout: Duration,
    /// Feature mask sent in configure and set-active
    pub feature_mask: i32,
    pub model: String,
    pub vendor: String,
    pub package_name: String,
    pub app_version: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            port: REMOTE_PORT,
            ping_interval: DEFAULT_PING_INTERVAL,
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_cap: DEFAULT_RECONNECT_CAP,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            feature_mask: DEFAULT_FEATURE_MASK,
            model: "tvlink".to_string(),
            vendor: "tvlink".to_string(),
            package_name: "tvlink".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RemoteConfig {
    fn configure_message(&self) -> RemoteMessage {
        RemoteMessage::Configure(RemoteConfigure {
            code1: self.feature_mask,
            device_info: Some(RemoteDeviceInfo {
                model: self.model.clone(),
                vendor: self.vendor.clone(),
                unknown1: 1,
                unknown2: "1".to_string(),
                package_name: self.package_name.clone(),
                app_version: self.app_version.clone(),
            }),
        })
    }
}

/// Produces a fresh transport for each (re)connect
pub type Connector<S> = Box<dyn Fn() -> BoxFuture<'static, Result<S>> + Send + Sync>;

#[derive(Debug)]
enum Command {
    Key(RemoteKey, KeyDirection),
    Text(String),
    AppLink(String),
    CheckHeartbeat,
}

/// IME counters echoed by the TV
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImeState {
    pub ime_counter: i32,
    pub field_counter: i32,
}

/// Messages that type `text` with the given IME counters
///
/// `"\n"` and `"\b"` become ENTER and DEL key presses; runs of other
/// characters become insert-text edits.
pub fn text_messages(text: &str, ime: ImeState) -> Vec<RemoteMessage> {
    let mut messages = Vec::new();
    let mut run = String::new();

    for ch in text.chars() {
        let key = match ch {
            '\n' => Some(RemoteKey::Enter),
            '\u{8}' => Some(RemoteKey::Del),
            _ => None,
        };
        match key {
            Some(key) => {
                if !run.is_empty() {
                    messages.push(RemoteMessage::insert_text(
                        &run,
                        ime.ime_counter,
                        ime.field_counter,
                    ));
                    run.clear();
                }
                messages.push(RemoteMessage::key(key, KeyDirection::Short));
            }
            None => run.push(ch),
        }
    }
    if !run.is_empty() {
        messages.push(RemoteMessage::insert_text(
            &run,
            ime.ime_counter,
            ime.field_counter,
        ));
    }
    messages
}

/// Handle to a running remote session
///
/// Dropping the handle disposes the session.
pub struct RemoteSession {
    commands: mpsc::Sender<Command>,
    ready: watch::Receiver<bool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RemoteSession {
    /// Connect to the TV at `ip` with paired credentials
    pub fn spawn(
        ip: IpAddr,
        credentials: &Credentials,
        config: RemoteConfig,
        events: mpsc::Sender<RemoteEvent>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        let addr = SocketAddr::new(ip, config.port);
        let identity = credentials.client_identity();
        let connect_timeout = config.connect_timeout;

        let connector: Connector<_> = Box::new(move || {
            let identity = identity.clone();
            async move {
                let (stream, _server_certificate) =
                    connect_tls(addr, &identity, connect_timeout).await?;
                Ok(stream)
            }
            .boxed()
        });

        Self::with_connector(ip.to_string(), connector, config, events, observer)
    }

    /// Run over transports produced by `connector`
    pub fn with_connector<S>(
        peer: impl Into<String>,
        connector: Connector<S>,
        config: RemoteConfig,
        events: mpsc::Sender<RemoteEvent>,
        observer: Arc<dyn Observer>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (ready_tx, ready) = watch::channel(false);
        let cancel = CancellationToken::new();

        let worker = Worker {
            peer: peer.into(),
            policy: ReconnectPolicy::new(
                config.reconnect_base,
                config.reconnect_cap,
                config.max_reconnect_attempts,
            ),
            config,
            connector,
            commands: command_rx,
            ready: ready_tx,
            events,
            observer,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            commands,
            ready,
            cancel,
            task,
        }
    }

    /// Whether the configure exchange has completed on the live connection
    pub fn is_ready(&self) -> bool {
        !self.is_disposed() && *self.ready.borrow()
    }

    /// Inject a key press
    pub fn send_key(&self, key: RemoteKey, direction: KeyDirection) -> Result<()> {
        self.ensure_ready()?;
        self.enqueue(Command::Key(key, direction))
    }

    /// Type text into the focused field
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.ensure_ready()?;
        self.enqueue(Command::Text(text.into()))
    }

    /// Open a deep link on the TV
    pub fn send_app_link(&self, link: impl Into<String>) -> Result<()> {
        self.ensure_ready()?;
        self.enqueue(Command::AppLink(link.into()))
    }

    /// Ask for a heartbeat verdict, reported as an event
    pub fn check_heartbeat(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ProtocolError::Disposed);
        }
        self.enqueue(Command::CheckHeartbeat)
    }

    /// Stop timers, close the socket; idempotent
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Disposing remote session");
        }
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ProtocolError::Disposed)
        } else if !*self.ready.borrow() {
            Err(ProtocolError::NotReady)
        } else {
            Ok(())
        }
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ProtocolError::InvalidMessage("Remote command queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => ProtocolError::Disposed,
        })
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Per-connection state, dropped on every close
struct Connection {
    ready: bool,
    ime: ImeState,
    last_inbound: Instant,
    last_ping: i32,
    power: Option<bool>,
    app: Option<String>,
}

impl Connection {
    fn new() -> Self {
        Self {
            ready: false,
            ime: ImeState::default(),
            last_inbound: Instant::now(),
            last_ping: 0,
            power: None,
            app: None,
        }
    }
}

struct Worker<S> {
    peer: String,
    config: RemoteConfig,
    policy: ReconnectPolicy,
    connector: Connector<S>,
    commands: mpsc::Receiver<Command>,
    ready: watch::Sender<bool>,
    events: mpsc::Sender<RemoteEvent>,
    observer: Arc<dyn Observer>,
    cancel: CancellationToken,
}

impl<S> Worker<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut reconnecting = false;

        loop {
            let mut was_ready = false;
            let error = tokio::select! {
                _ = cancel.cancelled() => return,
                error = self.connect_and_serve(&mut was_ready) => error,
            };

            self.ready.send_replace(false);
            // Commands queued for the dead connection are stale
            while self.commands.try_recv().is_ok() {}

            if cancel.is_cancelled() {
                return;
            }

            if was_ready {
                reconnecting = true;
            }
            let delay = if reconnecting {
                self.policy.next_delay()
            } else {
                None
            };

            let phase = if was_ready {
                "session.connected"
            } else {
                "session.connecting"
            };
            self.observer
                .on_error(&ErrorContext::new(self.peer.clone(), phase), &error);
            self.emit(RemoteEvent::Closed {
                error: Some(error.to_string()),
                will_reconnect: delay.is_some(),
            })
            .await;

            let Some(delay) = delay else {
                if reconnecting {
                    warn!(ip = %self.peer, "Giving up reconnecting: {}", self.policy.status());
                    self.observer.on_error(
                        &ErrorContext::new(self.peer.clone(), "session.reconnecting"),
                        &ProtocolError::ExhaustedRetries(self.policy.attempts),
                    );
                }
                return;
            };

            info!(ip = %self.peer, "Reconnecting in {:?} ({})", delay, self.policy.status());
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }
    }

    /// Serve one connection until it fails; always returns the reason
    async fn connect_and_serve(&mut self, was_ready: &mut bool) -> ProtocolError {
        let stream = match tokio::time::timeout(self.config.connect_timeout, (self.connector)()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return e,
            Err(_) => return ProtocolError::Timeout("remote connection".to_string()),
        };

        let mut messages = MessageStream::new(stream, self.observer.clone());
        let mut connection = Connection::new();
        let configure_deadline = Instant::now() + self.config.connect_timeout;
        let mut ping = interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let error = loop {
            tokio::select! {
                received = messages.recv() => {
                    let envelope = match received {
                        Ok(envelope) => envelope,
                        Err(e @ (ProtocolError::InvalidMessage(_) | ProtocolError::Decode(_))) => {
                            warn!(ip = %self.peer, "Dropping malformed frame: {}", e);
                            continue;
                        }
                        Err(e) => break e,
                    };
                    connection.last_inbound = Instant::now();
                    if let Err(e) = self.on_message(&envelope, &mut messages, &mut connection).await {
                        break e;
                    }
                    if connection.ready && !*was_ready {
                        *was_ready = true;
                        self.policy.reset();
                        self.ready.send_replace(true);
                        info!(ip = %self.peer, "Remote session ready");
                        self.emit(RemoteEvent::Ready).await;
                    }
                }
                Some(command) = self.commands.recv() => {
                    if let Err(e) = self.on_command(command, &mut messages, &connection).await {
                        break e;
                    }
                }
                _ = ping.tick(), if connection.ready => {
                    let keepalive = RemoteMessage::PingResponse(RemotePingResponse { val1: connection.last_ping });
                    if let Err(e) = messages.send(&keepalive.to_envelope()).await {
                        break e;
                    }
                }
                _ = sleep_until(configure_deadline), if !connection.ready => {
                    break ProtocolError::Timeout("remote configure".to_string());
                }
            }
        };

        messages.shutdown().await;
        error
    }

    async fn on_message(
        &self,
        envelope: &Envelope,
        messages: &mut MessageStream<S>,
        connection: &mut Connection,
    ) -> Result<()> {
        let message = match RemoteMessage::from_envelope(envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(ip = %self.peer, "Dropping undecodable remote message {}: {}", envelope.message_type, e);
                return Ok(());
            }
        };

        match message {
            RemoteMessage::Configure(configure) => {
                debug!(
                    ip = %self.peer,
                    "TV configure: {:?}",
                    configure.device_info.as_ref().map(|d| (&d.vendor, &d.model))
                );
                messages
                    .send(&self.config.configure_message().to_envelope())
                    .await?;
                connection.ready = true;
            }
            RemoteMessage::SetActive(_) => {
                let reply = RemoteMessage::SetActive(RemoteSetActive {
                    active: self.config.feature_mask,
                });
                messages.send(&reply.to_envelope()).await?;
            }
            RemoteMessage::PingRequest(ping) => {
                connection.last_ping = ping.val1;
                let reply = RemoteMessage::PingResponse(RemotePingResponse { val1: ping.val1 });
                messages.send(&reply.to_envelope()).await?;
            }
            RemoteMessage::ImeBatchEdit(edit) => {
                connection.ime = ImeState {
                    ime_counter: edit.ime_counter,
                    field_counter: edit.field_counter,
                };
            }
            RemoteMessage::ImeKeyInject(inject) => {
                if let Some(field) = &inject.text_field_status {
                    connection.ime.field_counter = field.counter_field;
                }
                if let Some(app) = inject.app_info.map(|a| a.app_package) {
                    if !app.is_empty() && connection.app.as_deref() != Some(app.as_str()) {
                        connection.app = Some(app.clone());
                        self.emit(RemoteEvent::CurrentApp(app)).await;
                    }
                }
            }
            RemoteMessage::Start(start) => {
                if connection.power != Some(start.started) {
                    connection.power = Some(start.started);
                    self.emit(RemoteEvent::PowerChanged(start.started)).await;
                }
            }
            RemoteMessage::SetVolumeLevel(volume) => {
                self.emit(RemoteEvent::VolumeChanged {
                    level: volume.volume_level,
                    max: volume.volume_max,
                    muted: volume.volume_muted,
                })
                .await;
            }
            RemoteMessage::Error(error) => {
                warn!(ip = %self.peer, "TV reported an error (value={})", error.value);
            }
            RemoteMessage::PingResponse(_)
            | RemoteMessage::KeyInject(_)
            | RemoteMessage::AppLinkLaunch(_) => {}
            RemoteMessage::Unhandled(message_type) => {
                debug!(ip = %self.peer, "Ignoring remote message type {}", message_type);
            }
        }
        Ok(())
    }

    async fn on_command(
        &self,
        command: Command,
        messages: &mut MessageStream<S>,
        connection: &Connection,
    ) -> Result<()> {
        if let Command::CheckHeartbeat = command {
            let silent = connection.last_inbound.elapsed();
            let event = if connection.ready && silent <= self.config.liveness_window {
                RemoteEvent::HeartbeatOk
            } else if connection.ready {
                RemoteEvent::HeartbeatFailed(format!("No traffic for {}s", silent.as_secs()))
            } else {
                RemoteEvent::HeartbeatFailed("Session not ready".to_string())
            };
            self.emit(event).await;
            return Ok(());
        }

        if !connection.ready {
            debug!(ip = %self.peer, "Dropping {:?}: session not ready", command);
            return Ok(());
        }

        let outgoing = match command {
            Command::Key(key, direction) => {
                debug!(ip = %self.peer, "Sending key {}", key);
                vec![RemoteMessage::key(key, direction)]
            }
            Command::Text(text) => text_messages(&text, connection.ime),
            Command::AppLink(link) => vec![RemoteMessage::AppLinkLaunch(
                RemoteAppLinkLaunchRequest { app_link: link },
            )],
            Command::CheckHeartbeat => Vec::new(),
        };
        for message in outgoing {
            messages.send(&message.to_envelope()).await?;
        }
        Ok(())
    }

    async fn emit(&self, event: RemoteEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.events.send(event).await.is_err() {
            debug!(ip = %self.peer, "Remote event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use crate::messages::remote::{
        message_type, RemoteAppInfo, RemoteImeBatchEdit, RemoteImeKeyInject, RemotePingRequest,
        RemoteSetVolumeLevel, RemoteStart, RemoteTextFieldStatus,
    };
    use crate::observer::NoopObserver;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    type Tv = MessageStream<DuplexStream>;

    /// Connector handing out queued duplex streams, failing once empty
    fn connector(count: usize) -> (Connector<DuplexStream>, Vec<Tv>) {
        let mut queue = VecDeque::new();
        let mut tvs = Vec::new();
        for _ in 0..count {
            let (client, tv) = duplex(8192);
            queue.push_back(client);
            tvs.push(MessageStream::new(tv, Arc::new(NoopObserver) as Arc<dyn Observer>));
        }
        let queue = Arc::new(Mutex::new(queue));
        let connector: Connector<DuplexStream> = Box::new(move || {
            let next = queue.lock().unwrap().pop_front();
            async move {
                next.ok_or_else(|| ProtocolError::ConnectionClosed("refused".to_string()))
            }
            .boxed()
        });
        (connector, tvs)
    }

    fn session(
        connector: Connector<DuplexStream>,
        config: RemoteConfig,
    ) -> (RemoteSession, mpsc::Receiver<RemoteEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let session =
            RemoteSession::with_connector("tv", connector, config, tx, Arc::new(NoopObserver));
        (session, rx)
    }

    /// Next frame from the client that is not a proactive ping
    async fn next(tv: &mut Tv) -> RemoteMessage {
        loop {
            let message = RemoteMessage::from_envelope(&tv.recv().await.unwrap()).unwrap();
            if !matches!(message, RemoteMessage::PingResponse(_)) {
                return message;
            }
        }
    }

    async fn configure(tv: &mut Tv, events: &mut mpsc::Receiver<RemoteEvent>) {
        tv.send(&RemoteConfig::default().configure_message().to_envelope())
            .await
            .unwrap();
        match next(tv).await {
            RemoteMessage::Configure(ours) => assert_eq!(ours.code1, DEFAULT_FEATURE_MASK),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events.recv().await, Some(RemoteEvent::Ready));
    }

    /// Round trip a ping so everything sent before it has been processed
    async fn sync(tv: &mut Tv, val: i32) {
        tv.send(&RemoteMessage::PingRequest(RemotePingRequest { val1: val, val2: 0 }).to_envelope())
            .await
            .unwrap();
        loop {
            let message = RemoteMessage::from_envelope(&tv.recv().await.unwrap()).unwrap();
            if message == RemoteMessage::PingResponse(RemotePingResponse { val1: val }) {
                return;
            }
        }
    }

    #[test]
    fn test_text_mapping() {
        let ime = ImeState {
            ime_counter: 3,
            field_counter: 4,
        };
        assert_eq!(
            text_messages("\n", ime),
            vec![RemoteMessage::key(RemoteKey::Enter, KeyDirection::Short)]
        );
        assert_eq!(
            text_messages("\u{8}", ime),
            vec![RemoteMessage::key(RemoteKey::Del, KeyDirection::Short)]
        );
        assert_eq!(
            text_messages("hi\n", ime),
            vec![
                RemoteMessage::insert_text("hi", 3, 4),
                RemoteMessage::key(RemoteKey::Enter, KeyDirection::Short)
            ]
        );
        assert!(text_messages("", ime).is_empty());
    }

    #[tokio::test]
    async fn test_ready_only_after_configure() {
        let (connector, mut tvs) = connector(1);
        let (session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);

        assert!(matches!(
            session.send_key(RemoteKey::Home, KeyDirection::Short),
            Err(ProtocolError::NotReady)
        ));

        configure(&mut tv, &mut events).await;
        assert!(session.is_ready());

        session.send_key(RemoteKey::Home, KeyDirection::Short).unwrap();
        match next(&mut tv).await {
            RemoteMessage::KeyInject(key) => {
                assert_eq!(key.key_code, 3);
                assert_eq!(key.direction, KeyDirection::Short as i32);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_answers_ping_and_set_active() {
        let (connector, mut tvs) = connector(1);
        let (_session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;

        tv.send(&RemoteMessage::SetActive(RemoteSetActive { active: 1 }).to_envelope())
            .await
            .unwrap();
        assert_eq!(
            next(&mut tv).await,
            RemoteMessage::SetActive(RemoteSetActive {
                active: DEFAULT_FEATURE_MASK
            })
        );
        sync(&mut tv, 42).await;
    }

    #[tokio::test]
    async fn test_text_replays_ime_counters() {
        let (connector, mut tvs) = connector(1);
        let (session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;

        let edit = RemoteImeBatchEdit {
            ime_counter: 5,
            field_counter: 7,
            edit_info: Vec::new(),
        };
        tv.send(&RemoteMessage::ImeBatchEdit(edit).to_envelope())
            .await
            .unwrap();
        sync(&mut tv, 1).await;

        session.send_text("hello").unwrap();
        assert_eq!(next(&mut tv).await, RemoteMessage::insert_text("hello", 5, 7));

        session.send_text("\n").unwrap();
        assert_eq!(
            next(&mut tv).await,
            RemoteMessage::key(RemoteKey::Enter, KeyDirection::Short)
        );
    }

    #[tokio::test]
    async fn test_reports_power_state() {
        let (connector, mut tvs) = connector(1);
        let (_session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;

        for started in [true, true, false] {
            tv.send(&RemoteMessage::Start(RemoteStart { started }).to_envelope())
                .await
                .unwrap();
        }
        assert_eq!(events.recv().await, Some(RemoteEvent::PowerChanged(true)));
        assert_eq!(events.recv().await, Some(RemoteEvent::PowerChanged(false)));
    }

    #[tokio::test]
    async fn test_reports_current_app_and_field_counter() {
        let (connector, mut tvs) = connector(1);
        let (session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;

        tv.send(
            &RemoteMessage::ImeBatchEdit(RemoteImeBatchEdit {
                ime_counter: 2,
                field_counter: 3,
                edit_info: Vec::new(),
            })
            .to_envelope(),
        )
        .await
        .unwrap();

        let inject = RemoteImeKeyInject {
            app_info: Some(RemoteAppInfo {
                counter: 1,
                label: String::new(),
                app_package: "com.google.android.youtube.tv".to_string(),
            }),
            text_field_status: Some(RemoteTextFieldStatus {
                counter_field: 9,
                value: String::new(),
                start: 0,
                end: 0,
                label: "Search".to_string(),
            }),
        };
        // The same app twice is reported once
        for _ in 0..2 {
            tv.send(&RemoteMessage::ImeKeyInject(inject.clone()).to_envelope())
                .await
                .unwrap();
        }
        sync(&mut tv, 3).await;

        assert_eq!(
            events.recv().await,
            Some(RemoteEvent::CurrentApp(
                "com.google.android.youtube.tv".to_string()
            ))
        );
        assert!(events.try_recv().is_err());

        session.send_text("cats").unwrap();
        assert_eq!(next(&mut tv).await, RemoteMessage::insert_text("cats", 2, 9));
    }

    #[tokio::test]
    async fn test_reports_volume() {
        let (connector, mut tvs) = connector(1);
        let (_session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;

        let volume = RemoteSetVolumeLevel {
            player_model: "tv".to_string(),
            volume_max: 100,
            volume_level: 12,
            volume_muted: true,
        };
        tv.send(&RemoteMessage::SetVolumeLevel(volume).to_envelope())
            .await
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(RemoteEvent::VolumeChanged {
                level: 12,
                max: 100,
                muted: true
            })
        );
    }

    #[tokio::test]
    async fn test_app_link_frame() {
        let (connector, mut tvs) = connector(1);
        let (session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);

        assert!(matches!(
            session.send_app_link("https://www.netflix.com/title/80057281"),
            Err(ProtocolError::NotReady)
        ));
        configure(&mut tv, &mut events).await;

        session
            .send_app_link("https://www.netflix.com/title/80057281")
            .unwrap();
        let envelope = loop {
            let envelope = tv.recv().await.unwrap();
            if envelope.message_type != message_type::PING_RESPONSE {
                break envelope;
            }
        };
        assert_eq!(envelope.message_type, message_type::APP_LINK_LAUNCH);
        assert_eq!(envelope.message_type, 90);
        match RemoteMessage::from_envelope(&envelope).unwrap() {
            RemoteMessage::AppLinkLaunch(request) => {
                assert_eq!(request.app_link, "https://www.netflix.com/title/80057281")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_envelope_keeps_session_ready() {
        let (connector, mut tvs) = connector(1);
        let (session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;

        // Well framed, but a varint inside runs past 32 bits
        let mut raw = tv.into_inner();
        raw.write_all(&encode_frame(&[0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]))
            .await
            .unwrap();
        let mut tv = MessageStream::new(raw, Arc::new(NoopObserver) as Arc<dyn Observer>);

        sync(&mut tv, 11).await;
        assert!(session.is_ready());
        assert!(events.try_recv().is_err());

        session.send_key(RemoteKey::Back, KeyDirection::Short).unwrap();
        assert!(matches!(next(&mut tv).await, RemoteMessage::KeyInject(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_ready_close() {
        let (connector, mut tvs) = connector(2);
        let (session, mut events) = session(connector, RemoteConfig::default());
        let mut second = tvs.pop().unwrap();
        let mut first = tvs.pop().unwrap();

        configure(&mut first, &mut events).await;
        drop(first);

        match events.recv().await {
            Some(RemoteEvent::Closed { will_reconnect, .. }) => assert!(will_reconnect),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!session.is_ready());

        configure(&mut second, &mut events).await;
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_no_reconnect_before_ready() {
        let (connector, _tvs) = connector(0);
        let (_session, mut events) = session(connector, RemoteConfig::default());

        match events.recv().await {
            Some(RemoteEvent::Closed {
                error,
                will_reconnect,
            }) => {
                assert!(!will_reconnect);
                assert!(error.unwrap().contains("refused"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (connector, mut tvs) = connector(1);
        let config = RemoteConfig {
            max_reconnect_attempts: 2,
            ..RemoteConfig::default()
        };
        let (_session, mut events) = session(connector, config);
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;
        drop(tv);

        let mut flags = Vec::new();
        while let Some(event) = events.recv().await {
            if let RemoteEvent::Closed { will_reconnect, .. } = event {
                flags.push(will_reconnect);
            }
        }
        assert_eq!(flags, vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_uses_liveness_window() {
        let (connector, mut tvs) = connector(1);
        let (session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;

        session.check_heartbeat().unwrap();
        assert_eq!(events.recv().await, Some(RemoteEvent::HeartbeatOk));

        tokio::time::advance(DEFAULT_LIVENESS_WINDOW + Duration::from_secs(1)).await;
        session.check_heartbeat().unwrap();
        assert!(matches!(
            events.recv().await,
            Some(RemoteEvent::HeartbeatFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let (connector, mut tvs) = connector(1);
        let (session, mut events) = session(connector, RemoteConfig::default());
        let mut tv = tvs.remove(0);
        configure(&mut tv, &mut events).await;

        session.dispose();
        session.dispose();
        assert!(!session.is_ready());
        assert!(matches!(
            session.send_text("x"),
            Err(ProtocolError::Disposed)
        ));
        assert!(events.recv().await.is_none());
    }

    #[test]
    fn test_configure_message_shape() {
        let envelope = RemoteConfig::default().configure_message().to_envelope();
        assert_eq!(envelope.message_type, message_type::CONFIGURE);
    }
}
