//! Per-device lifecycle machine
//!
//! One pure transition function `(state, event) -> (state, effects)`. The
//! machine never performs I/O: spawning sessions, timers and persistence are
//! returned as [`Effect`]s for the runtime to carry out, which keeps every
//! transition deterministic and testable without sockets or clocks.
//!
//! ## Lifecycle
//!
//! ```text
//! setup -> pairing.{idle, active.*} -> disconnected -> session -> error
//!                                                       |
//!                               connection.{connecting, connected, retrying}
//!                               heartbeat.{waiting, idle, checking}
//! ```
//!
//! ## Retry Policy
//!
//! Every `CONNECTION_LOST` or `HEARTBEAT_FAILED` counts one failure. Below
//! `max_retries` the session waits `min(base * 2^retry_count, cap)` and
//! reconnects; reaching it moves to `error`. `CONNECTED` resets the count.

use super::events::{Effect, MachineEvent};
use super::state::{ConnectionPhase, HeartbeatPhase, MachineState, PairingStep};
use crate::remote::reconnect::backoff;
use crate::Credentials;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default failures tolerated before the machine gives up
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default initial retry delay
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Default retry delay ceiling
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(30);

/// Default interval between heartbeat checks
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Machine policy settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: DEFAULT_RETRY_BASE,
            retry_cap: DEFAULT_RETRY_CAP,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Who the device is; the id is assigned once when leaving setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
    pub ip: IpAddr,
}

impl DeviceIdentity {
    /// Identity with a freshly generated id
    pub fn generate(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            ip,
        }
    }
}

/// Immutable view of a machine for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSnapshot {
    pub identity: Option<DeviceIdentity>,
    pub state: MachineState,
    pub has_credentials: bool,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// Device lifecycle state machine
pub struct DeviceMachine {
    config: MachineConfig,
    state: MachineState,
    identity: Option<DeviceIdentity>,
    credentials: Option<Credentials>,
    retry_count: u32,
    last_error: Option<String>,
}

impl DeviceMachine {
    /// Create a machine from what storage knows about the device
    ///
    /// No identity starts in `setup` (any credentials are discarded),
    /// credentials start in `disconnected`, otherwise `pairing.idle`.
    pub fn new(
        config: MachineConfig,
        identity: Option<DeviceIdentity>,
        credentials: Option<Credentials>,
    ) -> Self {
        let (state, credentials) = match (&identity, credentials) {
            (None, _) => (MachineState::Setup, None),
            (Some(_), Some(credentials)) => (MachineState::Disconnected, Some(credentials)),
            (Some(_), None) => (MachineState::pairing(PairingStep::Idle), None),
        };

        Self {
            config,
            state,
            identity,
            credentials,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Guard for `CONNECT`: identity and credentials are both present
    pub fn can_connect(&self) -> bool {
        self.identity.is_some() && self.credentials.is_some()
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            identity: self.identity.clone(),
            state: self.state,
            has_credentials: self.credentials.is_some(),
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
        }
    }

    /// Apply one event; returns the effects the runtime must perform
    ///
    /// Events that do not apply to the current state are ignored.
    pub fn handle(&mut self, event: MachineEvent) -> Vec<Effect> {
        let name = event.name();
        let before = self.state;

        let effects = match event {
            MachineEvent::SetDeviceInfo { name: device_name, ip } => {
                self.set_device_info(&device_name, &ip)
            }
            MachineEvent::StartPairing => self.start_pairing(),
            MachineEvent::PromptReceived => self.prompt_received(),
            MachineEvent::SubmitCode(code) => self.submit_code(code),
            MachineEvent::Paired(credentials) => self.paired(credentials),
            MachineEvent::PairingError(message) => self.pairing_error(message),
            MachineEvent::Connect => self.connect(),
            MachineEvent::Connected => self.connected(),
            MachineEvent::ConnectionLost(error) | MachineEvent::HeartbeatFailed(error) => {
                self.failure(name, error)
            }
            MachineEvent::HeartbeatDue => self.heartbeat_due(),
            MachineEvent::HeartbeatOk => self.heartbeat_ok(),
            MachineEvent::RetryDue => self.retry_due(),
            MachineEvent::SendKey(key) => self.forward(name, Effect::SendKey(key)),
            MachineEvent::SendText(text) => self.forward(name, Effect::SendText(text)),
            MachineEvent::SendAppLink(link) => self.forward(name, Effect::SendAppLink(link)),
            MachineEvent::Disconnect => self.disconnect(),
            MachineEvent::Forget => self.forget(),
            MachineEvent::ResetToSetup => self.reset_to_setup(),
            MachineEvent::Cancel => self.cancel(),
        };

        if self.state != before {
            debug!(
                device_id = self.device_id(),
                "{}: {} -> {}",
                name,
                before,
                self.state
            );
        }
        effects
    }

    fn device_id(&self) -> &str {
        self.identity.as_ref().map_or("", |i| i.id.as_str())
    }

    fn ignore(&self, event: &str) -> Vec<Effect> {
        debug!(
            device_id = self.device_id(),
            "Ignoring {} in {}", event, self.state
        );
        Vec::new()
    }

    fn set_device_info(&mut self, name: &str, ip: &str) -> Vec<Effect> {
        if self.state != MachineState::Setup {
            return self.ignore("SET_DEVICE_INFO");
        }

        let name = name.trim();
        if name.is_empty() {
            self.last_error = Some("Device name is required".to_string());
            return Vec::new();
        }
        let Ok(ip) = ip.trim().parse::<IpAddr>() else {
            self.last_error = Some("Invalid IP address".to_string());
            return Vec::new();
        };

        let identity = DeviceIdentity::generate(name, ip);
        info!(device_id = %identity.id, %ip, "Device '{}' set up", name);

        self.identity = Some(identity.clone());
        self.last_error = None;
        self.state = MachineState::pairing(PairingStep::Connecting);
        vec![Effect::IdentityAssigned(identity), Effect::SpawnPairing { ip }]
    }

    fn start_pairing(&mut self) -> Vec<Effect> {
        let (MachineState::Pairing { step }, Some(identity)) = (self.state, &self.identity) else {
            return self.ignore("START_PAIRING");
        };
        let ip = identity.ip;

        let mut effects = Vec::new();
        if step.is_active() {
            effects.push(Effect::StopPairing);
        }
        effects.push(Effect::SpawnPairing { ip });

        self.last_error = None;
        self.state = MachineState::pairing(PairingStep::Connecting);
        effects
    }

    fn prompt_received(&mut self) -> Vec<Effect> {
        if self.state != MachineState::pairing(PairingStep::Connecting) {
            return self.ignore("PROMPT_RECEIVED");
        }
        self.state = MachineState::pairing(PairingStep::WaitingForUser);
        Vec::new()
    }

    fn submit_code(&mut self, code: String) -> Vec<Effect> {
        if self.state != MachineState::pairing(PairingStep::WaitingForUser) {
            return self.ignore("SUBMIT_CODE");
        }
        self.state = MachineState::pairing(PairingStep::Verifying);
        vec![Effect::SubmitCode(code)]
    }

    fn paired(&mut self, credentials: Credentials) -> Vec<Effect> {
        let active = self.state.pairing_step().is_some_and(|step| step.is_active());
        let Some(identity) = self.identity.clone().filter(|_| active) else {
            return self.ignore("PAIRED");
        };

        info!(
            device_id = %identity.id,
            "Paired, server fingerprint {}",
            credentials.server_fingerprint()
        );

        self.credentials = Some(credentials.clone());
        self.retry_count = 0;
        self.last_error = None;
        self.state = MachineState::Disconnected;
        vec![
            Effect::StopPairing,
            Effect::StoreCredentials {
                identity,
                credentials,
            },
        ]
    }

    fn pairing_error(&mut self, message: String) -> Vec<Effect> {
        if !self.state.pairing_step().is_some_and(|step| step.is_active()) {
            return self.ignore("PAIRING_ERROR");
        }
        warn!(device_id = self.device_id(), "Pairing failed: {}", message);

        self.last_error = Some(message);
        self.state = MachineState::pairing(PairingStep::Error);
        vec![Effect::StopPairing]
    }

    fn connect(&mut self) -> Vec<Effect> {
        if !matches!(self.state, MachineState::Disconnected | MachineState::Error) {
            return self.ignore("CONNECT");
        }
        let (Some(identity), Some(credentials)) = (&self.identity, &self.credentials) else {
            warn!(
                device_id = self.device_id(),
                "CONNECT without credentials; callers must check can_connect()"
            );
            return Vec::new();
        };
        let effect = Effect::SpawnSession {
            ip: identity.ip,
            credentials: credentials.clone(),
        };

        self.retry_count = 0;
        self.last_error = None;
        self.state = MachineState::connecting();
        vec![effect]
    }

    fn connected(&mut self) -> Vec<Effect> {
        let MachineState::Session { connection, .. } = self.state else {
            return self.ignore("CONNECTED");
        };
        if connection == ConnectionPhase::Connected {
            self.retry_count = 0;
            return Vec::new();
        }

        info!(device_id = self.device_id(), "Session connected");
        self.retry_count = 0;
        self.last_error = None;
        self.state = MachineState::Session {
            connection: ConnectionPhase::Connected,
            heartbeat: HeartbeatPhase::Idle,
        };
        vec![Effect::StartHeartbeatTimer(self.config.heartbeat_interval)]
    }

    fn failure(&mut self, event: &str, error: String) -> Vec<Effect> {
        if !self.state.matches("session") {
            return self.ignore(event);
        }

        self.retry_count += 1;
        self.last_error = Some(error);

        if self.retry_count >= self.config.max_retries {
            warn!(
                device_id = self.device_id(),
                "Giving up after {} failures: {}",
                self.retry_count,
                self.last_error.as_deref().unwrap_or_default()
            );
            self.state = MachineState::Error;
            return vec![
                Effect::StopSession,
                Effect::CancelHeartbeatTimer,
                Effect::CancelRetryTimer,
            ];
        }

        let delay = backoff(
            self.config.retry_base,
            self.config.retry_cap,
            self.retry_count,
        );
        info!(
            device_id = self.device_id(),
            "{} ({}/{}), retrying in {:?}",
            event,
            self.retry_count,
            self.config.max_retries,
            delay
        );

        self.state = MachineState::Session {
            connection: ConnectionPhase::Retrying,
            heartbeat: HeartbeatPhase::Waiting,
        };
        vec![
            Effect::StopSession,
            Effect::CancelHeartbeatTimer,
            Effect::StartRetryTimer(delay),
        ]
    }

    fn heartbeat_due(&mut self) -> Vec<Effect> {
        let MachineState::Session {
            connection: ConnectionPhase::Connected,
            heartbeat: HeartbeatPhase::Idle,
        } = self.state
        else {
            return self.ignore("HEARTBEAT_DUE");
        };

        self.state = MachineState::Session {
            connection: ConnectionPhase::Connected,
            heartbeat: HeartbeatPhase::Checking,
        };
        vec![Effect::CheckHeartbeat]
    }

    fn heartbeat_ok(&mut self) -> Vec<Effect> {
        let MachineState::Session {
            connection: ConnectionPhase::Connected,
            heartbeat: HeartbeatPhase::Checking,
        } = self.state
        else {
            return self.ignore("HEARTBEAT_OK");
        };

        self.state = MachineState::Session {
            connection: ConnectionPhase::Connected,
            heartbeat: HeartbeatPhase::Idle,
        };
        vec![Effect::StartHeartbeatTimer(self.config.heartbeat_interval)]
    }

    fn retry_due(&mut self) -> Vec<Effect> {
        if self.state.connection() != Some(ConnectionPhase::Retrying) {
            return self.ignore("RETRY_DUE");
        }
        let (Some(identity), Some(credentials)) = (&self.identity, &self.credentials) else {
            return self.ignore("RETRY_DUE");
        };
        let effect = Effect::SpawnSession {
            ip: identity.ip,
            credentials: credentials.clone(),
        };

        self.state = MachineState::connecting();
        vec![effect]
    }

    fn forward(&self, event: &str, effect: Effect) -> Vec<Effect> {
        if self.state.connection() != Some(ConnectionPhase::Connected) {
            return self.ignore(event);
        }
        vec![effect]
    }

    fn disconnect(&mut self) -> Vec<Effect> {
        if !matches!(self.state, MachineState::Session { .. } | MachineState::Error) {
            return self.ignore("DISCONNECT");
        }

        self.retry_count = 0;
        self.last_error = None;
        self.state = MachineState::Disconnected;
        vec![
            Effect::StopSession,
            Effect::CancelRetryTimer,
            Effect::CancelHeartbeatTimer,
        ]
    }

    fn forget(&mut self) -> Vec<Effect> {
        if !matches!(
            self.state,
            MachineState::Disconnected | MachineState::Session { .. } | MachineState::Error
        ) {
            return self.ignore("FORGET");
        }

        let mut effects = vec![
            Effect::StopSession,
            Effect::CancelRetryTimer,
            Effect::CancelHeartbeatTimer,
        ];
        if let Some(identity) = &self.identity {
            info!(device_id = %identity.id, "Forgetting credentials");
            effects.push(Effect::ClearCredentials {
                identity: identity.clone(),
            });
        }

        self.credentials = None;
        self.retry_count = 0;
        self.last_error = None;
        self.state = MachineState::pairing(PairingStep::Idle);
        effects
    }

    fn reset_to_setup(&mut self) -> Vec<Effect> {
        let resettable = matches!(
            self.state,
            MachineState::Pairing { .. } | MachineState::Disconnected | MachineState::Error
        );
        if !resettable {
            return self.ignore("RESET_TO_SETUP");
        }

        let mut effects = Vec::new();
        if self.state.pairing_step().is_some_and(|step| step.is_active()) {
            effects.push(Effect::StopPairing);
        }
        if let Some(identity) = &self.identity {
            info!(device_id = %identity.id, "Discarding identity");
            effects.push(Effect::DiscardIdentity {
                identity: identity.clone(),
            });
        }

        self.identity = None;
        self.credentials = None;
        self.retry_count = 0;
        self.last_error = None;
        self.state = MachineState::Setup;
        effects
    }

    fn cancel(&mut self) -> Vec<Effect> {
        if self.state != MachineState::Setup {
            return self.ignore("CANCEL");
        }
        self.state = MachineState::Cancelled;
        Vec::new()
    }
}
