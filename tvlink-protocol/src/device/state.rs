//! Device lifecycle states
//!
//! The lifecycle is a tagged union rather than a flat string: pairing has its
//! own sub-steps and a live session carries two orthogonal regions, the
//! connection and the heartbeat.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pairing sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairingStep {
    /// Waiting for `START_PAIRING`
    Idle,
    /// Handshake running, no code shown yet
    Connecting,
    /// The TV shows a code and the user must type it
    WaitingForUser,
    /// Code submitted, waiting for the TV's verdict
    Verifying,
    /// The handshake failed; only `START_PAIRING` leaves
    Error,
}

impl PairingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingStep::Idle => "idle",
            PairingStep::Connecting => "connecting",
            PairingStep::WaitingForUser => "waitingForUser",
            PairingStep::Verifying => "verifying",
            PairingStep::Error => "error",
        }
    }

    /// A pairing session is running in this step
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PairingStep::Connecting | PairingStep::WaitingForUser | PairingStep::Verifying
        )
    }
}

/// Connection region of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Connected,
    Retrying,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Retrying => "retrying",
        }
    }
}

/// Heartbeat region of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatPhase {
    /// Until the connection is up
    Waiting,
    /// Interval timer running
    Idle,
    /// A liveness check is outstanding
    Checking,
}

impl HeartbeatPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatPhase::Waiting => "waiting",
            HeartbeatPhase::Idle => "idle",
            HeartbeatPhase::Checking => "checking",
        }
    }
}

/// Top-level device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum MachineState {
    /// No identity yet
    Setup,
    Pairing { step: PairingStep },
    /// Paired, no session
    Disconnected,
    Session {
        connection: ConnectionPhase,
        heartbeat: HeartbeatPhase,
    },
    /// Retries exhausted
    Error,
    /// Setup abandoned; final
    Cancelled,
}

impl MachineState {
    pub fn pairing(step: PairingStep) -> Self {
        MachineState::Pairing { step }
    }

    /// Fresh session: connecting, heartbeat waiting
    pub fn connecting() -> Self {
        MachineState::Session {
            connection: ConnectionPhase::Connecting,
            heartbeat: HeartbeatPhase::Waiting,
        }
    }

    /// Dotted state path, e.g. `pairing.active.waitingForUser`
    ///
    /// Session states list both regions separated by a comma:
    /// `session.connection.connected,session.heartbeat.idle`.
    pub fn path(&self) -> String {
        match self {
            MachineState::Setup => "setup".to_string(),
            MachineState::Pairing {
                step: PairingStep::Idle,
            } => "pairing.idle".to_string(),
            MachineState::Pairing { step } => format!("pairing.active.{}", step.as_str()),
            MachineState::Disconnected => "disconnected".to_string(),
            MachineState::Session {
                connection,
                heartbeat,
            } => format!(
                "session.connection.{},session.heartbeat.{}",
                connection.as_str(),
                heartbeat.as_str()
            ),
            MachineState::Error => "error".to_string(),
            MachineState::Cancelled => "cancelled".to_string(),
        }
    }

    /// Whether the state is `prefix` or nested below it
    ///
    /// ```
    /// use tvlink_protocol::device::{MachineState, PairingStep};
    ///
    /// let state = MachineState::pairing(PairingStep::Verifying);
    /// assert!(state.matches("pairing"));
    /// assert!(state.matches("pairing.active"));
    /// assert!(!state.matches("pairing.idle"));
    /// ```
    pub fn matches(&self, prefix: &str) -> bool {
        self.path().split(',').any(|region| {
            region == prefix
                || region
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    pub fn is_final(&self) -> bool {
        matches!(self, MachineState::Cancelled)
    }

    pub fn connection(&self) -> Option<ConnectionPhase> {
        match self {
            MachineState::Session { connection, .. } => Some(*connection),
            _ => None,
        }
    }

    pub fn heartbeat(&self) -> Option<HeartbeatPhase> {
        match self {
            MachineState::Session { heartbeat, .. } => Some(*heartbeat),
            _ => None,
        }
    }

    pub fn pairing_step(&self) -> Option<PairingStep> {
        match self {
            MachineState::Pairing { step } => Some(*step),
            _ => None,
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
