//! Machine input events and output effects

use super::machine::DeviceIdentity;
use crate::Credentials;
use std::net::IpAddr;
use std::time::Duration;

/// Every input the device machine accepts
///
/// This vocabulary is the only way to change a machine.
#[derive(Debug, Clone)]
pub enum MachineEvent {
    /// Name the device and give its address (setup only)
    SetDeviceInfo { name: String, ip: String },
    /// (Re)start the pairing handshake
    StartPairing,
    /// The TV shows a code
    PromptReceived,
    /// The user typed the code
    SubmitCode(String),
    /// Pairing produced credentials
    Paired(Credentials),
    /// Pairing failed
    PairingError(String),
    /// Open a remote session
    Connect,
    /// The session is ready for commands
    Connected,
    /// The session dropped
    ConnectionLost(String),
    HeartbeatOk,
    HeartbeatFailed(String),
    /// Heartbeat interval elapsed
    HeartbeatDue,
    /// Retry backoff elapsed
    RetryDue,
    /// Key name, e.g. `HOME`
    SendKey(String),
    SendText(String),
    /// Deep link to open on the TV
    SendAppLink(String),
    Disconnect,
    /// Drop the credentials and pair again
    Forget,
    /// Drop identity and credentials
    ResetToSetup,
    /// Abandon setup
    Cancel,
}

impl MachineEvent {
    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            MachineEvent::SetDeviceInfo { .. } => "SET_DEVICE_INFO",
            MachineEvent::StartPairing => "START_PAIRING",
            MachineEvent::PromptReceived => "PROMPT_RECEIVED",
            MachineEvent::SubmitCode(_) => "SUBMIT_CODE",
            MachineEvent::Paired(_) => "PAIRED",
            MachineEvent::PairingError(_) => "PAIRING_ERROR",
            MachineEvent::Connect => "CONNECT",
            MachineEvent::Connected => "CONNECTED",
            MachineEvent::ConnectionLost(_) => "CONNECTION_LOST",
            MachineEvent::HeartbeatOk => "HEARTBEAT_OK",
            MachineEvent::HeartbeatFailed(_) => "HEARTBEAT_FAILED",
            MachineEvent::HeartbeatDue => "HEARTBEAT_DUE",
            MachineEvent::RetryDue => "RETRY_DUE",
            MachineEvent::SendKey(_) => "SEND_KEY",
            MachineEvent::SendText(_) => "SEND_TEXT",
            MachineEvent::SendAppLink(_) => "SEND_APP_LINK",
            MachineEvent::Disconnect => "DISCONNECT",
            MachineEvent::Forget => "FORGET",
            MachineEvent::ResetToSetup => "RESET_TO_SETUP",
            MachineEvent::Cancel => "CANCEL",
        }
    }
}

/// Side effects requested by a transition, carried out by the runtime
#[derive(Debug, Clone)]
pub enum Effect {
    /// Start a fresh pairing session, replacing any running one
    SpawnPairing { ip: IpAddr },
    /// Forward the code to the running pairing session
    SubmitCode(String),
    StopPairing,
    /// Start a fresh remote session, replacing any running one
    SpawnSession { ip: IpAddr, credentials: Credentials },
    StopSession,
    /// Deliver `RETRY_DUE` after the delay
    StartRetryTimer(Duration),
    CancelRetryTimer,
    /// Deliver `HEARTBEAT_DUE` after the delay
    StartHeartbeatTimer(Duration),
    CancelHeartbeatTimer,
    /// Ask the session for a liveness verdict
    CheckHeartbeat,
    SendKey(String),
    SendText(String),
    SendAppLink(String),
    /// A new identity left setup
    IdentityAssigned(DeviceIdentity),
    /// Persist freshly paired credentials
    StoreCredentials {
        identity: DeviceIdentity,
        credentials: Credentials,
    },
    /// Remove persisted credentials
    ClearCredentials { identity: DeviceIdentity },
    /// Remove the identity and anything stored for it
    DiscardIdentity { identity: DeviceIdentity },
}
