//! Pairing Event System
//!
//! Events a pairing session reports to its owner.

use super::handshake::PairingPhase;
use crate::Credentials;

/// Events emitted by a pairing session
#[derive(Debug, Clone)]
pub enum PairingEvent {
    /// The TV is displaying the code and the user must enter it
    PromptReceived,

    /// Pairing finished; the credentials are complete
    Paired(Credentials),

    /// Pairing failed; the session is finished
    Failed {
        /// Phase the failure happened in
        phase: PairingPhase,
        /// Human readable reason
        message: String,
    },
}

impl PairingEvent {
    /// Check if this event ends the session
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PairingEvent::PromptReceived)
    }

    /// Get a short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PairingEvent::PromptReceived => "prompt_received",
            PairingEvent::Paired(_) => "paired",
            PairingEvent::Failed { .. } => "failed",
        }
    }
}
