//! Observability hooks
//!
//! Every runtime and session actor receives an `Arc<dyn Observer>`. All hooks
//! default to no-ops so implementors only override what they need.

use crate::device::MachineSnapshot;
use crate::ProtocolError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Direction of a frame relative to this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for WireDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireDirection::Inbound => f.write_str("in"),
            WireDirection::Outbound => f.write_str("out"),
        }
    }
}

/// Where an error happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Device address
    pub ip: String,
    /// Component phase, e.g. `pairing.waitingForSecretAck`
    pub phase: String,
}

impl ErrorContext {
    pub fn new(ip: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            phase: phase.into(),
        }
    }
}

/// Injected observability interface
pub trait Observer: Send + Sync {
    /// A device machine settled into a new snapshot
    fn on_transition(&self, _snapshot: &MachineSnapshot) {}

    /// An error is about to be propagated
    fn on_error(&self, _context: &ErrorContext, _error: &ProtocolError) {}

    /// A frame crossed the wire
    fn on_wire(&self, _direction: WireDirection, _message_type: u32, _len: usize) {}
}

/// Default observer: structured `tracing` output
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TracingObserver {
    pub fn shared() -> Arc<dyn Observer> {
        Arc::new(TracingObserver)
    }
}

impl Observer for TracingObserver {
    fn on_transition(&self, snapshot: &MachineSnapshot) {
        info!(
            device_id = snapshot.identity.as_ref().map(|i| i.id.as_str()).unwrap_or(""),
            state = %snapshot.state.path(),
            retry_count = snapshot.retry_count,
            "Device state changed"
        );
        if let Some(error) = &snapshot.last_error {
            debug!(state = %snapshot.state.path(), "Last error: {}", error);
        }
    }

    fn on_error(&self, context: &ErrorContext, error: &ProtocolError) {
        error!(ip = %context.ip, phase = %context.phase, "{}", error);
    }

    fn on_wire(&self, direction: WireDirection, message_type: u32, len: usize) {
        trace!(%direction, message_type, len, "frame");
    }
}

/// Observer that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
