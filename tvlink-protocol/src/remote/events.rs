//! Remote session events

/// Events emitted by a remote session
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Configure exchange finished; commands are accepted
    Ready,

    /// The connection closed
    Closed {
        /// Why, if it was not a clean shutdown
        error: Option<String>,
        /// Whether the session will try again on its own
        will_reconnect: bool,
    },

    /// Traffic was seen within the liveness window
    HeartbeatOk,

    /// No traffic within the liveness window
    HeartbeatFailed(String),

    /// TV power state
    PowerChanged(bool),

    /// Package name of the foreground app
    CurrentApp(String),

    /// Volume report
    VolumeChanged { level: u32, max: u32, muted: bool },
}

impl RemoteEvent {
    /// Informational events do not affect the connection lifecycle
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            RemoteEvent::PowerChanged(_)
                | RemoteEvent::CurrentApp(_)
                | RemoteEvent::VolumeChanged { .. }
        )
    }
}
