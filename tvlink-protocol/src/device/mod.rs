//! Per-device lifecycle
//!
//! - [`DeviceMachine`]: pure transition function over [`MachineState`]
//! - [`Platform`]: the pairing/session actor seam each TV platform fills
//! - [`DeviceRuntime`]: async actor that owns a machine, runs its effects and
//!   publishes snapshots to [`DeviceHandle`]s

pub mod events;
pub mod machine;
pub mod platform;
pub mod runtime;
pub mod state;

pub use events::{Effect, MachineEvent};
pub use machine::{DeviceIdentity, DeviceMachine, MachineConfig, MachineSnapshot};
pub use platform::{EventSink, PairingControl, Platform, SessionControl};
pub use runtime::{DeviceHandle, DeviceRuntime, DeviceStore, MemoryStore};
pub use state::{ConnectionPhase, HeartbeatPhase, MachineState, PairingStep};
