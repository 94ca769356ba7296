//! Swivel playback engine.
//!
//! This crate implements a virtual playback PCM that relays frames from an
//! application-visible ring buffer to a slave output device, so the slave can
//! be swapped or reconfigured without the producing application noticing.
//! The pieces: a lifecycle state machine ([`VirtualPcm`]), a mover thread
//! that drains the ring toward the slave, a pollable readiness notifier for
//! the host event loop, and nearest-value hardware parameter negotiation
//! against a [`SlavePcm`] implementation.

pub mod config;
pub mod device;
pub mod error;
pub mod hw;
pub mod mover;
pub mod notify;
pub mod slave;

pub use config::{ConfigValue, RelayConfig, DEFAULT_SLAVE_NAME};
pub use device::{PollFlags, RunState, VirtualPcm};
pub use error::{RelayError, Result, SlaveError};
pub use hw::{HwParams, HwRequest, SampleFormat};
pub use mover::RelayStats;
pub use notify::ReadyNotifier;
pub use slave::{MemorySlave, MemorySlaveProbe, SlavePcm};
