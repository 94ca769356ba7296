use thiserror::Error;

use crate::device::RunState;
use crate::hw::SampleFormat;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Error raised by a [`SlavePcm`](crate::slave::SlavePcm) operation.
///
/// Only [`SlaveError::Underrun`] is recoverable; the mover logs it and retries
/// on the next iteration. Everything else ends the stream.
#[derive(Debug, Error)]
pub enum SlaveError {
    /// The slave cannot satisfy the request at all (e.g. an exact-match
    /// parameter it does not support).
    #[error("unsupported by slave device: {0}")]
    Unsupported(&'static str),

    /// Transient underrun; the write may be retried.
    #[error("slave device underrun")]
    Underrun,

    /// The device failed in a way that ends the stream.
    #[error("slave device failure: {0}")]
    Failed(String),
}

impl SlaveError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SlaveError::Underrun)
    }
}

/// Unified error type for virtual-device operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A configuration field this device does not define.
    #[error("unknown config field {0:?}")]
    UnknownConfigKey(String),

    /// A known configuration field with a value of the wrong shape.
    #[error("config field {field:?} must be {expected}")]
    InvalidConfigValue {
        field: &'static str,
        expected: &'static str,
    },

    /// The slave granted a sample format other than the one requested.
    ///
    /// The bridge copies frames verbatim and never converts between formats,
    /// so a format the slave cannot take exactly is a configuration error.
    #[error("sample format mismatch: requested {requested}, slave granted {granted}")]
    FormatMismatch {
        requested: SampleFormat,
        granted: SampleFormat,
    },

    /// The slave granted a channel count other than the one requested.
    #[error("channel count mismatch: requested {requested}, slave granted {granted}")]
    ChannelMismatch { requested: u32, granted: u32 },

    /// The slave granted a parameter set with a zero dimension.
    ///
    /// Zero channels, a zero-frame period, or a zero-frame buffer cannot
    /// carry audio; the grant is rejected before anything is allocated.
    #[error("slave granted zero {field}")]
    InvalidGrant { field: &'static str },

    /// The slave rejected the hardware-parameter request outright.
    #[error("hw parameter negotiation failed: {0}")]
    Negotiation(#[source] SlaveError),

    /// A slave device operation failed after negotiation.
    #[error("slave {op} failed: {source}")]
    Slave {
        op: &'static str,
        #[source]
        source: SlaveError,
    },

    /// The write and read cursors are further apart than the ring can hold.
    ///
    /// This means one side advanced its cursor without the other observing the
    /// frames in between; the stream cannot continue safely.
    #[error(
        "cursor tracking fault: write={write_pos} read={read_pos} capacity={capacity_frames}"
    )]
    CursorDrift {
        write_pos: u64,
        read_pos: u64,
        capacity_frames: u64,
    },

    /// An operation was invoked in a lifecycle state that does not allow it.
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: RunState },

    /// The readiness notifier descriptor could not be created.
    #[error("readiness notifier setup failed: {0}")]
    Notifier(#[source] std::io::Error),
}
