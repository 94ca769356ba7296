//! Virtual playback device and its lifecycle state machine.
//!
//! A [`VirtualPcm`] sits between a host audio loop and an already-open slave
//! sink. The host negotiates hardware parameters, writes frames into the
//! device's ring, and polls the readiness descriptor; a mover thread owned by
//! the device relays the ring toward the slave while the device is running.
//!
//! State transitions happen only on host calls, never behind the host's back.
//! When the mover dies on its own (slave failure, cursor drift) the device
//! reports `Stopping` and hands the parked fault to the next `stop` or
//! `drain` call.

use std::fmt;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::thread;

use bitflags::bitflags;
use swivel_ring::{ring_offset, FrameRing};

use crate::error::{RelayError, Result};
use crate::hw::{HwParams, HwRequest};
use crate::mover::{MoverCounters, MoverHandle, RelayStats, IDLE_SLEEP};
use crate::notify::ReadyNotifier;
use crate::slave::SlavePcm;

/// Lifecycle state of a [`VirtualPcm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RunState {
    /// Open, no hardware parameters negotiated.
    Idle,
    /// Parameters negotiated, ring allocated.
    Configured,
    /// Slave prepared, cursors rewound.
    Prepared,
    /// Mover thread active.
    Running,
    /// Mover exited on a fault; waiting for the host to stop or drain.
    Stopping,
    /// Torn down. Terminal.
    Closed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Configured => "configured",
            RunState::Prepared => "prepared",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Closed => "closed",
        })
    }
}

bitflags! {
    /// Poll event bits, in poll(2) layout.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PollFlags: u16 {
        const IN = libc::POLLIN as u16;
        const OUT = libc::POLLOUT as u16;
    }
}

/// Virtual playback device relaying an application ring to a slave sink.
///
/// The slave is owned exclusively: by the device while stopped, by the mover
/// thread while running. Lifecycle calls from the host and the mover never
/// touch it at the same time.
pub struct VirtualPcm {
    state: RunState,
    /// `None` while the mover holds the slave, or after close.
    slave: Option<Box<dyn SlavePcm>>,
    params: Option<HwParams>,
    ring: Option<Arc<FrameRing>>,
    notifier: Arc<ReadyNotifier>,
    mover: Option<MoverHandle>,
    counters: Arc<MoverCounters>,
    /// First fatal mover fault not yet reported to the host.
    pending_fault: Option<RelayError>,
}

impl VirtualPcm {
    /// Open a virtual device over an already-open slave.
    pub fn new(slave: Box<dyn SlavePcm>) -> Result<Self> {
        let notifier = ReadyNotifier::new().map_err(RelayError::Notifier)?;
        Ok(Self {
            state: RunState::Idle,
            slave: Some(slave),
            params: None,
            ring: None,
            notifier: Arc::new(notifier),
            mover: None,
            counters: Arc::new(MoverCounters::default()),
            pending_fault: None,
        })
    }

    /// Current lifecycle state, folding in a mover that exited on its own.
    pub fn state(&mut self) -> RunState {
        self.refresh_worker_state();
        self.state
    }

    /// Negotiate hardware parameters against the slave and allocate the ring.
    ///
    /// Every requested value may be adjusted to the slave's nearest supported
    /// one, except sample format and channel count, which must match exactly.
    /// A grant with zero channels, period, or buffer frames is rejected
    /// without touching device state. The granted set is returned to the
    /// caller. Allowed while idle or already configured; renegotiation
    /// replaces the ring.
    pub fn negotiate_hw(&mut self, request: &HwRequest) -> Result<HwParams> {
        self.refresh_worker_state();
        if !matches!(self.state, RunState::Idle | RunState::Configured) {
            return Err(RelayError::InvalidState {
                op: "negotiate_hw",
                state: self.state,
            });
        }

        let slave = self.slave_mut("negotiate_hw")?;
        let mut granted = slave.negotiate(request).map_err(RelayError::Negotiation)?;
        if granted.format != request.format {
            return Err(RelayError::FormatMismatch {
                requested: request.format,
                granted: granted.format,
            });
        }
        if granted.channels != request.channels {
            return Err(RelayError::ChannelMismatch {
                requested: request.channels,
                granted: granted.channels,
            });
        }
        if granted.channels == 0 {
            return Err(RelayError::InvalidGrant { field: "channels" });
        }
        if granted.period_frames == 0 {
            return Err(RelayError::InvalidGrant {
                field: "period_frames",
            });
        }
        if granted.buffer_frames == 0 {
            return Err(RelayError::InvalidGrant {
                field: "buffer_frames",
            });
        }

        let ring = Arc::new(FrameRing::new(
            granted.buffer_frames,
            granted.bytes_per_frame(),
        ));
        // The ring clamps oversized allocations; report what actually exists.
        granted.buffer_frames = ring.capacity_frames();
        // A period can never drain more than the ring holds.
        granted.period_frames = granted.period_frames.min(granted.buffer_frames);
        tracing::debug!(
            rate_hz = granted.rate_hz,
            format = %granted.format,
            channels = granted.channels,
            period_frames = granted.period_frames,
            buffer_frames = granted.buffer_frames,
            "hardware parameters granted"
        );
        self.ring = Some(ring);
        self.params = Some(granted);
        self.state = RunState::Configured;
        Ok(granted)
    }

    /// Release negotiated parameters and the ring, returning to idle.
    pub fn free_hw(&mut self) -> Result<()> {
        self.refresh_worker_state();
        if !matches!(self.state, RunState::Configured | RunState::Prepared) {
            return Err(RelayError::InvalidState {
                op: "free_hw",
                state: self.state,
            });
        }
        let slave = self.slave_mut("free_hw")?;
        slave
            .release_hw()
            .map_err(|source| RelayError::Slave {
                op: "free_hw",
                source,
            })?;
        self.ring = None;
        self.params = None;
        self.state = RunState::Idle;
        Ok(())
    }

    /// Prepare the slave and rewind both cursors.
    ///
    /// On slave failure the state stays configured so the host may retry.
    pub fn prepare(&mut self) -> Result<()> {
        self.refresh_worker_state();
        if !matches!(self.state, RunState::Configured | RunState::Prepared) {
            return Err(RelayError::InvalidState {
                op: "prepare",
                state: self.state,
            });
        }
        let slave = self.slave_mut("prepare")?;
        slave.prepare().map_err(|source| RelayError::Slave {
            op: "prepare",
            source,
        })?;
        if let Some(ring) = &self.ring {
            // No mover exists outside Running/Stopping, so both cursors are
            // safe to rewind here.
            ring.reset_positions();
        }
        self.state = RunState::Prepared;
        Ok(())
    }

    /// Start the slave and spawn the mover thread.
    ///
    /// Only valid from the prepared state, which also guarantees at most one
    /// mover per device.
    pub fn start(&mut self) -> Result<()> {
        self.refresh_worker_state();
        if self.state != RunState::Prepared {
            return Err(RelayError::InvalidState {
                op: "start",
                state: self.state,
            });
        }
        let params = self.params.ok_or(RelayError::InvalidState {
            op: "start",
            state: self.state,
        })?;
        let ring = match &self.ring {
            Some(ring) => Arc::clone(ring),
            None => {
                return Err(RelayError::InvalidState {
                    op: "start",
                    state: self.state,
                })
            }
        };

        let mut slave = self.take_slave("start")?;
        if let Err(source) = slave.start() {
            self.slave = Some(slave);
            return Err(RelayError::Slave {
                op: "start",
                source,
            });
        }
        self.mover = Some(MoverHandle::spawn(
            ring,
            Arc::clone(&self.notifier),
            slave,
            params.period_frames,
            Arc::clone(&self.counters),
        ));
        self.state = RunState::Running;
        tracing::debug!("relay started");
        Ok(())
    }

    /// Stop the mover, join it, and discard audio still queued in the slave.
    ///
    /// A fault that ended the mover early is returned here in place of any
    /// discard outcome; teardown happens either way.
    pub fn stop(&mut self) -> Result<()> {
        self.refresh_worker_state();
        if !matches!(self.state, RunState::Running | RunState::Stopping) {
            return Err(RelayError::InvalidState {
                op: "stop",
                state: self.state,
            });
        }
        self.halt_mover();
        let fault = self.pending_fault.take();
        let discarded = match self.slave.as_deref_mut() {
            Some(slave) => slave.discard().map_err(|source| RelayError::Slave {
                op: "drop",
                source,
            }),
            None => Ok(()),
        };
        self.state = RunState::Configured;
        match fault {
            Some(fault) => Err(fault),
            None => discarded,
        }
    }

    /// Let queued audio play out, then stop the mover and drain the slave.
    pub fn drain(&mut self) -> Result<()> {
        self.refresh_worker_state();
        if !matches!(self.state, RunState::Running | RunState::Stopping) {
            return Err(RelayError::InvalidState {
                op: "drain",
                state: self.state,
            });
        }
        // Give the mover time to flush what the application already queued.
        if let (Some(ring), Some(mover)) = (&self.ring, &self.mover) {
            while ring.buffer_level_frames() > 0 && !mover.is_finished() {
                thread::sleep(IDLE_SLEEP);
            }
        }
        self.halt_mover();
        let fault = self.pending_fault.take();
        let drained = match self.slave.as_deref_mut() {
            Some(slave) => slave.drain().map_err(|source| RelayError::Slave {
                op: "drain",
                source,
            }),
            None => Ok(()),
        };
        self.state = RunState::Configured;
        match fault {
            Some(fault) => Err(fault),
            None => drained,
        }
    }

    /// Playback position in frames, modulo the ring capacity.
    ///
    /// Reports the mover's read cursor so host bookkeeping tracks what the
    /// slave actually consumed.
    pub fn pointer(&self) -> Result<u64> {
        let ring = self.ring.as_ref().ok_or(RelayError::InvalidState {
            op: "pointer",
            state: self.state,
        })?;
        Ok(ring_offset(ring.read_pos(), ring.capacity_frames()))
    }

    /// The application-facing ring, once parameters are negotiated.
    ///
    /// The host queues audio by pushing frames here; the mover consumes them.
    pub fn buffer(&self) -> Option<&FrameRing> {
        self.ring.as_deref()
    }

    /// Granted hardware parameters, once negotiated.
    pub fn hw_params(&self) -> Option<HwParams> {
        self.params
    }

    /// Number of descriptors the host should poll. Always one.
    pub fn poll_descriptors_count(&self) -> usize {
        1
    }

    /// Readiness descriptor for the host poll loop.
    pub fn poll_fd(&self) -> BorrowedFd<'_> {
        self.notifier.poll_fd()
    }

    /// Translate raw poll revents into playback-space events.
    ///
    /// The descriptor turning readable means the mover made room, which to a
    /// playback stream is writability. Pending readiness is cleared whether
    /// or not poll reported anything, keeping the edge-triggered contract.
    pub fn poll_revents(&self, revents: PollFlags) -> PollFlags {
        self.notifier.consume();
        if revents.contains(PollFlags::IN) {
            PollFlags::OUT
        } else {
            PollFlags::empty()
        }
    }

    /// Relay activity counters.
    pub fn stats(&self) -> RelayStats {
        self.counters.snapshot()
    }

    /// Tear the device down. Idempotent, never fails.
    ///
    /// Joins the mover if one is still running, drops the slave and the
    /// ring, and closes the readiness descriptor. A fault the host never
    /// collected is logged and discarded.
    pub fn close(&mut self) {
        if self.state == RunState::Closed {
            return;
        }
        self.halt_mover();
        if let Some(fault) = self.pending_fault.take() {
            tracing::debug!(error = %fault, "discarding unreported fault on close");
        }
        self.slave = None;
        self.ring = None;
        self.params = None;
        self.state = RunState::Closed;
        tracing::debug!("device closed");
    }

    /// Fold a mover that exited on its own into the visible state.
    fn refresh_worker_state(&mut self) {
        if self.state == RunState::Running
            && self.mover.as_ref().is_some_and(MoverHandle::is_finished)
        {
            self.state = RunState::Stopping;
        }
    }

    /// Join the mover and take the slave back, parking the first fault.
    fn halt_mover(&mut self) {
        if let Some(handle) = self.mover.take() {
            match handle.stop() {
                Ok(exit) => {
                    self.slave = Some(exit.slave);
                    if let Some(fault) = exit.fault {
                        tracing::error!(error = %fault, "mover stopped on a fault");
                        if self.pending_fault.is_none() {
                            self.pending_fault = Some(fault);
                        }
                    }
                }
                Err(_) => {
                    tracing::error!("mover thread panicked; slave lost with it");
                }
            }
        }
    }

    fn slave_mut(&mut self, op: &'static str) -> Result<&mut dyn SlavePcm> {
        let state = self.state;
        match self.slave.as_deref_mut() {
            Some(slave) => Ok(slave),
            None => Err(RelayError::InvalidState { op, state }),
        }
    }

    fn take_slave(&mut self, op: &'static str) -> Result<Box<dyn SlavePcm>> {
        let state = self.state;
        self.slave
            .take()
            .ok_or(RelayError::InvalidState { op, state })
    }
}

impl Drop for VirtualPcm {
    fn drop(&mut self) {
        self.close();
    }
}
