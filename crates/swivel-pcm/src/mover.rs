//! Frame mover thread.
//!
//! Each started device runs exactly one mover. The mover owns the slave for
//! the duration of the run, drains the ring toward it a period at a time, and
//! signals the readiness notifier once per iteration so the host poll loop
//! wakes whether or not frames moved. Shutdown is cooperative: the device
//! raises the stop flag, joins the thread, and takes the slave back from the
//! exit value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use swivel_ring::FrameRing;

use crate::error::RelayError;
use crate::notify::ReadyNotifier;
use crate::slave::SlavePcm;

/// How long the mover parks when the ring is empty or the slave is full.
pub(crate) const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Point-in-time view of relay activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayStats {
    /// Frames handed to the slave since the device opened.
    pub frames_moved: u64,
    /// Mover iterations that found the ring empty.
    pub empty_polls: u64,
    /// Writes where the slave accepted fewer frames than it was offered.
    pub short_writes: u64,
    /// Recoverable slave write errors that were retried.
    pub slave_retries: u64,
    /// Most recent queue depth the slave reported, in frames.
    pub slave_delay_frames: u64,
}

/// Counters the mover updates and the device snapshots.
///
/// Every field is a running total except `slave_delay_frames`, which holds
/// the latest reading. Relaxed ordering is enough here; readers want recent
/// values, not a consistent cut across fields.
#[derive(Debug, Default)]
pub(crate) struct MoverCounters {
    frames_moved: AtomicU64,
    empty_polls: AtomicU64,
    short_writes: AtomicU64,
    slave_retries: AtomicU64,
    slave_delay_frames: AtomicU64,
}

impl MoverCounters {
    pub(crate) fn snapshot(&self) -> RelayStats {
        RelayStats {
            frames_moved: self.frames_moved.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            short_writes: self.short_writes.load(Ordering::Relaxed),
            slave_retries: self.slave_retries.load(Ordering::Relaxed),
            slave_delay_frames: self.slave_delay_frames.load(Ordering::Relaxed),
        }
    }
}

/// What the mover leaves behind when its loop returns.
pub(crate) struct MoverExit {
    /// The slave, handed back for reuse or teardown.
    pub(crate) slave: Box<dyn SlavePcm>,
    /// Fatal condition that ended the run early, if any.
    pub(crate) fault: Option<RelayError>,
}

/// Handle to a running mover thread.
pub(crate) struct MoverHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<MoverExit>,
}

impl MoverHandle {
    /// Start a mover over `ring`, feeding `slave` in chunks of up to
    /// `period_frames`.
    pub(crate) fn spawn(
        ring: Arc<FrameRing>,
        notifier: Arc<ReadyNotifier>,
        slave: Box<dyn SlavePcm>,
        period_frames: u64,
        counters: Arc<MoverCounters>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let run_stop = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            tracing::debug!(period_frames, "mover thread started");
            let exit = run(&ring, &notifier, slave, period_frames, &counters, &run_stop);
            tracing::debug!(faulted = exit.fault.is_some(), "mover thread exiting");
            exit
        });
        Self { stop, thread }
    }

    /// Whether the thread has already returned on its own.
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Raise the stop flag and wait for the thread. `Err` means the thread
    /// panicked and the slave is gone with it.
    pub(crate) fn stop(self) -> thread::Result<MoverExit> {
        self.stop.store(true, Ordering::Release);
        self.thread.join()
    }
}

fn run(
    ring: &FrameRing,
    notifier: &ReadyNotifier,
    mut slave: Box<dyn SlavePcm>,
    period_frames: u64,
    counters: &MoverCounters,
    stop: &AtomicBool,
) -> MoverExit {
    let bytes_per_frame = ring.bytes_per_frame();
    let mut scratch = vec![0u8; period_frames as usize * bytes_per_frame];
    let mut fault = None;

    while !stop.load(Ordering::Acquire) {
        let lag = ring.cursor_lag();
        if lag > ring.capacity_frames() {
            tracing::error!(
                write_pos = ring.write_pos(),
                read_pos = ring.read_pos(),
                capacity_frames = ring.capacity_frames(),
                "write cursor ran past ring capacity"
            );
            fault = Some(RelayError::CursorDrift {
                write_pos: ring.write_pos(),
                read_pos: ring.read_pos(),
                capacity_frames: ring.capacity_frames(),
            });
            notifier.signal();
            break;
        }
        if lag == 0 {
            counters.empty_polls.fetch_add(1, Ordering::Relaxed);
            notifier.signal();
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        let peeked = ring.peek_frames(&mut scratch);
        let chunk = &scratch[..peeked as usize * bytes_per_frame];
        match slave.write_frames(chunk) {
            Ok(accepted) => {
                if accepted > 0 {
                    ring.advance_read(accepted);
                    counters.frames_moved.fetch_add(accepted, Ordering::Relaxed);
                    tracing::trace!(frames = accepted, "relayed frames to slave");
                }
                if accepted < peeked {
                    counters.short_writes.fetch_add(1, Ordering::Relaxed);
                }
                if accepted == 0 {
                    // The slave has no room; park instead of spinning on the
                    // same chunk.
                    thread::sleep(IDLE_SLEEP);
                }
            }
            Err(err) if err.is_fatal() => {
                tracing::error!(error = %err, "slave write failed, stopping relay");
                fault = Some(RelayError::Slave {
                    op: "write",
                    source: err,
                });
                notifier.signal();
                break;
            }
            Err(err) => {
                counters.slave_retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "slave write hiccup, retrying");
            }
        }

        if let Ok(delay) = slave.delay_frames() {
            counters.slave_delay_frames.store(delay, Ordering::Relaxed);
        }
        notifier.signal();
    }

    MoverExit { slave, fault }
}
