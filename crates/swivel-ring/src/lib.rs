//! Shared frame ring buffer used to hand audio from the application side to the
//! background mover.
//!
//! The application is the producer and the mover thread is the consumer. Both
//! positions are stored as monotonically increasing `u64` frame counters
//! (wrapping naturally at `2^64`) to avoid the classic "read == write"
//! ambiguity; storage offsets are derived by reducing a counter modulo the ring
//! capacity. Each counter has exactly one writer: the producer advances
//! `write_pos`, the consumer advances `read_pos`, and either side may read the
//! other's counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum ring capacity supported by [`FrameRing`].
///
/// Capacity comes from hardware-parameter negotiation, which in turn reflects
/// application requests. Capping it prevents an absurd buffer-size request from
/// turning into a multi-gigabyte allocation. `2^20` frames is ~21s of audio at
/// 48kHz.
pub const MAX_RING_CAPACITY_FRAMES: u64 = 1 << 20;

/// Raw distance between the two free-running cursors.
///
/// For a ring in a consistent state this is the number of buffered frames and
/// lies in `[0, capacity]` (`capacity` meaning completely full). A value above
/// the capacity means the producer and consumer have lost agreement.
#[inline]
pub fn cursor_delta(read_pos: u64, write_pos: u64) -> u64 {
    write_pos.wrapping_sub(read_pos)
}

/// Buffered frame count reduced modulo the ring capacity.
///
/// Total over all cursor pairs: the result is always in `[0, capacity_frames)`.
/// Note that a completely full ring reduces to 0, so consumers that must drain
/// a full ring use [`cursor_delta`] and validate it against the capacity
/// instead.
#[inline]
pub fn buffered_frames(read_pos: u64, write_pos: u64, capacity_frames: u64) -> u64 {
    cursor_delta(read_pos, write_pos) % capacity_frames
}

/// Map a free-running frame counter to a storage offset inside the ring.
#[inline]
pub fn ring_offset(pos: u64, capacity_frames: u64) -> u64 {
    pos % capacity_frames
}

/// Fixed-capacity ring of interleaved sample frames shared between the
/// application side and the mover thread.
///
/// Frames are opaque byte groups of `bytes_per_frame` bytes; the ring never
/// inspects sample values. Producer-side methods ([`push_frames`]) must only be
/// called from one thread at a time, and likewise consumer-side methods
/// ([`peek_frames`], [`advance_read`]); the two sides may run concurrently.
///
/// [`push_frames`]: FrameRing::push_frames
/// [`peek_frames`]: FrameRing::peek_frames
/// [`advance_read`]: FrameRing::advance_read
#[derive(Debug)]
pub struct FrameRing {
    capacity_frames: u64,
    bytes_per_frame: usize,

    read_pos: AtomicU64,
    write_pos: AtomicU64,

    data_ptr: *mut u8,
    _storage: Box<[u8]>,
}

// Safety: all storage access goes through `data_ptr` with ranges derived from
// the atomic cursors. The producer only writes the region between `write_pos`
// and `read_pos + capacity`, the consumer only reads the region between
// `read_pos` and `write_pos`, and each cursor is advanced (Release) only after
// the corresponding copy completes.
unsafe impl Send for FrameRing {}
unsafe impl Sync for FrameRing {}

impl FrameRing {
    pub fn new(capacity_frames: u64, bytes_per_frame: usize) -> Self {
        assert!(capacity_frames > 0, "capacity_frames must be non-zero");
        assert!(bytes_per_frame > 0, "bytes_per_frame must be non-zero");
        let capacity_frames = capacity_frames.min(MAX_RING_CAPACITY_FRAMES);

        let mut storage =
            vec![0u8; capacity_frames as usize * bytes_per_frame].into_boxed_slice();
        let data_ptr = storage.as_mut_ptr();
        Self {
            capacity_frames,
            bytes_per_frame,
            read_pos: AtomicU64::new(0),
            write_pos: AtomicU64::new(0),
            data_ptr,
            _storage: storage,
        }
    }

    pub fn capacity_frames(&self) -> u64 {
        self.capacity_frames
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    pub fn read_pos(&self) -> u64 {
        self.read_pos.load(Ordering::Acquire)
    }

    pub fn write_pos(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Buffered frames, clamped to the capacity.
    pub fn buffer_level_frames(&self) -> u64 {
        cursor_delta(self.read_pos(), self.write_pos()).min(self.capacity_frames)
    }

    /// Raw cursor distance, unclamped. See [`cursor_delta`].
    pub fn cursor_lag(&self) -> u64 {
        cursor_delta(self.read_pos(), self.write_pos())
    }

    pub fn free_frames(&self) -> u64 {
        self.capacity_frames - self.buffer_level_frames()
    }

    /// Producer side: append whole frames from `data`.
    ///
    /// Copies `min(data frames, free frames)` and advances the write cursor.
    /// Returns the number of frames written; 0 when the ring is full. Trailing
    /// bytes that do not form a whole frame are ignored.
    pub fn push_frames(&self, data: &[u8]) -> u64 {
        let requested = (data.len() / self.bytes_per_frame) as u64;
        if requested == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Relaxed);
        let free = self.capacity_frames - cursor_delta(read, write).min(self.capacity_frames);
        let frames = requested.min(free);
        if frames == 0 {
            return 0;
        }

        let offset = ring_offset(write, self.capacity_frames);
        let first = frames.min(self.capacity_frames - offset);
        let second = frames - first;

        let bpf = self.bytes_per_frame;
        unsafe {
            core::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.data_ptr.add(offset as usize * bpf),
                first as usize * bpf,
            );
            if second > 0 {
                core::ptr::copy_nonoverlapping(
                    data.as_ptr().add(first as usize * bpf),
                    self.data_ptr,
                    second as usize * bpf,
                );
            }
        }

        self.write_pos
            .store(write.wrapping_add(frames), Ordering::Release);
        frames
    }

    /// Consumer side: copy buffered frames into `out` without consuming them.
    ///
    /// Copies `min(buffered frames, out frames)` starting at the current read
    /// position and returns the frame count. The read cursor is not moved;
    /// call [`advance_read`](Self::advance_read) once the frames have actually
    /// been delivered downstream.
    pub fn peek_frames(&self, out: &mut [u8]) -> u64 {
        let requested = (out.len() / self.bytes_per_frame) as u64;
        if requested == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        let available = cursor_delta(read, write).min(self.capacity_frames);
        let frames = requested.min(available);
        if frames == 0 {
            return 0;
        }

        let offset = ring_offset(read, self.capacity_frames);
        let first = frames.min(self.capacity_frames - offset);
        let second = frames - first;

        let bpf = self.bytes_per_frame;
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.data_ptr.add(offset as usize * bpf),
                out.as_mut_ptr(),
                first as usize * bpf,
            );
            if second > 0 {
                core::ptr::copy_nonoverlapping(
                    self.data_ptr,
                    out.as_mut_ptr().add(first as usize * bpf),
                    second as usize * bpf,
                );
            }
        }

        frames
    }

    /// Consumer side: mark `frames` previously peeked frames as delivered.
    pub fn advance_read(&self, frames: u64) {
        let read = self.read_pos.load(Ordering::Relaxed);
        self.read_pos
            .store(read.wrapping_add(frames), Ordering::Release);
    }

    /// Reset both cursors to zero.
    ///
    /// Only valid while no producer or consumer is active (e.g. between a
    /// stop and a restart of the stream).
    pub fn reset_positions(&self) {
        self.read_pos.store(0, Ordering::Release);
        self.write_pos.store(0, Ordering::Release);
    }
}
