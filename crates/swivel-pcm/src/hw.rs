//! Hardware-parameter types exchanged between the virtual device and its slave.

use std::fmt;

/// Fixed-width little-endian signed integer sample encodings the bridge
/// relays. Frames are copied verbatim; there is no conversion path, so the
/// virtual device and the slave must agree on the format exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleFormat {
    S16Le,
    S32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::S32Le => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SampleFormat::S16Le => "S16_LE",
            SampleFormat::S32Le => "S32_LE",
        })
    }
}

/// Hardware parameters requested by the application.
///
/// Rate, period size and buffer size are negotiated with nearest-supported
/// semantics; format and channel count must be satisfied exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRequest {
    pub rate_hz: u32,
    pub format: SampleFormat,
    pub channels: u32,
    pub period_frames: u64,
    pub buffer_frames: u64,
}

/// Hardware parameters in effect after negotiation.
///
/// These are the slave's granted values, reflected back to the caller so the
/// application sees what the stream actually runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HwParams {
    pub rate_hz: u32,
    pub format: SampleFormat,
    pub channels: u32,
    pub period_frames: u64,
    pub buffer_frames: u64,
}

impl HwParams {
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }
}

/// Pick the supported value closest to `requested`.
///
/// Ties resolve toward the smaller candidate. Returns `None` only when
/// `supported` is empty.
pub fn nearest_supported<T>(requested: T, supported: &[T]) -> Option<T>
where
    T: Copy + Ord + std::ops::Sub<Output = T>,
{
    supported.iter().copied().min_by_key(|&candidate| {
        let distance = if candidate >= requested {
            candidate - requested
        } else {
            requested - candidate
        };
        (distance, candidate)
    })
}

/// Round `frames` to the nearest positive multiple of `granularity`.
///
/// Ties resolve toward the smaller multiple.
pub fn nearest_multiple(frames: u64, granularity: u64) -> u64 {
    if granularity <= 1 {
        return frames.max(1);
    }
    let below = (frames / granularity) * granularity;
    let above = below + granularity;
    if below == 0 || above - frames < frames - below {
        above
    } else {
        below
    }
}
