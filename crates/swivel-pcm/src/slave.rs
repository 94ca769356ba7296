//! Slave device boundary.
//!
//! The bridge relays frames into whatever sits behind [`SlavePcm`]. This trait
//! is intentionally minimal: embedders wrap a real output device (or another
//! virtual one), and [`MemorySlave`] provides a deterministic in-memory
//! implementation for tests and headless use.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SlaveError;
use crate::hw::{nearest_multiple, nearest_supported, HwParams, HwRequest, SampleFormat};

/// Playback endpoint the bridge relays into.
///
/// The bridge owns its slave exclusively. While the stream is running the
/// handle lives on the mover thread; at every other time it lives on the
/// controller. Implementations therefore never need interior locking against
/// the bridge itself.
pub trait SlavePcm: Send {
    /// Negotiate hardware parameters and return the values now in effect.
    ///
    /// Rate, period size and buffer size follow nearest-supported-value
    /// semantics. Sample format and channel count must be satisfied exactly or
    /// the request is rejected with [`SlaveError::Unsupported`].
    fn negotiate(&mut self, request: &HwRequest) -> Result<HwParams, SlaveError>;

    /// Release hardware parameters negotiated earlier.
    fn release_hw(&mut self) -> Result<(), SlaveError>;

    /// Make the device ready to start.
    fn prepare(&mut self) -> Result<(), SlaveError>;

    /// Begin playback.
    fn start(&mut self) -> Result<(), SlaveError>;

    /// Offer whole interleaved frames for playback.
    ///
    /// Returns the number of frames accepted, which may be less than offered;
    /// zero means "try again later" and is not an error.
    fn write_frames(&mut self, data: &[u8]) -> Result<u64, SlaveError>;

    /// Discard frames the device has buffered but not yet played.
    fn discard(&mut self) -> Result<(), SlaveError>;

    /// Let buffered frames play out before stopping.
    fn drain(&mut self) -> Result<(), SlaveError>;

    /// Frames currently buffered inside the device (device-side latency).
    fn delay_frames(&mut self) -> Result<u64, SlaveError>;
}

#[derive(Debug, Default)]
struct ProbeState {
    negotiated: Option<HwParams>,
    played: Vec<u8>,
    accepted_frames: u64,
    discarded_frames: u64,
    drain_count: u64,
    release_count: u64,
    start_count: u64,
}

/// Shared observation handle for a [`MemorySlave`].
///
/// The slave moves onto the mover thread while the stream runs, so tests hold
/// one of these to inspect what the device received.
#[derive(Debug, Clone, Default)]
pub struct MemorySlaveProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl MemorySlaveProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().expect("slave probe lock poisoned")
    }

    /// Parameters granted by the most recent negotiation.
    pub fn negotiated(&self) -> Option<HwParams> {
        self.lock().negotiated
    }

    /// Every byte the slave has accepted, in playback order.
    pub fn played_bytes(&self) -> Vec<u8> {
        self.lock().played.clone()
    }

    /// Total frames accepted across all writes.
    pub fn accepted_frames(&self) -> u64 {
        self.lock().accepted_frames
    }

    /// Frames thrown away by [`SlavePcm::discard`].
    pub fn discarded_frames(&self) -> u64 {
        self.lock().discarded_frames
    }

    pub fn drain_count(&self) -> u64 {
        self.lock().drain_count
    }

    pub fn release_count(&self) -> u64 {
        self.lock().release_count
    }

    pub fn start_count(&self) -> u64 {
        self.lock().start_count
    }
}

/// Deterministic in-memory slave device.
///
/// Accepts any amount of audio instantly (optionally capped per write via
/// [`set_accept_limit`]) and records it for inspection through
/// [`MemorySlave::probe`]. Negotiation behavior is configurable so callers can
/// model devices with restricted rate or size support.
///
/// [`set_accept_limit`]: MemorySlave::set_accept_limit
#[derive(Debug)]
pub struct MemorySlave {
    supported_rates: Vec<u32>,
    supported_formats: Vec<SampleFormat>,
    max_channels: u32,
    period_granularity: u64,
    accept_limit: Option<u64>,
    fail_next_write: Option<SlaveError>,
    fail_prepare: Option<SlaveError>,
    fail_start: Option<SlaveError>,

    params: Option<HwParams>,
    prepared: bool,
    started: bool,
    pending_frames: u64,

    probe: MemorySlaveProbe,
}

impl MemorySlave {
    pub fn new() -> Self {
        Self::with_rates(vec![44100, 48000])
    }

    /// A slave that only supports the given sample rates.
    pub fn with_rates(supported_rates: Vec<u32>) -> Self {
        Self {
            supported_rates,
            supported_formats: vec![SampleFormat::S16Le, SampleFormat::S32Le],
            max_channels: 2,
            period_granularity: 1,
            accept_limit: None,
            fail_next_write: None,
            fail_prepare: None,
            fail_start: None,
            params: None,
            prepared: false,
            started: false,
            pending_frames: 0,
            probe: MemorySlaveProbe::default(),
        }
    }

    pub fn probe(&self) -> MemorySlaveProbe {
        self.probe.clone()
    }

    pub fn set_supported_formats(&mut self, formats: Vec<SampleFormat>) {
        self.supported_formats = formats;
    }

    pub fn set_max_channels(&mut self, channels: u32) {
        self.max_channels = channels;
    }

    /// Force negotiated period and buffer sizes to multiples of `frames`.
    pub fn set_period_granularity(&mut self, frames: u64) {
        self.period_granularity = frames.max(1);
    }

    /// Cap the frames accepted by each `write_frames` call. Zero makes the
    /// slave report "busy" until the limit is lifted.
    pub fn set_accept_limit(&mut self, frames: u64) {
        self.accept_limit = Some(frames);
    }

    /// Make the next `write_frames` call fail with `error`.
    pub fn fail_next_write(&mut self, error: SlaveError) {
        self.fail_next_write = Some(error);
    }

    /// Make the next `prepare` call fail with `error`.
    pub fn fail_prepare(&mut self, error: SlaveError) {
        self.fail_prepare = Some(error);
    }

    /// Make the next `start` call fail with `error`.
    pub fn fail_start(&mut self, error: SlaveError) {
        self.fail_start = Some(error);
    }
}

impl Default for MemorySlave {
    fn default() -> Self {
        Self::new()
    }
}

impl SlavePcm for MemorySlave {
    fn negotiate(&mut self, request: &HwRequest) -> Result<HwParams, SlaveError> {
        if !self.supported_formats.contains(&request.format) {
            return Err(SlaveError::Unsupported("sample format"));
        }
        if request.channels == 0 || request.channels > self.max_channels {
            return Err(SlaveError::Unsupported("channel count"));
        }
        let rate_hz = nearest_supported(request.rate_hz, &self.supported_rates)
            .ok_or(SlaveError::Unsupported("sample rate"))?;

        let period_frames = nearest_multiple(request.period_frames, self.period_granularity);
        let buffer_frames =
            nearest_multiple(request.buffer_frames, self.period_granularity).max(period_frames);

        let params = HwParams {
            rate_hz,
            format: request.format,
            channels: request.channels,
            period_frames,
            buffer_frames,
        };
        self.params = Some(params);
        self.prepared = false;
        self.started = false;
        self.probe.lock().negotiated = Some(params);
        Ok(params)
    }

    fn release_hw(&mut self) -> Result<(), SlaveError> {
        self.params = None;
        self.prepared = false;
        self.started = false;
        self.pending_frames = 0;
        self.probe.lock().release_count += 1;
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), SlaveError> {
        if let Some(err) = self.fail_prepare.take() {
            return Err(err);
        }
        if self.params.is_none() {
            return Err(SlaveError::Failed("prepare without hw params".to_owned()));
        }
        self.prepared = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), SlaveError> {
        if let Some(err) = self.fail_start.take() {
            return Err(err);
        }
        if !self.prepared {
            return Err(SlaveError::Failed("start without prepare".to_owned()));
        }
        self.started = true;
        self.probe.lock().start_count += 1;
        Ok(())
    }

    fn write_frames(&mut self, data: &[u8]) -> Result<u64, SlaveError> {
        if let Some(err) = self.fail_next_write.take() {
            return Err(err);
        }
        if !self.started {
            return Err(SlaveError::Failed("write while stopped".to_owned()));
        }
        let Some(params) = self.params else {
            return Err(SlaveError::Failed("write without hw params".to_owned()));
        };

        let bpf = params.bytes_per_frame();
        let mut frames = (data.len() / bpf) as u64;
        if let Some(limit) = self.accept_limit {
            frames = frames.min(limit);
        }

        let take = frames as usize * bpf;
        {
            let mut probe = self.probe.lock();
            probe.played.extend_from_slice(&data[..take]);
            probe.accepted_frames += frames;
        }
        self.pending_frames += frames;
        Ok(frames)
    }

    fn discard(&mut self) -> Result<(), SlaveError> {
        self.probe.lock().discarded_frames += self.pending_frames;
        self.pending_frames = 0;
        self.started = false;
        self.prepared = false;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), SlaveError> {
        self.pending_frames = 0;
        self.started = false;
        self.prepared = false;
        self.probe.lock().drain_count += 1;
        Ok(())
    }

    fn delay_frames(&mut self) -> Result<u64, SlaveError> {
        Ok(self.pending_frames)
    }
}
