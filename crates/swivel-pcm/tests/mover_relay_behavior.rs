use std::thread;
use std::time::Duration;

use swivel_pcm::{
    HwRequest, MemorySlave, RelayError, RunState, SampleFormat, SlaveError, VirtualPcm,
};

fn request() -> HwRequest {
    HwRequest {
        rate_hz: 48_000,
        format: SampleFormat::S16Le,
        channels: 2,
        period_frames: 32,
        buffer_frames: 128,
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..2000 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn queued_frames_reach_the_slave_and_move_the_pointer() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();

    let data: Vec<u8> = (0..64u8).cycle().take(32 * 4).collect();
    assert_eq!(pcm.buffer().unwrap().push_frames(&data), 32);

    assert!(wait_until(|| pcm.pointer().unwrap() == 32));
    assert_eq!(probe.played_bytes(), data);

    pcm.stop().unwrap();
    let stats = pcm.stats();
    assert_eq!(stats.frames_moved, 32);
    assert_eq!(stats.slave_delay_frames, 32);
}

#[test]
fn drain_flushes_frames_queued_just_before_the_call() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();

    assert_eq!(pcm.buffer().unwrap().push_frames(&[9u8; 100 * 4]), 100);
    pcm.drain().unwrap();

    assert_eq!(probe.accepted_frames(), 100);
    assert_eq!(probe.drain_count(), 1);
    assert_eq!(pcm.state(), RunState::Configured);
}

#[test]
fn fatal_slave_failure_parks_a_fault_for_the_next_call() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    slave.fail_next_write(SlaveError::Failed("device detached".into()));
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();

    pcm.buffer().unwrap().push_frames(&[1u8; 8 * 4]);
    assert!(wait_until(|| pcm.state() == RunState::Stopping));

    let err = pcm.stop().unwrap_err();
    assert!(matches!(err, RelayError::Slave { op: "write", .. }));
    assert_eq!(pcm.state(), RunState::Configured);
    assert_eq!(probe.accepted_frames(), 0);

    // The failure was injected once; the device comes back cleanly.
    pcm.prepare().unwrap();
    pcm.start().unwrap();
    pcm.buffer().unwrap().push_frames(&[2u8; 8 * 4]);
    assert!(wait_until(|| probe.accepted_frames() == 8));
    pcm.stop().unwrap();
}

#[test]
fn recoverable_slave_failure_is_absorbed() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    slave.fail_next_write(SlaveError::Underrun);
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();

    pcm.buffer().unwrap().push_frames(&[3u8; 16 * 4]);
    assert!(wait_until(|| probe.accepted_frames() == 16));
    assert_eq!(pcm.state(), RunState::Running);

    pcm.stop().unwrap();
    assert!(pcm.stats().slave_retries >= 1);
}

#[test]
fn cursor_drift_is_fatal_to_the_stream() {
    let mut pcm = VirtualPcm::new(Box::new(MemorySlave::new())).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();

    // Corrupt the cursors before the mover exists: read ahead of write makes
    // the raw delta wrap far beyond capacity.
    let ring = pcm.buffer().unwrap();
    ring.push_frames(&[0u8; 2 * 4]);
    ring.advance_read(5);

    pcm.start().unwrap();
    assert!(wait_until(|| pcm.state() == RunState::Stopping));

    let err = pcm.stop().unwrap_err();
    assert!(matches!(err, RelayError::CursorDrift { .. }));
    assert_eq!(pcm.state(), RunState::Configured);
}

#[test]
fn stats_track_idle_polling() {
    let mut pcm = VirtualPcm::new(Box::new(MemorySlave::new())).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();

    assert!(wait_until(|| pcm.stats().empty_polls > 0));
    assert_eq!(pcm.stats().frames_moved, 0);

    pcm.stop().unwrap();
}
