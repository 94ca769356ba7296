use std::thread;
use std::time::Duration;

use swivel_pcm::{HwRequest, MemorySlave, RelayError, RunState, SampleFormat, VirtualPcm};

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
fn lifecycle_walks_through_every_state() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    assert_eq!(pcm.state(), RunState::Idle);

    pcm.negotiate_hw(&request()).unwrap();
    assert_eq!(pcm.state(), RunState::Configured);

    pcm.prepare().unwrap();
    assert_eq!(pcm.state(), RunState::Prepared);

    pcm.start().unwrap();
    assert_eq!(pcm.state(), RunState::Running);

    let frames = vec![0x11u8; 32 * 4];
    assert_eq!(pcm.buffer().unwrap().push_frames(&frames), 32);
    assert!(wait_until(|| probe.accepted_frames() == 32));

    pcm.stop().unwrap();
    assert_eq!(pcm.state(), RunState::Configured);
    assert_eq!(probe.discarded_frames(), 32);

    pcm.prepare().unwrap();
    pcm.start().unwrap();
    pcm.drain().unwrap();
    assert_eq!(pcm.state(), RunState::Configured);
    assert_eq!(probe.drain_count(), 1);
    assert_eq!(probe.start_count(), 2);

    pcm.free_hw().unwrap();
    assert_eq!(pcm.state(), RunState::Idle);
    assert_eq!(probe.release_count(), 1);

    pcm.close();
    assert_eq!(pcm.state(), RunState::Closed);
}

#[test]
fn second_start_without_stop_is_rejected() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();

    let err = pcm.start().unwrap_err();
    assert!(matches!(
        err,
        RelayError::InvalidState {
            op: "start",
            state: RunState::Running,
        }
    ));
    assert_eq!(probe.start_count(), 1);

    pcm.stop().unwrap();
}

#[test]
fn out_of_order_calls_are_rejected_without_side_effects() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();

    assert!(matches!(
        pcm.stop(),
        Err(RelayError::InvalidState {
            op: "stop",
            state: RunState::Idle,
        })
    ));
    assert!(matches!(
        pcm.free_hw(),
        Err(RelayError::InvalidState {
            op: "free_hw",
            state: RunState::Idle,
        })
    ));

    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    assert!(matches!(
        pcm.drain(),
        Err(RelayError::InvalidState {
            op: "drain",
            state: RunState::Prepared,
        })
    ));

    assert_eq!(probe.drain_count(), 0);
    assert_eq!(probe.discarded_frames(), 0);
    assert_eq!(pcm.state(), RunState::Prepared);
}

#[test]
fn pointer_is_frozen_once_stop_returns() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();

    assert_eq!(pcm.buffer().unwrap().push_frames(&[0x22u8; 40 * 4]), 40);
    assert!(wait_until(|| probe.accepted_frames() == 40));
    pcm.stop().unwrap();

    let frozen = pcm.pointer().unwrap();
    assert_eq!(frozen, 40);

    // Frames queued after stop must not move the device position.
    pcm.buffer().unwrap().push_frames(&[0x33u8; 8 * 4]);
    thread::sleep(Duration::from_millis(5));
    assert_eq!(pcm.pointer().unwrap(), frozen);
    assert_eq!(probe.accepted_frames(), 40);
}

#[test]
fn prepare_rewinds_the_cursors() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();

    pcm.buffer().unwrap().push_frames(&[0x44u8; 24 * 4]);
    assert!(wait_until(|| probe.accepted_frames() == 24));
    pcm.stop().unwrap();
    assert_eq!(pcm.pointer().unwrap(), 24);

    pcm.prepare().unwrap();
    assert_eq!(pcm.pointer().unwrap(), 0);
    assert_eq!(pcm.buffer().unwrap().buffer_level_frames(), 0);
}

#[test]
fn dropping_a_running_device_joins_the_worker() {
    let mut slave = MemorySlave::new();
    let probe = slave.probe();
    let mut pcm = VirtualPcm::new(Box::new(slave)).unwrap();
    pcm.negotiate_hw(&request()).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();
    pcm.buffer().unwrap().push_frames(&[0x55u8; 16 * 4]);

    drop(pcm);

    // Join happened, nothing advances afterwards.
    let moved = probe.accepted_frames();
    thread::sleep(Duration::from_millis(5));
    assert_eq!(probe.accepted_frames(), moved);
}
