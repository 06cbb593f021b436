//! End-to-end tests for the Selective-Repeat simulator.
//!
//! Each test drives a full [`Simulation`] on the virtual clock and inspects
//! the resulting event trace.  Fault modes are deterministic unless a test
//! says otherwise, so the traces are exact.

use std::time::Duration;

use selective_repeat::config::MAX_FRAMES;
use selective_repeat::controller::MAX_PACE_FACTOR;
use selective_repeat::sink::{MemoryLog, NullRenderer, Severity};
use selective_repeat::timer::TimingConfig;
use selective_repeat::{
    FaultModes, Mode, ProtocolEvent, RunStatus, SimConfig, SimError, Simulation, TraceRecord,
};

fn quiet() -> Simulation {
    Simulation::with_sinks(Box::new(MemoryLog::default()), Box::new(NullRenderer))
}

fn events(trace: &[TraceRecord]) -> Vec<ProtocolEvent> {
    trace.iter().map(|r| r.event).collect()
}

fn delivered(trace: &[TraceRecord]) -> Vec<u32> {
    trace
        .iter()
        .filter_map(|r| match r.event {
            ProtocolEvent::FrameDelivered { seq } => Some(seq),
            _ => None,
        })
        .collect()
}

fn count(trace: &[TraceRecord], wanted: impl Fn(&ProtocolEvent) -> bool) -> usize {
    trace.iter().filter(|r| wanted(&r.event)).count()
}

fn sent(seq: u32) -> ProtocolEvent {
    ProtocolEvent::FrameSent {
        seq,
        retransmission: false,
        lost: false,
        delayed: false,
    }
}

fn ack_sent(seq: u32) -> ProtocolEvent {
    ProtocolEvent::AckSent {
        seq,
        lost: false,
        delayed: false,
    }
}

/// Step through a run checking the per-event invariants, then return status.
fn run_checked(sim: &mut Simulation) -> RunStatus {
    let window = sim.config().window_size;
    let total = sim.config().total_frames;
    while sim.is_running() && sim.step() {
        let state = sim.state();
        assert!(state.outstanding() <= window, "window overrun");
        assert!(state.in_flight.len() as u32 <= window);
        for seq in 1..=total {
            assert!(
                sim.live_retransmit_timers(seq) <= 1,
                "frame {seq} has more than one live timer"
            );
        }
    }
    sim.status()
}

// ---------------------------------------------------------------------------
// Test 1: perfect channel, 5 frames, window 2
// ---------------------------------------------------------------------------

#[test]
fn test_perfect_channel_event_order() {
    let mut sim = quiet();
    sim.start(SimConfig::new(5, 2).with_seed(1)).unwrap();
    assert_eq!(run_checked(&mut sim), RunStatus::Completed);

    let trace = sim.trace();
    let prefix = vec![
        ProtocolEvent::Started {
            total_frames: 5,
            window_size: 2,
        },
        sent(1),
        sent(2),
        ProtocolEvent::FrameAccepted { seq: 1 },
        ack_sent(1),
        ProtocolEvent::FrameDelivered { seq: 1 },
        ProtocolEvent::FrameAccepted { seq: 2 },
        ack_sent(2),
        ProtocolEvent::FrameDelivered { seq: 2 },
        ProtocolEvent::AckReceived { seq: 1 },
        ProtocolEvent::WindowSlid { from: 1, to: 2 },
        ProtocolEvent::AckReceived { seq: 2 },
        ProtocolEvent::WindowSlid { from: 2, to: 3 },
        sent(3),
    ];
    assert_eq!(events(trace)[..prefix.len()], prefix[..]);

    assert_eq!(delivered(trace), vec![1, 2, 3, 4, 5]);
    assert_eq!(sim.state().window_base, 6);
    assert_eq!(events(trace).last(), Some(&ProtocolEvent::Completed));

    let stats = sim.stats();
    assert_eq!(stats.frames_sent, 5);
    assert_eq!(stats.retransmissions, 0);
    assert_eq!(stats.timeouts, 0);
}

#[test]
fn test_perfect_channel_timing() {
    let mut sim = quiet();
    sim.start(SimConfig::new(5, 2).with_seed(1)).unwrap();
    sim.run_to_completion();

    let at = |wanted: ProtocolEvent| {
        sim.trace()
            .iter()
            .find(|r| r.event == wanted)
            .map(|r| r.at)
            .unwrap()
    };
    assert_eq!(at(sent(2)), Duration::from_millis(300));
    assert_eq!(
        at(ProtocolEvent::AckReceived { seq: 1 }),
        Duration::from_millis(700)
    );
    // Frame 3 is scheduled one stagger slot above the new base.
    assert_eq!(at(sent(3)), Duration::from_millis(1000));
}

// ---------------------------------------------------------------------------
// Test 2: termination for many sizes on a perfect channel
// ---------------------------------------------------------------------------

#[test]
fn test_termination_without_faults() {
    for total in 1..=12 {
        for window in 1..=6 {
            let mut sim = quiet();
            sim.start(SimConfig::new(total, window).with_seed(1)).unwrap();
            assert_eq!(run_checked(&mut sim), RunStatus::Completed);
            assert_eq!(sim.state().window_base, total + 1);
            assert_eq!(delivered(sim.trace()), (1..=total).collect::<Vec<_>>());
        }
    }
}

// ---------------------------------------------------------------------------
// Test 3: one lost frame, 4 frames, window 4
// ---------------------------------------------------------------------------

#[test]
fn test_fixed_frame_loss_recovers_after_timeout() {
    let modes = FaultModes {
        frame_loss: Mode::FixedIndex(2),
        ..FaultModes::none()
    };
    let mut sim = quiet();
    sim.start(SimConfig::new(4, 4).with_modes(modes).with_seed(1))
        .unwrap();
    assert_eq!(run_checked(&mut sim), RunStatus::Completed);

    let trace = sim.trace();
    assert_eq!(count(trace, |e| *e == ProtocolEvent::FrameLost { seq: 2 }), 1);

    let timeout = trace
        .iter()
        .find(|r| r.event == ProtocolEvent::Timeout { seq: 2 })
        .unwrap();
    assert_eq!(timeout.at, Duration::from_millis(5300));

    // 3 and 4 arrive first but wait in the buffer for 2.
    let pos = |wanted: ProtocolEvent| trace.iter().position(|r| r.event == wanted).unwrap();
    assert!(pos(ProtocolEvent::FrameAccepted { seq: 3 }) < pos(ProtocolEvent::Timeout { seq: 2 }));
    assert!(pos(ProtocolEvent::FrameAccepted { seq: 4 }) < pos(ProtocolEvent::Timeout { seq: 2 }));
    assert!(pos(ProtocolEvent::Timeout { seq: 2 }) < pos(ProtocolEvent::FrameDelivered { seq: 3 }));

    assert_eq!(delivered(trace), vec![1, 2, 3, 4]);
    assert_eq!(
        trace.last().unwrap(),
        &TraceRecord {
            at: Duration::from_millis(6000),
            event: ProtocolEvent::Completed
        }
    );
    assert_eq!(sim.state().receiver_base, 5);
}

#[test]
fn test_fixed_loss_fires_only_once() {
    let modes = FaultModes {
        frame_loss: Mode::FixedIndex(3),
        ..FaultModes::none()
    };
    let mut sim = quiet();
    sim.start(SimConfig::new(6, 2).with_modes(modes).with_seed(1))
        .unwrap();
    assert_eq!(run_checked(&mut sim), RunStatus::Completed);

    let trace = sim.trace();
    assert_eq!(count(trace, |e| matches!(e, ProtocolEvent::FrameLost { .. })), 1);
    assert_eq!(
        count(trace, |e| matches!(e, ProtocolEvent::FrameSent { seq: 3, .. })),
        2
    );
    assert_eq!(delivered(trace), (1..=6).collect::<Vec<_>>());
}

#[test]
fn test_every_kth_loss_on_both_sides() {
    let modes = FaultModes {
        frame_loss: Mode::EveryKth(2),
        ack_loss: Mode::EveryKth(3),
        ..FaultModes::none()
    };
    let mut sim = quiet();
    sim.start(SimConfig::new(9, 3).with_modes(modes).with_seed(1))
        .unwrap();
    assert_eq!(run_checked(&mut sim), RunStatus::Completed);

    let stats = sim.stats();
    assert_eq!(stats.frames_lost, 4); // 2, 4, 6, 8
    assert_eq!(stats.acks_lost, 3); // 3, 6, 9
    assert_eq!(delivered(sim.trace()), (1..=9).collect::<Vec<_>>());
}

// ---------------------------------------------------------------------------
// Test 4: lost ACK is recovered through the duplicate re-ACK
// ---------------------------------------------------------------------------

#[test]
fn test_lost_ack_recovered_by_duplicate() {
    let modes = FaultModes {
        ack_loss: Mode::FixedIndex(1),
        ..FaultModes::none()
    };
    let mut sim = quiet();
    sim.start(SimConfig::new(2, 2).with_modes(modes).with_seed(1))
        .unwrap();
    assert_eq!(run_checked(&mut sim), RunStatus::Completed);

    let trace = sim.trace();
    assert_eq!(count(trace, |e| *e == ProtocolEvent::AckLost { seq: 1 }), 1);
    assert!(events(trace).contains(&ProtocolEvent::FrameDiscarded {
        seq: 1,
        receiver_base: 3,
        window_last: 4,
    }));
    // Delivered once, acknowledged once.
    assert_eq!(delivered(trace), vec![1, 2]);
    assert_eq!(count(trace, |e| *e == ProtocolEvent::AckReceived { seq: 1 }), 1);
}

// ---------------------------------------------------------------------------
// Test 5: stale ACK after the window moved on
// ---------------------------------------------------------------------------

#[test]
fn test_stale_ack_is_ignored() {
    // A timeout shorter than the round trip makes frame 1 go out twice, so a
    // second ACK 1 arrives after the window has already slid past it.
    let timing = TimingConfig {
        retransmit_timeout: Duration::from_millis(500),
        ..TimingConfig::default()
    };
    let mut sim = quiet();
    sim.start(SimConfig::new(3, 1).with_timing(timing).with_seed(1))
        .unwrap();
    assert_eq!(run_checked(&mut sim), RunStatus::Completed);

    let trace = sim.trace();
    assert!(sim.stats().stale_acks >= 1);
    assert_eq!(count(trace, |e| *e == ProtocolEvent::AckReceived { seq: 1 }), 1);
    assert_eq!(delivered(trace), vec![1, 2, 3]);
}

// ---------------------------------------------------------------------------
// Test 6: lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_huge_window_runs_to_completion() {
    let mut sim = quiet();
    sim.start(SimConfig::new(3, u32::MAX).with_seed(1)).unwrap();
    assert_eq!(sim.config().window_size, 3);
    assert_eq!(run_checked(&mut sim), RunStatus::Completed);
    assert_eq!(delivered(sim.trace()), vec![1, 2, 3]);
}

#[test]
fn test_huge_frame_count_is_capped() {
    let mut sim = quiet();
    sim.start(SimConfig::new(u32::MAX, 2).with_seed(1)).unwrap();
    assert_eq!(sim.config().total_frames, MAX_FRAMES);
    sim.run_for(Duration::from_millis(2000));
    assert!(sim.is_running());
    assert!(sim.stop());
}

#[test]
fn test_start_while_running_is_rejected() {
    let mut sim = quiet();
    sim.start(SimConfig::new(4, 2).with_seed(1)).unwrap();
    assert_eq!(sim.start(SimConfig::new(4, 2)), Err(SimError::AlreadyRunning));
    assert_eq!(sim.run_to_completion(), RunStatus::Completed);
    // A finished simulation can be started again.
    sim.start(SimConfig::new(2, 1).with_seed(2)).unwrap();
    assert_eq!(sim.run_to_completion(), RunStatus::Completed);
    assert_eq!(delivered(sim.trace()), vec![1, 2]);
}

#[test]
fn test_stale_events_from_stopped_run_are_ignored() {
    let mut sim = quiet();
    sim.start(SimConfig::new(6, 3).with_seed(1)).unwrap();
    sim.run_for(Duration::from_millis(650));
    assert!(sim.stop());
    let stopped_trace = sim.trace().len();

    // Frames and ACKs still in transit fire but change nothing.
    let mut drained = 0;
    while sim.step() {
        drained += 1;
    }
    assert!(drained > 0);
    assert_eq!(sim.trace().len(), stopped_trace);
    assert_eq!(sim.status(), RunStatus::Stopped);
}

#[test]
fn test_restart_is_not_disturbed_by_previous_run() {
    let mut sim = quiet();
    sim.start(SimConfig::new(6, 3).with_seed(1)).unwrap();
    sim.run_for(Duration::from_millis(650));
    sim.reset();

    sim.start(SimConfig::new(3, 3).with_seed(1)).unwrap();
    assert_eq!(run_checked(&mut sim), RunStatus::Completed);
    let trace = sim.trace();
    assert_eq!(delivered(trace), vec![1, 2, 3]);
    assert_eq!(count(trace, |e| matches!(e, ProtocolEvent::FrameSent { .. })), 3);
    assert_eq!(trace[0].at, Duration::ZERO);
}

#[test]
fn test_log_sink_receives_one_line_per_event() {
    let log = MemoryLog::default();
    let mut sim = Simulation::with_sinks(Box::new(log.clone()), Box::new(NullRenderer));
    sim.start(
        SimConfig::new(3, 2)
            .with_modes(FaultModes {
                frame_loss: Mode::FixedIndex(1),
                ..FaultModes::none()
            })
            .with_seed(1),
    )
    .unwrap();
    sim.run_to_completion();

    let entries = log.entries();
    assert_eq!(entries.len(), sim.trace().len());
    assert!(entries.contains(&("Frame 1 lost".to_string(), Severity::Error)));
    assert!(entries.contains(&(
        "Timeout for frame 1, retransmitting".to_string(),
        Severity::Warning
    )));
    assert_eq!(
        entries.last(),
        Some(&("Simulation complete".to_string(), Severity::Success))
    );
}

// ---------------------------------------------------------------------------
// Test 7: random faults with a fixed seed
// ---------------------------------------------------------------------------

#[test]
fn test_random_faults_are_reproducible_and_terminate() {
    let modes = FaultModes {
        frame_delay: Mode::Random,
        frame_loss: Mode::Random,
        ack_delay: Mode::Random,
        ack_loss: Mode::Random,
    };
    let config = SimConfig::new(20, 4).with_modes(modes).with_seed(2024);

    let mut a = quiet();
    a.start(config.clone()).unwrap();
    assert_eq!(run_checked(&mut a), RunStatus::Completed);

    let mut b = quiet();
    b.start(config).unwrap();
    b.run_to_completion();

    assert_eq!(a.trace(), b.trace());
    assert_eq!(delivered(a.trace()), (1..=20).collect::<Vec<_>>());
}

// ---------------------------------------------------------------------------
// Test 8: paced driver
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_paced_run_completes() {
    let mut sim = quiet();
    let mut running = sim.subscribe();
    sim.start(SimConfig::new(4, 2).with_seed(1)).unwrap();
    assert!(*running.borrow_and_update());

    let started = tokio::time::Instant::now();
    let status = sim.run_paced(1.0).await;
    assert_eq!(status, RunStatus::Completed);
    assert!(running.has_changed().unwrap());
    assert!(!*running.borrow_and_update());
    // Real (paused) time covers at least the simulated run.
    assert!(started.elapsed() >= sim.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_paced_run_honours_shutdown() {
    let mut sim = quiet();
    sim.start(SimConfig::new(8, 4).with_seed(1)).unwrap();
    let status = sim
        .run_paced_until(1.0, tokio::time::sleep(Duration::from_millis(1000)))
        .await;
    assert_eq!(status, RunStatus::Stopped);
    assert_eq!(sim.trace().last().unwrap().event, ProtocolEvent::Stopped);
    assert!(sim.state().in_flight.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_paced_run_survives_extreme_factors() {
    for factor in [f64::INFINITY, 1e300, f64::NAN, -1.0] {
        let mut sim = quiet();
        sim.start(SimConfig::new(3, 2).with_seed(1)).unwrap();
        let started = tokio::time::Instant::now();
        assert_eq!(sim.run_paced(factor).await, RunStatus::Completed);
        let ceiling = sim.elapsed().mul_f64(MAX_PACE_FACTOR) + Duration::from_secs(1);
        assert!(started.elapsed() <= ceiling);
    }
}
