//! Repeated frames never change state

mod common;

use std::time::Duration;

use matbc_core::{GaugeRef, InputPayload, TaskId};
use matbc_test::{ChaosConfig, Side, TwoPeerHarness};
use matbc_transport::TransportEvent;

const DT: Duration = Duration::from_millis(20);

/// Fixed script of inputs, so two runs differ only in what the link repeats
fn scripted_run(duplicates: f64) -> TwoPeerHarness {
    let chaos = ChaosConfig::fixed(Duration::from_millis(30)).with_duplicates(duplicates);
    let mut harness = TwoPeerHarness::new(common::BATTERY, chaos).unwrap();
    assert!(harness.start(Duration::from_secs(5)));

    for i in 0..300u32 {
        match i % 50 {
            5 => harness.input(Side::Host, InputPayload::PumpToggle { pump: (i % 8 + 1) as u8 }),
            15 => harness.input(Side::Guest, InputPayload::TrackingMove { dx: 0.05, dy: -0.02 }),
            25 => harness.input(
                Side::Guest,
                InputPayload::MonitoringAck {
                    gauge: GaugeRef::Scale((i % 4 + 1) as u8),
                },
            ),
            35 => harness.input(
                Side::Host,
                InputPayload::CommunicationTune {
                    radio: "com1".into(),
                    frequency: 127.5,
                },
            ),
            _ => {}
        }
        harness.step(DT);
    }
    assert!(harness.settle(Duration::from_millis(50), 500));
    harness
}

#[test]
fn test_duplicated_link_matches_clean_link() {
    let clean = scripted_run(0.0);
    let noisy = scripted_run(1.0);

    assert!(clean.converged(), "diverged: {:?}", clean.divergence());
    assert!(noisy.converged(), "diverged: {:?}", noisy.divergence());
    assert!(noisy.link().stats().duplicated > 0);
    assert!(noisy.peer(Side::Host).link().stats().duplicates > 0);

    for side in [Side::Host, Side::Guest] {
        assert_eq!(
            clean.peer(side).store().values(),
            noisy.peer(side).store().values(),
            "{:?} differs",
            side
        );
        assert_eq!(
            clean.peer(side).reconcile_stats().remote_inputs,
            noisy.peer(side).reconcile_stats().remote_inputs
        );
    }
}

#[test]
fn test_redelivered_frames_leave_version_unchanged() {
    let mut harness = TwoPeerHarness::new(common::BATTERY, ChaosConfig::ideal()).unwrap();
    assert!(harness.start(Duration::from_secs(5)));
    harness.run_for(Duration::from_secs(1), DT);
    let epoch = harness.link().epoch();

    let frames = {
        let guest = harness.peer_mut(Side::Guest);
        guest.submit_input(InputPayload::PumpToggle { pump: 4 });
        guest.step(Duration::ZERO);
        guest.poll_transmit()
    };
    assert!(!frames.is_empty());

    let host = harness.peer_mut(Side::Host);
    for frame in frames.clone() {
        host.on_transport(TransportEvent::Frame { epoch, frame });
    }
    host.step(Duration::ZERO);
    let version = host.store().read(TaskId::ResourceManagement).version();
    let remote_inputs = host.reconcile_stats().remote_inputs;
    assert_eq!(host.store().read(TaskId::ResourceManagement).int("pump-4-state"), 1);

    for frame in frames {
        host.on_transport(TransportEvent::Frame { epoch, frame });
    }
    host.step(Duration::ZERO);
    assert_eq!(host.store().read(TaskId::ResourceManagement).version(), version);
    assert_eq!(host.reconcile_stats().remote_inputs, remote_inputs);
}
