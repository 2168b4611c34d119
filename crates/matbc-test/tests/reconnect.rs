//! Partitions healed within the grace period lose nothing

use std::time::Duration;

use matbc_core::{InputPayload, TaskId};
use matbc_runtime::PeerPhase;
use matbc_test::{ChaosConfig, Side, TwoPeerHarness};
use matbc_transport::LinkState;

const DT: Duration = Duration::from_millis(20);

const SCENARIO: &str = "\
0:00:00;resman;start
0:00:00;track;start
0:00:03;resman;tolerancelevel;650
0:05:00;end
";

#[test]
fn test_inputs_during_partition_delivered_after_heal() {
    let mut harness =
        TwoPeerHarness::new(SCENARIO, ChaosConfig::fixed(Duration::from_millis(25))).unwrap();
    assert!(harness.start(Duration::from_secs(5)));
    harness.run_for(Duration::from_secs(1), DT);

    harness.partition();
    for pump in 1..=5u8 {
        harness.input(Side::Guest, InputPayload::PumpToggle { pump });
        harness.run_for(Duration::from_millis(400), DT);
    }
    harness.input(Side::Host, InputPayload::TrackingMove { dx: 0.1, dy: 0.1 });
    harness.run_for(Duration::from_secs(1), DT);
    for side in [Side::Host, Side::Guest] {
        assert_eq!(harness.peer(side).link().state(), LinkState::Degraded);
        assert_eq!(harness.peer(side).phase(), PeerPhase::Running);
    }

    harness.heal();
    assert!(harness.settle(DT, 500));

    let host = harness.peer(Side::Host);
    let guest = harness.peer(Side::Guest);
    assert_eq!(host.link().received_through(), guest.link().last_sequence());
    assert_eq!(guest.link().received_through(), host.link().last_sequence());
    assert_eq!(host.reconcile_stats().remote_inputs, 5);
    assert_eq!(guest.reconcile_stats().remote_inputs, 1);
    assert!(host.link().stats().reconnects >= 1);

    let resman = host.store().read(TaskId::ResourceManagement);
    for pump in 1..=5 {
        assert_eq!(resman.int(&format!("pump-{}-state", pump)), 1);
    }
    assert_eq!(resman.int("tolerancelevel"), 650);
    assert!(harness.converged(), "diverged: {:?}", harness.divergence());
}

#[test]
fn test_repeated_partitions() {
    let mut harness = TwoPeerHarness::new(SCENARIO, ChaosConfig::default()).unwrap();
    assert!(harness.start(Duration::from_secs(5)));

    for round in 0..4u8 {
        harness.input(Side::Host, InputPayload::PumpToggle { pump: round + 1 });
        harness.run_for(Duration::from_millis(10), DT);
        harness.partition();
        harness.input(Side::Guest, InputPayload::PumpToggle { pump: round + 5 });
        harness.run_for(Duration::from_secs(1), DT);
        harness.heal();
        harness.run_for(Duration::from_millis(500), DT);
    }
    assert!(harness.settle(DT, 500));

    assert_eq!(harness.link().stats().partitions, 4);
    for side in [Side::Host, Side::Guest] {
        let resman = harness.peer(side).store().read(TaskId::ResourceManagement);
        for pump in 1..=8 {
            assert_eq!(resman.int(&format!("pump-{}-state", pump)), 1, "{:?}", side);
        }
    }
    assert!(harness.converged(), "diverged: {:?}", harness.divergence());
}

#[test]
fn test_partition_beyond_grace_aborts_both_peers() {
    let mut harness = TwoPeerHarness::new(SCENARIO, ChaosConfig::default()).unwrap();
    assert!(harness.start(Duration::from_secs(5)));
    harness.run_for(Duration::from_secs(1), DT);

    harness.partition();
    harness.run_for(Duration::from_secs(32), Duration::from_millis(100));
    for side in [Side::Host, Side::Guest] {
        let peer = harness.peer(side);
        assert_eq!(peer.phase(), PeerPhase::Aborted);
        assert!(peer.link().is_closed());
        assert_eq!(peer.pending_commands(), 0);
    }
}
