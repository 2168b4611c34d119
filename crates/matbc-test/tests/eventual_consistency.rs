//! Both peers converge field by field once the link has drained

mod common;

use std::time::Duration;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use matbc_test::{ChaosConfig, Side, TwoPeerHarness};

const DT: Duration = Duration::from_millis(20);

/// Random inputs on both sides for `steps` steps, optionally with a
/// partition in the middle, then drain.
fn run_session(chaos: ChaosConfig, seed: u64, steps: usize, partition: bool) -> TwoPeerHarness {
    let mut harness = TwoPeerHarness::new(common::BATTERY, chaos).unwrap();
    assert!(harness.start(Duration::from_secs(5)));

    let mut rng = StdRng::seed_from_u64(seed);
    for i in 0..steps {
        if partition && i == steps / 3 {
            harness.partition();
        }
        if partition && i == steps / 3 + 100 {
            harness.heal();
        }
        for side in [Side::Host, Side::Guest] {
            if rng.gen_bool(0.3) {
                let input = common::random_input(&mut rng);
                harness.input(side, input);
            }
        }
        harness.step(DT);
    }

    if !harness.link().is_connected() {
        harness.heal();
    }
    assert!(harness.settle(Duration::from_millis(50), 2_000), "link never drained");
    harness
}

#[test]
fn test_converges_over_ideal_link() {
    let harness = run_session(ChaosConfig::ideal(), 1, 300, false);
    assert!(harness.converged(), "diverged: {:?}", harness.divergence());
}

#[test]
fn test_converges_over_poor_link() {
    for seed in 0..4 {
        let harness = run_session(ChaosConfig::poor().with_seed(seed), seed, 400, false);
        assert!(
            harness.converged(),
            "seed {} diverged: {:?}",
            seed,
            harness.divergence()
        );
    }
}

#[test]
fn test_converges_across_partition() {
    let harness = run_session(ChaosConfig::default(), 7, 400, true);
    assert!(harness.converged(), "diverged: {:?}", harness.divergence());
    assert_eq!(harness.link().stats().partitions, 1);
    assert!(harness.peer(Side::Host).link().stats().reconnects >= 1);
}

#[test]
fn test_scripted_state_identical_without_input() {
    let mut harness = TwoPeerHarness::new(common::BATTERY, ChaosConfig::default()).unwrap();
    assert!(harness.start(Duration::from_secs(5)));
    harness.run_for(Duration::from_secs(8), DT);
    assert!(harness.settle(Duration::from_millis(50), 500));

    assert!(harness.converged(), "diverged: {:?}", harness.divergence());
    let sysmon = harness
        .peer(Side::Guest)
        .store()
        .read(matbc_core::TaskId::SystemMonitoring);
    assert_eq!(sysmon.text("scales-4-failure"), "down");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_any_input_sequence_converges(seed in any::<u64>(), duplicates in 0.0f64..0.3) {
        let chaos = ChaosConfig::default().with_seed(seed).with_duplicates(duplicates);
        let harness = run_session(chaos, seed, 150, seed % 2 == 0);
        prop_assert!(harness.converged(), "diverged: {:?}", harness.divergence());
    }
}
