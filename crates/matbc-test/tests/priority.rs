//! Same-second scenario commands dispatch by descending priority

use std::time::Duration;

use matbc_core::{FieldValue, TaskId};
use matbc_test::{ChaosConfig, Side, TwoPeerHarness};

const SCENARIO: &str = "\
0:00:00;resman;start
0:00:05-2;resman;tolerancelevel;100
0:00:05-9;resman;tolerancelevel;900
0:01:00;end
";

#[test]
fn test_higher_priority_applies_first_and_lower_wins() {
    let mut harness = TwoPeerHarness::new(SCENARIO, ChaosConfig::default()).unwrap();
    assert!(harness.start(Duration::from_secs(5)));
    harness.run_for(Duration::from_secs(6), Duration::from_millis(50));
    assert!(harness.settle(Duration::from_millis(50), 200));

    for side in [Side::Host, Side::Guest] {
        let levels: Vec<FieldValue> = harness
            .log(side)
            .iter()
            .filter(|r| r.task_id == "resman")
            .flat_map(|r| r.payload.iter())
            .filter(|c| c.key.as_str() == "tolerancelevel")
            .map(|c| c.value.clone())
            .collect();
        assert_eq!(levels, vec![FieldValue::Int(900), FieldValue::Int(100)], "{:?}", side);

        let resman = harness.peer(side).store().read(TaskId::ResourceManagement);
        assert_eq!(resman.int("tolerancelevel"), 100);
    }
    assert!(harness.converged(), "diverged: {:?}", harness.divergence());
}
