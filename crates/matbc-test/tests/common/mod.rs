//! Shared scenario and input generator for the integration tests

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::Rng;

use matbc_core::{GaugeRef, InputPayload};
use matbc_state::{LIGHT_COUNT, PUMP_COUNT, RADIOS, SCALE_COUNT};

/// Every task running, a few scripted failures, a long tail before `end`
pub const BATTERY: &str = "\
# task battery used by the integration tests
0:00:00;sysmon;start
0:00:00;track;start
0:00:00;communications;start
0:00:00;resman;start
0:00:00;collaborativematching;start
0:00:01;sysmon;scales-2-failure;up
0:00:02;sysmon;lights-1-failure;true
0:00:03;resman;tolerancelevel;800
0:00:04;communications;radio-com1-target;127.5
0:00:05;sysmon;scales-4-failure;down
0:10:00;end
";

/// A random participant input for any task except matching
pub fn random_input(rng: &mut StdRng) -> InputPayload {
    match rng.gen_range(0..4) {
        0 => {
            let gauge = if rng.gen_bool(0.5) {
                GaugeRef::Light(rng.gen_range(1..=LIGHT_COUNT))
            } else {
                GaugeRef::Scale(rng.gen_range(1..=SCALE_COUNT))
            };
            InputPayload::MonitoringAck { gauge }
        }
        1 => InputPayload::TrackingMove {
            dx: rng.gen_range(-0.2..0.2),
            dy: rng.gen_range(-0.2..0.2),
        },
        2 => InputPayload::CommunicationTune {
            radio: RADIOS[rng.gen_range(0..RADIOS.len())].to_string(),
            frequency: 108.0 + f64::from(rng.gen_range(0u32..80)) * 0.5,
        },
        _ => InputPayload::PumpToggle {
            pump: rng.gen_range(1..=PUMP_COUNT),
        },
    }
}
