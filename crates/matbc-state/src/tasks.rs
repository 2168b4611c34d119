//! Task semantics
//!
//! Default fields of each task, how scripted commands write them, and how
//! participant inputs translate into field changes. Both peers run the same
//! functions, so a forwarded input recomputes the same writes.

use tracing::debug;

use matbc_core::{
    FieldChange, FieldKey, FieldValue, GaugeRef, InputPayload, Stamp, TaskId,
};
use matbc_scenario::Action;

use crate::store::TaskState;

/// Number of system monitoring lights
pub const LIGHT_COUNT: u8 = 2;
/// Number of system monitoring scales
pub const SCALE_COUNT: u8 = 4;
/// Number of resource management pumps
pub const PUMP_COUNT: u8 = 8;
/// Communication radios
pub const RADIOS: [&str; 4] = ["nav1", "nav2", "com1", "com2"];

/// Pump states, as written in scenarios
pub const PUMP_OFF: i64 = 0;
pub const PUMP_ON: i64 = 1;
pub const PUMP_FAILED: i64 = -1;

/// Tracking cursor bound on both axes
pub const CURSOR_LIMIT: f64 = 1.0;

/// Score penalty for an expired matching round
pub const MATCH_TIMEOUT_PENALTY: i64 = 1000;

fn text(s: &str) -> FieldValue {
    FieldValue::text(s)
}

fn field(key: impl Into<FieldKey>, value: FieldValue) -> (FieldKey, FieldValue) {
    (key.into(), value)
}

/// Network modes a task can run in. `no` keeps the task local to each peer;
/// the others share it between the participants.
pub const NETWORK_MODES: [&str; 4] = ["no", "client", "server", "as_host"];

/// Network mode a task starts with
pub const DEFAULT_NETWORK_MODE: &str = "as_host";

/// Fields of every task, including display-only ones
fn display_fields(title: &str, placement: &str, update_ms: i64) -> Vec<(FieldKey, FieldValue)> {
    vec![
        field("running", FieldValue::Bool(false)),
        field("visible", FieldValue::Bool(false)),
        field("paused", FieldValue::Bool(false)),
        field("title", text(title)),
        field("taskplacement", text(placement)),
        field("taskupdatetime", FieldValue::Int(update_ms)),
    ]
}

fn common_fields(title: &str, placement: &str, update_ms: i64) -> Vec<(FieldKey, FieldValue)> {
    let mut fields = display_fields(title, placement, update_ms);
    fields.extend([
        field("score", FieldValue::Int(0)),
        field("network", text(DEFAULT_NETWORK_MODE)),
        field("resetperformance", text("")),
    ]);
    fields
}

/// Fields every task starts a session with
pub fn default_fields(task: TaskId) -> Vec<(FieldKey, FieldValue)> {
    match task {
        TaskId::SystemMonitoring => {
            let mut fields = common_fields("System monitoring", "topleft", 200);
            fields.extend([
                field("alerttimeout", FieldValue::Int(10_000)),
                field("automaticsolver", FieldValue::Bool(false)),
                field("automaticsolverdelay", FieldValue::Int(1000)),
                field("displayautomationstate", FieldValue::Bool(false)),
                field("allowanykey", FieldValue::Bool(false)),
                field("scalesnumofboxes", FieldValue::Int(11)),
                field("safezonelength", FieldValue::Int(3)),
                field("scalestyle", FieldValue::Int(1)),
            ]);
            for (kind, color) in [("positive", "#ffff00"), ("negative", "#ff0000")] {
                fields.extend([
                    field(format!("feedbacks-{}-active", kind), FieldValue::Bool(true)),
                    field(format!("feedbacks-{}-color", kind), text(color)),
                    field(format!("feedbacks-{}-duration", kind), FieldValue::Int(1500)),
                    field(format!("feedbacks-{}-trigger", kind), FieldValue::Int(0)),
                ]);
            }
            for (n, name, on, color) in [(1u8, "F5", true, "#009900"), (2, "F6", false, "#FF0000")] {
                let prefix = GaugeRef::Light(n).prefix();
                fields.extend([
                    field(format!("{}-name", prefix), text(name)),
                    field(format!("{}-failure", prefix), FieldValue::Bool(false)),
                    field(format!("{}-on", prefix), FieldValue::Bool(on)),
                    field(format!("{}-default", prefix), text(if on { "on" } else { "off" })),
                    field(format!("{}-oncolor", prefix), text(color)),
                    field(format!("{}-keys", prefix), text(name)),
                ]);
            }
            for n in 1..=SCALE_COUNT {
                let prefix = GaugeRef::Scale(n).prefix();
                let name = format!("F{}", n);
                fields.extend([
                    field(format!("{}-name", prefix), text(&name)),
                    field(format!("{}-failure", prefix), text("no")),
                    field(format!("{}-keys", prefix), text(&name)),
                ]);
            }
            fields
        }
        TaskId::Tracking => {
            let mut fields = common_fields("Tracking", "topmid", 20);
            fields.extend([
                field("cursor", FieldValue::Point { x: 0.0, y: 0.0 }),
                field("cursorcolor", text("#0000FF")),
                field("cursorcoloroutside", text("#0000FF")),
                field("automaticsolver", FieldValue::Bool(false)),
                field("displayautomationstate", FieldValue::Bool(false)),
                field("assistedsolver", FieldValue::Bool(false)),
                field("targetradius", FieldValue::Float(0.1)),
                field("joystickforce", FieldValue::Float(1.0)),
                field("cutofffrequency", FieldValue::Float(0.06)),
                field("equalproportions", FieldValue::Bool(true)),
                field("multiplier", FieldValue::Float(1.0)),
                field("setcursorx", FieldValue::Float(-2.0)),
                field("setcursory", FieldValue::Float(-2.0)),
                field("settime", FieldValue::Float(-1.0)),
            ]);
            fields
        }
        TaskId::Communications => {
            let mut fields = common_fields("Communications", "bottomleft", 50);
            for (radio, freq) in RADIOS.iter().zip([112.5, 112.5, 126.5, 126.5]) {
                fields.push(field(format!("radio-{}-frequency", radio), FieldValue::Float(freq)));
                fields.push(field(format!("radio-{}-target", radio), FieldValue::Float(freq)));
            }
            fields.extend([
                field("owncallsign", text("")),
                field("othercallsignnumber", FieldValue::Int(5)),
                field("voicegender", text("male")),
                field("voiceidiom", text("english")),
                field("radioprompt", text("")),
                field("nextradiooverride", text("")),
                field("nextfrequencyoverride", text("")),
                field("nextcallsignoverride", text("")),
            ]);
            fields
        }
        TaskId::ResourceManagement => {
            let mut fields = common_fields("Resources management", "bottommid", 2000);
            fields.extend([
                field("heuristicsolver", FieldValue::Bool(false)),
                field("assistedsolver", FieldValue::Bool(false)),
                field("displayautomationstate", FieldValue::Bool(false)),
                field("pumpcoloroff", text("#AAAAAA")),
                field("pumpcoloron", text("#00FF00")),
                field("pumpcolorfailure", text("#FF0000")),
                field("tolerancelevel", FieldValue::Int(500)),
                field("displaytolerance", FieldValue::Bool(true)),
                field("progresstimertime", FieldValue::Int(0)),
                field("progresstimer-started", FieldValue::Int(0)),
            ]);
            let flows = [800, 600, 800, 600, 600, 600, 400, 400];
            for (n, flow) in (1..=PUMP_COUNT).zip(flows) {
                fields.extend([
                    field(format!("pump-{}-state", n), FieldValue::Int(PUMP_OFF)),
                    field(format!("pump-{}-flow", n), FieldValue::Int(flow)),
                    field(format!("pump-{}-keys", n), text(&n.to_string())),
                    field(format!("pump-{}-hide", n), FieldValue::Int(0)),
                ]);
            }
            let tanks = [
                ("a", 2500, 4000, 2500, 1, 800),
                ("b", 2500, 4000, 2500, 1, 800),
                ("c", 1000, 2000, -1, 1, 0),
                ("d", 1000, 2000, -1, 1, 0),
                ("e", 3000, 4000, -1, 0, 0),
                ("f", 3000, 4000, -1, 0, 0),
            ];
            for (tank, level, max, target, depletable, loss) in tanks {
                fields.extend([
                    field(format!("tank-{}-level", tank), FieldValue::Int(level)),
                    field(format!("tank-{}-max", tank), FieldValue::Int(max)),
                    field(format!("tank-{}-target", tank), FieldValue::Int(target)),
                    field(format!("tank-{}-depletable", tank), FieldValue::Int(depletable)),
                    field(format!("tank-{}-lossperminute", tank), FieldValue::Int(loss)),
                    field(format!("tank-{}-hide", tank), FieldValue::Int(0)),
                ]);
            }
            fields
        }
        TaskId::CollaborativeMatching => {
            let mut fields = common_fields("Collaborative Matching", "topmid", 20);
            fields.extend([
                field("joystickmovementmult", FieldValue::Float(500.0)),
                field("joystickaccelmult", FieldValue::Float(0.5)),
                field("joystickdeadzone", FieldValue::Float(0.05)),
                field("driftmultiplier", FieldValue::Float(1.0)),
                field("sceneminx", FieldValue::Int(-2000)),
                field("scenemaxx", FieldValue::Int(2000)),
                field("sceneminy", FieldValue::Int(-2000)),
                field("scenemaxy", FieldValue::Int(2000)),
                field("viewposx", FieldValue::Float(0.0)),
                field("viewposy", FieldValue::Float(0.0)),
                field("viewvelx", FieldValue::Float(0.0)),
                field("viewvely", FieldValue::Float(0.0)),
                field("nextobjectimage", text("")),
                field("nextobjectposx", FieldValue::Float(0.0)),
                field("nextobjectposy", FieldValue::Float(0.0)),
                field("nextobjecttypeid", FieldValue::Int(0)),
                field("nextobjectsizex", FieldValue::Int(100)),
                field("nextobjectsizey", FieldValue::Int(100)),
                field("selectedobjectid", FieldValue::Int(-1)),
                field("targetobjectid", FieldValue::Int(-1)),
                field("timelimit", FieldValue::Int(10_000)),
                field("currenttime", FieldValue::Int(0)),
                field("objectcount", FieldValue::Int(0)),
                field("round-number", FieldValue::Int(0)),
                field("round-status", text("none")),
                field("round-deadline", FieldValue::Int(0)),
            ]);
            for n in 1..=2 {
                fields.extend([
                    field(format!("window-{}-minx", n), FieldValue::Int(-2000)),
                    field(format!("window-{}-maxx", n), FieldValue::Int(2000)),
                    field(format!("window-{}-miny", n), FieldValue::Int(-2000)),
                    field(format!("window-{}-maxy", n), FieldValue::Int(2000)),
                ]);
            }
            fields
        }
        TaskId::Scoreboard => display_fields("Scoreboard", "topright", 1000),
        TaskId::Instruction => {
            let mut fields = display_fields("Instruction", "fullscreen", 0);
            fields.extend([
                field("filename", text("")),
                field("pointsize", FieldValue::Int(0)),
                field("durationsec", FieldValue::Int(0)),
                field("mindurationsec", FieldValue::Int(0)),
                field("image", text("")),
                field("network", text(DEFAULT_NETWORK_MODE)),
            ]);
            fields
        }
        TaskId::GenericScales => {
            let mut fields = display_fields("Generic scales", "fullscreen", 0);
            fields.extend([
                field("filename", text("")),
                field("network", text(DEFAULT_NETWORK_MODE)),
            ]);
            fields
        }
        TaskId::Flag => {
            let mut fields = display_fields("Flag", "none", 0);
            fields.push(field("flag", text("")));
            fields
        }
    }
}

/// Scripted alias for a radio frequency, `updatefrequency-COM_1` for
/// `radio-com1-frequency`
fn radio_alias(task: TaskId, key: &FieldKey) -> Option<FieldKey> {
    if task != TaskId::Communications {
        return None;
    }
    let radio = key.as_str().strip_prefix("updatefrequency-")?;
    let radio = radio.replace('_', "").to_ascii_lowercase();
    RADIOS
        .contains(&radio.as_str())
        .then(|| FieldKey::new(format!("radio-{}-frequency", radio)))
}

/// Whether a scenario may set `key` on `task`
pub fn is_known_parameter(task: TaskId, key: &FieldKey) -> bool {
    radio_alias(task, key).is_some() || default_fields(task).iter().any(|(k, _)| k == key)
}

/// Whether the task is shared between the participants. Local tasks are
/// neither forwarded nor updated from the peer.
pub fn is_shared(state: &TaskState) -> bool {
    state.task().takes_input() && state.text("network") != "no"
}

/// Hits and false alarms over every participant
pub fn monitoring_totals(state: &TaskState) -> (i64, i64) {
    let mut totals = (0, 0);
    for (key, cell) in state.iter() {
        let count = cell.value.as_int().unwrap_or(0);
        if key.as_str().starts_with("performance-hit-") {
            totals.0 += count;
        } else if key.as_str().starts_with("performance-fa-") {
            totals.1 += count;
        }
    }
    totals
}

/// Field writes of a task action. Matching scene actions are handled by the
/// matching coordinator and produce nothing here.
pub fn action_changes(action: Action, stamp: Stamp) -> Vec<FieldChange> {
    let flags: &[(&str, bool)] = match action {
        Action::Start => &[("running", true), ("visible", true), ("paused", false)],
        Action::Stop => &[("running", false), ("visible", false), ("paused", true)],
        Action::Show => &[("visible", true)],
        Action::Hide => &[("visible", false)],
        Action::Pause => &[("paused", true)],
        Action::Resume => &[("paused", false)],
        Action::ProgressTimerStart => {
            let started = i64::try_from(stamp.at.as_millis()).unwrap_or(i64::MAX);
            return vec![FieldChange::new("progresstimer-started", FieldValue::Int(started), stamp)];
        }
        Action::End | Action::AddObject | Action::NewRound => &[],
    };
    flags
        .iter()
        .map(|(k, v)| FieldChange::new(*k, FieldValue::Bool(*v), stamp))
        .collect()
}

/// Field writes of a scripted parameter. The raw value is coerced to the
/// field's current type; `None` if it does not parse.
pub fn parameter_changes(
    state: &TaskState,
    key: &FieldKey,
    raw: &str,
    stamp: Stamp,
) -> Option<Vec<FieldChange>> {
    let key = &radio_alias(state.task(), key).unwrap_or_else(|| key.clone());
    let value = match state.cell(key) {
        Some(cell) => cell.value.coerce(raw)?,
        None => FieldValue::infer(raw),
    };
    if key.as_str() == "network" && !value.as_text().is_some_and(|m| NETWORK_MODES.contains(&m)) {
        return None;
    }
    let mut changes = Vec::with_capacity(2);

    // A light failure shows the light in the opposite of its default state
    if state.task() == TaskId::SystemMonitoring {
        if let Some(n) = light_of(key, "failure") {
            if let Some(failing) = value.as_bool() {
                let default_on = state.text(&format!("lights-{}-default", n)) == "on";
                let on = if failing { !default_on } else { default_on };
                changes.push(FieldChange::new(
                    format!("lights-{}-on", n),
                    FieldValue::Bool(on),
                    stamp,
                ));
            }
        }
    }

    changes.insert(0, FieldChange::new(key.clone(), value, stamp));
    Some(changes)
}

fn light_of(key: &FieldKey, leaf: &str) -> Option<u8> {
    let mut segments = key.segments();
    match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some("lights"), Some(n), Some(l), None) if l == leaf => n.parse().ok(),
        _ => None,
    }
}

/// Field writes caused by a participant input, computed against the task's
/// current state. Matching selections go through the coordinator instead.
pub fn input_changes(state: &TaskState, payload: &InputPayload, stamp: Stamp) -> Vec<FieldChange> {
    if !state.accepts_input() {
        debug!(task = %state.task(), "input ignored, task not running");
        return Vec::new();
    }

    match payload {
        InputPayload::MonitoringAck { gauge } => monitoring_ack(state, *gauge, stamp),
        InputPayload::TrackingMove { dx, dy } => {
            let (x, y) = state
                .get("cursor")
                .and_then(FieldValue::as_point)
                .unwrap_or((0.0, 0.0));
            let x = (x + dx).clamp(-CURSOR_LIMIT, CURSOR_LIMIT);
            let y = (y + dy).clamp(-CURSOR_LIMIT, CURSOR_LIMIT);
            vec![FieldChange::new("cursor", FieldValue::Point { x, y }, stamp)]
        }
        InputPayload::CommunicationTune { radio, frequency } => {
            let key = FieldKey::new(format!("radio-{}-frequency", radio));
            if !state.contains(&key) {
                debug!(radio = %radio, "unknown radio");
                return Vec::new();
            }
            vec![FieldChange::new(key, FieldValue::Float(*frequency), stamp)]
        }
        InputPayload::PumpToggle { pump } => {
            let key = format!("pump-{}-state", pump);
            match state.get(&key).and_then(FieldValue::as_int) {
                Some(PUMP_OFF) => vec![FieldChange::new(key, FieldValue::Int(PUMP_ON), stamp)],
                Some(PUMP_ON) => vec![FieldChange::new(key, FieldValue::Int(PUMP_OFF), stamp)],
                // Failed or unknown pumps ignore toggles
                _ => Vec::new(),
            }
        }
        InputPayload::MatchCentering { .. } | InputPayload::MatchSelect { .. } => Vec::new(),
    }
}

/// An acknowledgement always writes the same fields, whatever the gauge
/// state. The peer re-runs the ack against its own state and then receives
/// this peer's values under the same stamp; with equal field sets the latter
/// replace the former entirely.
///
/// Hit and false alarm counters are kept per participant. Each counter has a
/// single writer, so concurrent acks from both participants all count.
fn monitoring_ack(state: &TaskState, gauge: GaugeRef, stamp: Stamp) -> Vec<FieldChange> {
    let prefix = gauge.prefix();
    let failure_key = format!("{}-failure", prefix);
    if state.get(&failure_key).is_none() {
        debug!(gauge = %prefix, "unknown gauge");
        return Vec::new();
    }
    let Some(participant) = stamp.writer.participant() else {
        debug!(gauge = %prefix, "ack without a participant ignored");
        return Vec::new();
    };
    let failing = match gauge {
        GaugeRef::Light(_) => state.bool(&failure_key),
        GaugeRef::Scale(_) => matches!(state.text(&failure_key), "up" | "down"),
    };

    let hit_key = format!("performance-hit-{}", participant.0);
    let fa_key = format!("performance-fa-{}", participant.0);
    let (mut hits, mut false_alarms) = (state.int(&hit_key), state.int(&fa_key));
    if failing {
        hits += 1;
    } else {
        false_alarms += 1;
    }
    let mut changes = vec![
        FieldChange::new(hit_key, FieldValue::Int(hits), stamp),
        FieldChange::new(fa_key, FieldValue::Int(false_alarms), stamp),
    ];

    // A hit resets the gauge; otherwise its current state is rewritten
    match gauge {
        GaugeRef::Light(_) => {
            let on = if failing {
                state.text(&format!("{}-default", prefix)) == "on"
            } else {
                state.bool(&format!("{}-on", prefix))
            };
            changes.push(FieldChange::new(failure_key, FieldValue::Bool(false), stamp));
            changes.push(FieldChange::new(format!("{}-on", prefix), FieldValue::Bool(on), stamp));
        }
        GaugeRef::Scale(_) => {
            let value = if failing { text("no") } else { text(state.text(&failure_key)) };
            changes.push(FieldChange::new(failure_key, value, stamp));
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaskStateStore;
    use matbc_core::{Mutation, MutationOrigin, ParticipantId, SessionTime, Writer};

    fn stamp(ms: u64) -> Stamp {
        Stamp {
            at: SessionTime::from_millis(ms),
            counter: 0,
            writer: Writer::Participant(ParticipantId::new(1)),
        }
    }

    fn started(task: TaskId) -> TaskStateStore {
        let mut store = TaskStateStore::new();
        store.apply(Mutation::new(
            task,
            MutationOrigin::Scenario,
            action_changes(Action::Start, Stamp::scripted(SessionTime::ZERO)),
        ));
        store
    }

    #[test]
    fn test_known_parameters() {
        assert!(is_known_parameter(TaskId::SystemMonitoring, &"scales-2-failure".into()));
        assert!(is_known_parameter(TaskId::SystemMonitoring, &"feedbacks-positive-duration".into()));
        assert!(is_known_parameter(TaskId::ResourceManagement, &"tank-c-level".into()));
        assert!(is_known_parameter(TaskId::CollaborativeMatching, &"window-2-maxy".into()));
        assert!(!is_known_parameter(TaskId::Tracking, &"pump-1-state".into()));
    }

    #[test]
    fn test_generated_parameters_known() {
        for (task, key) in [
            (TaskId::Tracking, "multiplier"),
            (TaskId::Tracking, "setcursorx"),
            (TaskId::Tracking, "settime"),
            (TaskId::SystemMonitoring, "network"),
            (TaskId::SystemMonitoring, "scalestyle"),
            (TaskId::SystemMonitoring, "automaticsolverdelay"),
            (TaskId::SystemMonitoring, "resetperformance"),
            (TaskId::CollaborativeMatching, "joystickdeadzone"),
            (TaskId::CollaborativeMatching, "viewposx"),
            (TaskId::CollaborativeMatching, "selectedobjectid"),
            (TaskId::ResourceManagement, "progresstimertime"),
            (TaskId::ResourceManagement, "tank-e-depletable"),
            (TaskId::Communications, "owncallsign"),
            (TaskId::Communications, "updatefrequency-COM_1"),
            (TaskId::Communications, "updatefrequency-NAV_2"),
            (TaskId::Instruction, "mindurationsec"),
            (TaskId::GenericScales, "filename"),
            (TaskId::Flag, "flag"),
        ] {
            assert!(is_known_parameter(task, &key.into()), "{};{}", task, key);
        }
        assert!(!is_known_parameter(TaskId::Communications, &"updatefrequency-ADF".into()));
        assert!(!is_known_parameter(TaskId::Scoreboard, &"network".into()));
    }

    #[test]
    fn test_radio_alias_writes_frequency() {
        let store = TaskStateStore::new();
        let comms = store.read(TaskId::Communications);
        let changes =
            parameter_changes(comms, &"updatefrequency-COM_2".into(), "127.5", stamp(1)).unwrap();
        assert_eq!(changes, vec![FieldChange::new("radio-com2-frequency", FieldValue::Float(127.5), stamp(1))]);
    }

    #[test]
    fn test_network_mode_validated() {
        let store = TaskStateStore::new();
        let sysmon = store.read(TaskId::SystemMonitoring);
        assert!(is_shared(sysmon));
        assert!(parameter_changes(sysmon, &"network".into(), "client", stamp(1)).is_some());
        assert!(parameter_changes(sysmon, &"network".into(), "peer", stamp(1)).is_none());
        assert!(!is_shared(store.read(TaskId::Instruction)));
    }

    #[test]
    fn test_start_and_stop_flags() {
        let store = started(TaskId::Tracking);
        let track = store.read(TaskId::Tracking);
        assert!(track.bool("running") && track.bool("visible") && !track.bool("paused"));
        assert!(track.accepts_input());

        let stop = action_changes(Action::Stop, stamp(1));
        assert_eq!(stop.len(), 3);
        assert!(action_changes(Action::AddObject, stamp(1)).is_empty());
    }

    #[test]
    fn test_parameter_coercion() {
        let store = TaskStateStore::new();
        let track = store.read(TaskId::Tracking);
        let changes = parameter_changes(track, &"targetradius".into(), "0.25", stamp(1)).unwrap();
        assert_eq!(changes[0].value, FieldValue::Float(0.25));
        assert!(parameter_changes(track, &"automaticsolver".into(), "maybe", stamp(1)).is_none());

        let sysmon = store.read(TaskId::SystemMonitoring);
        let changes = parameter_changes(sysmon, &"lights-1-failure".into(), "True", stamp(1)).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].key.as_str(), "lights-1-on");
        assert_eq!(changes[1].value, FieldValue::Bool(false));
    }

    #[test]
    fn test_inputs_ignored_while_stopped() {
        let store = TaskStateStore::new();
        let changes = input_changes(
            store.read(TaskId::Tracking),
            &InputPayload::TrackingMove { dx: 0.5, dy: 0.0 },
            stamp(1),
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_tracking_clamped() {
        let store = started(TaskId::Tracking);
        let changes = input_changes(
            store.read(TaskId::Tracking),
            &InputPayload::TrackingMove { dx: 3.0, dy: -0.25 },
            stamp(1),
        );
        assert_eq!(changes[0].value, FieldValue::Point { x: 1.0, y: -0.25 });
    }

    #[test]
    fn test_pump_toggle_and_failure() {
        let mut store = started(TaskId::ResourceManagement);
        let resman = store.read(TaskId::ResourceManagement);
        let on = input_changes(resman, &InputPayload::PumpToggle { pump: 3 }, stamp(1));
        assert_eq!(on[0].value, FieldValue::Int(PUMP_ON));

        store.apply(Mutation::new(
            TaskId::ResourceManagement,
            MutationOrigin::Scenario,
            vec![FieldChange::new("pump-3-state", FieldValue::Int(PUMP_FAILED), Stamp::scripted(SessionTime::from_secs(1)))],
        ));
        let resman = store.read(TaskId::ResourceManagement);
        assert!(input_changes(resman, &InputPayload::PumpToggle { pump: 3 }, stamp(2000)).is_empty());
        assert!(input_changes(resman, &InputPayload::PumpToggle { pump: 9 }, stamp(2000)).is_empty());
    }

    #[test]
    fn test_monitoring_hit_and_false_alarm() {
        let mut store = started(TaskId::SystemMonitoring);
        let sysmon = store.read(TaskId::SystemMonitoring);
        let fa = input_changes(sysmon, &InputPayload::MonitoringAck { gauge: GaugeRef::Scale(2) }, stamp(1));
        assert_eq!(fa.len(), 3);
        assert_eq!(fa[0], FieldChange::new("performance-hit-1", FieldValue::Int(0), stamp(1)));
        assert_eq!(fa[1], FieldChange::new("performance-fa-1", FieldValue::Int(1), stamp(1)));
        assert_eq!(fa[2].value, FieldValue::text("no"));

        store.apply(Mutation::new(
            TaskId::SystemMonitoring,
            MutationOrigin::Scenario,
            vec![FieldChange::new("scales-2-failure", FieldValue::text("up"), Stamp::scripted(SessionTime::from_secs(1)))],
        ));
        let sysmon = store.read(TaskId::SystemMonitoring);
        let hit = input_changes(sysmon, &InputPayload::MonitoringAck { gauge: GaugeRef::Scale(2) }, stamp(1500));
        assert_eq!(hit.len(), 3);
        assert_eq!(hit[0].value, FieldValue::Int(1));
        assert_eq!(hit[1].value, FieldValue::Int(0));
        assert_eq!(hit[2].value, FieldValue::text("no"));
    }

    #[test]
    fn test_monitoring_counters_per_participant() {
        let mut store = started(TaskId::SystemMonitoring);
        store.apply(Mutation::new(
            TaskId::SystemMonitoring,
            MutationOrigin::Scenario,
            vec![
                FieldChange::new("scales-1-failure", FieldValue::text("up"), Stamp::scripted(SessionTime::from_secs(1))),
                FieldChange::new("scales-2-failure", FieldValue::text("down"), Stamp::scripted(SessionTime::from_secs(1))),
            ],
        ));
        let other = Stamp {
            writer: Writer::Participant(ParticipantId::new(2)),
            ..stamp(1500)
        };
        let sysmon = store.read(TaskId::SystemMonitoring);
        let first = input_changes(sysmon, &InputPayload::MonitoringAck { gauge: GaugeRef::Scale(1) }, stamp(1500));
        let second = input_changes(sysmon, &InputPayload::MonitoringAck { gauge: GaugeRef::Scale(2) }, other);
        assert_eq!(second[0].key.as_str(), "performance-hit-2");

        for (p, changes) in [(1, first), (2, second)] {
            store.apply(Mutation::new(
                TaskId::SystemMonitoring,
                MutationOrigin::LocalInput(ParticipantId::new(p)),
                changes,
            ));
        }
        assert_eq!(monitoring_totals(store.read(TaskId::SystemMonitoring)), (2, 0));

        let scripted = input_changes(
            store.read(TaskId::SystemMonitoring),
            &InputPayload::MonitoringAck { gauge: GaugeRef::Scale(3) },
            Stamp::scripted(SessionTime::from_secs(2)),
        );
        assert!(scripted.is_empty());
    }

    #[test]
    fn test_progress_timer_start_records_time() {
        let changes = action_changes(Action::ProgressTimerStart, Stamp::scripted(SessionTime::from_secs(90)));
        assert_eq!(changes[0].key.as_str(), "progresstimer-started");
        assert_eq!(changes[0].value, FieldValue::Int(90_000));
    }

    #[test]
    fn test_unknown_radio_ignored() {
        let store = started(TaskId::Communications);
        let comms = store.read(TaskId::Communications);
        assert!(input_changes(
            comms,
            &InputPayload::CommunicationTune { radio: "adf".into(), frequency: 300.0 },
            stamp(1)
        )
        .is_empty());
        assert_eq!(
            input_changes(
                comms,
                &InputPayload::CommunicationTune { radio: "com2".into(), frequency: 118.1 },
                stamp(1)
            )
            .len(),
            1
        );
    }
}
