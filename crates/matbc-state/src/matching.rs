//! Collaborative matching coordinator
//!
//! Both participants look at the same scene through their own window and
//! must each select an object of the target kind before the round deadline.
//!
//! A round moves `Pending -> Completed` once both participants hold a
//! selection of the target kind, or `Pending -> Expired` when the deadline
//! passes. Each participant's first valid selection in a round sticks, so
//! the outcome does not depend on the order in which the two peers see the
//! selections. A resolved round moves to the archive right away.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

use matbc_core::{
    FieldChange, FieldValue, MatbcError, MatbcResult, ObjectId, ObjectKind, ParticipantId,
    SessionTime, Stamp,
};

use crate::store::TaskState;
use crate::tasks::MATCH_TIMEOUT_PENALTY;

/// Round status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStatus {
    Pending,
    Completed,
    Expired,
}

impl RoundStatus {
    pub fn label(self) -> &'static str {
        match self {
            RoundStatus::Pending => "pending",
            RoundStatus::Completed => "completed",
            RoundStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Object placed in the shared scene
#[derive(Clone, Debug, PartialEq)]
pub struct SceneObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub image: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Region of the scene a participant can see
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneWindow {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl SceneWindow {
    /// Read `window-<n>-*` from the matching task
    pub fn from_state(state: &TaskState, n: usize) -> Self {
        SceneWindow {
            min_x: state.float(&format!("window-{}-minx", n)),
            max_x: state.float(&format!("window-{}-maxx", n)),
            min_y: state.float(&format!("window-{}-miny", n)),
            max_y: state.float(&format!("window-{}-maxy", n)),
        }
    }

    /// Whether any part of the object lies inside the window
    pub fn shows(&self, object: &SceneObject) -> bool {
        object.x < self.max_x
            && object.x + object.width > self.min_x
            && object.y < self.max_y
            && object.y + object.height > self.min_y
    }
}

/// A participant's selection in a round
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Selection {
    pub object: ObjectId,
    pub kind: ObjectKind,
    pub stamp: Stamp,
}

/// Problems with a round's scene. Reported, never resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum SceneWarning {
    /// No object of the target kind is in the scene
    TargetMissing { kind: ObjectKind },
    /// The target is outside a participant's window
    TargetNotVisible { window: usize },
    /// More than one object has the target kind
    AmbiguousTarget { candidates: Vec<ObjectId> },
}

/// One matching round
#[derive(Clone, Debug)]
pub struct MatchRound {
    pub number: u32,
    /// Kind both participants must select. `None` means any kind, as long as
    /// both selections agree.
    pub target: Option<ObjectKind>,
    pub windows: [SceneWindow; 2],
    /// Due time of the `newround` command that opened the round
    pub opened: SessionTime,
    pub deadline: SessionTime,
    pub status: RoundStatus,
    pub selections: BTreeMap<ParticipantId, Selection>,
    scene_checked: bool,
}

impl MatchRound {
    fn is_satisfied(&self, participants: &[ParticipantId; 2]) -> bool {
        let (Some(a), Some(b)) = (
            self.selections.get(&participants[0]),
            self.selections.get(&participants[1]),
        ) else {
            return false;
        };
        match self.target {
            Some(kind) => a.kind == kind && b.kind == kind,
            None => a.kind == b.kind,
        }
    }
}

/// Collaborative matching coordinator
pub struct MatchingCoordinator {
    /// Participant order defines window numbering (`window-1-*` is the first)
    participants: [ParticipantId; 2],
    scene: Vec<SceneObject>,
    next_object: u32,
    /// Current round, while pending
    round: Option<MatchRound>,
    archive: Vec<MatchRound>,
    rounds_opened: u32,
    warnings: Vec<SceneWarning>,
}

impl MatchingCoordinator {
    pub fn new(participants: [ParticipantId; 2]) -> Self {
        MatchingCoordinator {
            participants,
            scene: Vec::new(),
            next_object: 1,
            round: None,
            archive: Vec::new(),
            rounds_opened: 0,
            warnings: Vec::new(),
        }
    }

    pub fn participants(&self) -> [ParticipantId; 2] {
        self.participants
    }

    pub fn scene(&self) -> &[SceneObject] {
        &self.scene
    }

    /// Round still waiting for selections
    pub fn round(&self) -> Option<&MatchRound> {
        self.round.as_ref()
    }

    /// Status of the most recent round, pending or archived
    pub fn status(&self) -> Option<RoundStatus> {
        self.round.as_ref().or(self.archive.last()).map(|r| r.status)
    }

    /// Resolved rounds, oldest first
    pub fn archive(&self) -> &[MatchRound] {
        &self.archive
    }

    /// Scene warnings raised so far
    pub fn warnings(&self) -> &[SceneWarning] {
        &self.warnings
    }

    fn archive_current(&mut self) {
        if let Some(round) = self.round.take() {
            debug!(round = round.number, status = %round.status, "round archived");
            self.archive.push(round);
        }
    }

    fn selection_key(participant: ParticipantId) -> String {
        format!("selection-{}", participant)
    }

    /// Place an object built from the `nextobject*` parameters. Instance ids
    /// are assigned in dispatch order, so both peers agree on them.
    pub fn add_object(&mut self, state: &TaskState, stamp: Stamp) -> Vec<FieldChange> {
        let object = SceneObject {
            id: ObjectId::new(self.next_object),
            kind: ObjectKind(state.int("nextobjecttypeid").max(0) as u32),
            image: state.text("nextobjectimage").to_string(),
            x: state.float("nextobjectposx"),
            y: state.float("nextobjectposy"),
            width: state.float("nextobjectsizex"),
            height: state.float("nextobjectsizey"),
        };
        self.next_object += 1;
        debug!(object = %object.id, kind = object.kind.0, "scene object added");
        self.scene.push(object);
        vec![FieldChange::new(
            "objectcount",
            FieldValue::Int(self.scene.len() as i64),
            stamp,
        )]
    }

    /// Clear the scene and open a new round due at `due`. A round still
    /// pending is archived as expired.
    pub fn new_round(&mut self, state: &TaskState, due: SessionTime, stamp: Stamp) -> Vec<FieldChange> {
        if let Some(previous) = self.round.as_mut() {
            info!(round = previous.number, "round replaced before resolution");
            previous.status = RoundStatus::Expired;
        }
        self.archive_current();

        self.scene.clear();
        self.next_object = 1;

        self.rounds_opened += 1;
        let number = self.rounds_opened;
        let target = match state.int("targetobjectid") {
            id if id < 0 => None,
            id => Some(ObjectKind(id as u32)),
        };
        let limit_ms = state.int("timelimit").max(0) as u64;
        let deadline = SessionTime::from_millis(due.as_millis().saturating_add(limit_ms));
        let windows = [
            SceneWindow::from_state(state, 1),
            SceneWindow::from_state(state, 2),
        ];

        info!(round = number, target = ?target.map(|k| k.0), deadline = %deadline, "matching round started");
        self.round = Some(MatchRound {
            number,
            target,
            windows,
            opened: due,
            deadline,
            status: RoundStatus::Pending,
            selections: BTreeMap::new(),
            scene_checked: false,
        });

        let mut changes = vec![
            FieldChange::new("round-number", FieldValue::Int(number as i64), stamp),
            FieldChange::new("round-status", FieldValue::text("pending"), stamp),
            FieldChange::new(
                "round-deadline",
                FieldValue::Int(deadline.as_millis() as i64),
                stamp,
            ),
            FieldChange::new("objectcount", FieldValue::Int(0), stamp),
        ];
        for p in self.participants {
            changes.push(FieldChange::new(Self::selection_key(p), FieldValue::Int(-1), stamp));
        }
        changes
    }

    /// Record a participant's selection
    pub fn select(
        &mut self,
        participant: ParticipantId,
        object: ObjectId,
        stamp: Stamp,
    ) -> MatbcResult<Vec<FieldChange>> {
        self.check_scene();
        let participants = self.participants;
        let Some(round) = self.round.as_mut() else {
            return Err(if self.archive.is_empty() {
                MatbcError::NoActiveRound
            } else {
                MatbcError::RoundAlreadyResolved
            });
        };

        if round.status != RoundStatus::Pending || stamp.at >= round.deadline {
            return Err(MatbcError::RoundAlreadyResolved);
        }
        // Made against the previous round's scene
        if stamp.at < round.opened {
            debug!(participant = %participant, round = round.number, "selection predates the round");
            return Err(MatbcError::RoundAlreadyResolved);
        }

        let selected = self
            .scene
            .iter()
            .find(|o| o.id == object)
            .ok_or(MatbcError::InvalidSelection(object))?;

        if round.selections.contains_key(&participant) {
            debug!(participant = %participant, round = round.number, "selection already recorded");
            return Ok(Vec::new());
        }

        round.selections.insert(
            participant,
            Selection {
                object,
                kind: selected.kind,
                stamp,
            },
        );
        debug!(participant = %participant, object = %object, kind = selected.kind.0, "selection recorded");

        let mut changes = vec![FieldChange::new(
            Self::selection_key(participant),
            FieldValue::Int(object.0 as i64),
            stamp,
        )];

        if round.is_satisfied(&participants) {
            round.status = RoundStatus::Completed;
            // The later of the two selections resolves the round on both peers
            let resolved = round
                .selections
                .values()
                .map(|s| s.stamp)
                .max()
                .unwrap_or(stamp);
            info!(round = round.number, "matching round completed");
            changes.push(FieldChange::new(
                "round-status",
                FieldValue::text(RoundStatus::Completed.label()),
                resolved,
            ));
            self.archive_current();
        }

        Ok(changes)
    }

    /// Continuous centering score of a participant's view
    pub fn centering(&self, participant: ParticipantId, score: f64, stamp: Stamp) -> Vec<FieldChange> {
        vec![FieldChange::new(
            format!("centering-{}", participant),
            FieldValue::Float(score),
            stamp,
        )]
    }

    /// Expire the round once `now` reaches its deadline
    pub fn tick(&mut self, now: SessionTime, state: &TaskState) -> Vec<FieldChange> {
        let expired = match self.round.as_mut() {
            Some(round) if round.status == RoundStatus::Pending && now >= round.deadline => {
                round.status = RoundStatus::Expired;
                round.deadline
            }
            _ => return Vec::new(),
        };
        self.check_scene();
        self.archive_current();

        info!(deadline = %expired, "matching round expired");
        let stamp = Stamp::scripted(expired);
        vec![
            FieldChange::new(
                "round-status",
                FieldValue::text(RoundStatus::Expired.label()),
                stamp,
            ),
            FieldChange::new(
                "score",
                FieldValue::Int(state.int("score") - MATCH_TIMEOUT_PENALTY),
                stamp,
            ),
        ]
    }

    /// Inspect the round's scene once it has been populated
    fn check_scene(&mut self) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.scene_checked {
            return;
        }
        round.scene_checked = true;

        let Some(kind) = round.target else {
            return;
        };
        let candidates: Vec<&SceneObject> = self.scene.iter().filter(|o| o.kind == kind).collect();

        if candidates.is_empty() {
            warn!(round = round.number, kind = kind.0, "target kind not in scene");
            self.warnings.push(SceneWarning::TargetMissing { kind });
            return;
        }
        if candidates.len() > 1 {
            let ids: Vec<ObjectId> = candidates.iter().map(|o| o.id).collect();
            warn!(round = round.number, candidates = ids.len(), "several objects of the target kind");
            self.warnings
                .push(SceneWarning::AmbiguousTarget { candidates: ids });
        }
        for (i, window) in round.windows.iter().enumerate() {
            if !candidates.iter().any(|o| window.shows(o)) {
                warn!(round = round.number, window = i + 1, "target outside participant window");
                self.warnings
                    .push(SceneWarning::TargetNotVisible { window: i + 1 });
            }
        }
    }
}
