//! Scripted command dispatch
//!
//! Turns a due scenario command into store writes. Commands addressed to the
//! main session are handed back to the caller, which owns the session
//! lifecycle.

use tracing::{debug, warn};

use matbc_core::{Mutation, MutationOrigin, SessionTime, Stamp, TaskId};
use matbc_scenario::{Action, CommandPayload, CommandTarget, ScenarioCommand};

use crate::matching::MatchingCoordinator;
use crate::store::{ApplyOutcome, TaskStateStore};
use crate::tasks::{action_changes, parameter_changes};

/// Command for the main session
#[derive(Clone, Debug, PartialEq)]
pub enum MainCommand {
    End,
    Pause,
    Resume,
    /// `messagetolog` - free text for the session log
    Log(String),
    /// `showlabels` - renderer option
    ShowLabels(bool),
    /// `allowescape` - whether the operator may leave with the escape key
    AllowEscape(bool),
    /// `allowaltf4` - whether the operator may close the window
    AllowAltF4(bool),
}

/// Result of dispatching one command
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Task fields were written
    Applied { task: TaskId, outcome: ApplyOutcome },
    /// The caller must act on a main session command
    Main(MainCommand),
    /// Nothing to do; the reason has been logged
    Skipped,
}

/// Apply a scripted command to the local store.
///
/// Writes are stamped with the command's due time, so both peers produce the
/// same stamps regardless of when their queues actually dispatched.
pub fn apply_scripted(
    command: &ScenarioCommand,
    store: &mut TaskStateStore,
    matching: &mut MatchingCoordinator,
) -> DispatchOutcome {
    let stamp = Stamp::scripted(command.due());

    let (task, changes) = match (&command.payload, command.payload.target()) {
        (CommandPayload::Action { action, .. }, CommandTarget::Main) => {
            return match action {
                Action::End => DispatchOutcome::Main(MainCommand::End),
                Action::Pause => DispatchOutcome::Main(MainCommand::Pause),
                Action::Resume => DispatchOutcome::Main(MainCommand::Resume),
                other => {
                    warn!(line = command.line, action = other.name(), "action not valid for main session");
                    DispatchOutcome::Skipped
                }
            };
        }
        (CommandPayload::SetParameter { parameter, value, .. }, CommandTarget::Main) => {
            if parameter.as_str() == "messagetolog" {
                return DispatchOutcome::Main(MainCommand::Log(value.clone()));
            }
            let flag: fn(bool) -> MainCommand = match parameter.as_str() {
                "showlabels" => MainCommand::ShowLabels,
                "allowescape" => MainCommand::AllowEscape,
                "allowaltf4" => MainCommand::AllowAltF4,
                other => {
                    warn!(line = command.line, parameter = other, "unknown main parameter");
                    return DispatchOutcome::Skipped;
                }
            };
            return match value.trim().to_ascii_lowercase().as_str() {
                "true" => DispatchOutcome::Main(flag(true)),
                "false" => DispatchOutcome::Main(flag(false)),
                _ => {
                    warn!(line = command.line, parameter = %parameter, value = %value, "expected true or false");
                    DispatchOutcome::Skipped
                }
            };
        }
        (CommandPayload::Action { action, .. }, CommandTarget::Task(task)) => {
            let changes = match action {
                Action::AddObject => matching.add_object(store.read(task), stamp),
                Action::NewRound => matching.new_round(store.read(task), command.due(), stamp),
                _ => action_changes(*action, stamp),
            };
            (task, changes)
        }
        (CommandPayload::SetParameter { parameter, value, .. }, CommandTarget::Task(task)) => {
            match parameter_changes(store.read(task), parameter, value, stamp) {
                Some(changes) => (task, changes),
                None => {
                    warn!(
                        line = command.line,
                        task = %task,
                        parameter = %parameter,
                        value = %value,
                        "value does not fit the parameter's type"
                    );
                    return DispatchOutcome::Skipped;
                }
            }
        }
    };

    if changes.is_empty() {
        debug!(line = command.line, command = %command.payload, "command produced no writes");
        return DispatchOutcome::Skipped;
    }

    let outcome = store.apply(Mutation::new(task, MutationOrigin::Scenario, changes));
    DispatchOutcome::Applied { task, outcome }
}

/// Expire the current matching round if its deadline has passed
pub fn expire_rounds(
    now: SessionTime,
    store: &mut TaskStateStore,
    matching: &mut MatchingCoordinator,
) -> Option<ApplyOutcome> {
    let changes = matching.tick(now, store.read(TaskId::CollaborativeMatching));
    if changes.is_empty() {
        return None;
    }
    Some(store.apply(Mutation::new(
        TaskId::CollaborativeMatching,
        MutationOrigin::Scenario,
        changes,
    )))
}
