//! Scenario loader
//!
//! Turns scenario text into a list of commands, applying the configured
//! policy to malformed lines, then checks the scenario as a whole.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use matbc_core::{FieldKey, MatbcError, MatbcResult, TaskId};

use crate::grammar::{is_ignorable, parse_line, Action, CommandPayload, CommandTarget, ScenarioCommand};

/// What to do with a malformed line
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Abort the whole scenario on the first error
    #[default]
    FailFast,
    /// Drop the offending line and log a warning
    SkipWithWarning,
}

/// Predicate telling whether a task owns a parameter
pub type ParameterCheck = Box<dyn Fn(TaskId, &FieldKey) -> bool + Send + Sync>;

/// Scenario loader
pub struct ScenarioLoader {
    policy: LoadPolicy,
    known_parameter: Option<ParameterCheck>,
}

impl ScenarioLoader {
    pub fn new(policy: LoadPolicy) -> Self {
        ScenarioLoader {
            policy,
            known_parameter: None,
        }
    }

    /// Reject task parameters the predicate does not recognise
    pub fn with_parameter_check(mut self, check: ParameterCheck) -> Self {
        self.known_parameter = Some(check);
        self
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    /// Parse and validate scenario text
    pub fn load_str(&self, text: &str) -> MatbcResult<Vec<ScenarioCommand>> {
        let mut commands = Vec::new();

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            if is_ignorable(raw) {
                continue;
            }
            let parsed = parse_line(line_no, commands.len(), raw)
                .and_then(|cmd| self.check_parameter(cmd));
            match parsed {
                Ok(cmd) => commands.push(cmd),
                Err(err) => self.absorb(err)?,
            }
        }

        for problem in validate(&commands) {
            self.absorb(problem)?;
        }

        debug!(commands = commands.len(), policy = ?self.policy, "scenario loaded");
        Ok(commands)
    }

    fn check_parameter(&self, cmd: ScenarioCommand) -> MatbcResult<ScenarioCommand> {
        let Some(check) = &self.known_parameter else {
            return Ok(cmd);
        };
        if let CommandPayload::SetParameter {
            target: CommandTarget::Task(task),
            parameter,
            ..
        } = &cmd.payload
        {
            if !check(*task, parameter) {
                return Err(MatbcError::malformed(
                    cmd.line,
                    format!("'{}' is not a parameter of '{}'", parameter, task),
                ));
            }
        }
        Ok(cmd)
    }

    fn absorb(&self, err: MatbcError) -> MatbcResult<()> {
        match self.policy {
            LoadPolicy::FailFast => Err(err),
            LoadPolicy::SkipWithWarning => {
                warn!(error = %err, "skipping scenario problem");
                Ok(())
            }
        }
    }
}

impl Default for ScenarioLoader {
    fn default() -> Self {
        Self::new(LoadPolicy::default())
    }
}

/// Whole-scenario checks. Problems are reported against line 0.
pub fn validate(commands: &[ScenarioCommand]) -> Vec<MatbcError> {
    let mut problems = Vec::new();

    // Compare on dispatch order, not file order
    let last = commands.iter().max_by_key(|c| c.sort_key());
    let ends_alone = match last {
        Some(last) => {
            let is_end = last.payload
                == CommandPayload::Action {
                    target: CommandTarget::Main,
                    action: Action::End,
                };
            let shares_second = commands
                .iter()
                .filter(|c| c.due_time == last.due_time)
                .count()
                > 1;
            is_end && !shares_second
        }
        None => false,
    };
    if !ends_alone {
        problems.push(MatbcError::malformed(
            0,
            "the last command must be a lone 'end'",
        ));
    }

    let used: HashSet<TaskId> = commands.iter().filter_map(|c| c.payload.task()).collect();
    if used.is_empty() {
        problems.push(MatbcError::malformed(0, "no task is used"));
    }

    let started: HashSet<TaskId> = commands
        .iter()
        .filter_map(|c| match c.payload {
            CommandPayload::Action {
                target: CommandTarget::Task(task),
                action: Action::Start,
            } => Some(task),
            _ => None,
        })
        .collect();
    let mut missing: Vec<TaskId> = used.difference(&started).copied().collect();
    missing.sort();
    for task in missing {
        problems.push(MatbcError::malformed(
            0,
            format!("task '{}' has no 'start' command", task),
        ));
    }

    problems
}
