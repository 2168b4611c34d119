//! Scenario line grammar
//!
//! ```text
//! line     := time [ "-" priority ] ";" body
//! time     := H ":" MM ":" SS
//! priority := digit+
//! body     := action
//!           | main-param ";" value
//!           | task ";" action
//!           | task ";" parameter ";" value
//! ```
//!
//! The priority suffix is part of the grammar, so a malformed suffix is a
//! parse error rather than a silently mis-scheduled command.

use std::fmt;

use matbc_core::{FieldKey, MatbcError, MatbcResult, SessionTime, TaskId};

/// Priority used when a line has no `-p` suffix
pub const DEFAULT_PRIORITY: u32 = 0;

/// Parameters of the main session (not of a task)
pub const MAIN_PARAMETERS: [&str; 4] = ["showlabels", "allowescape", "messagetolog", "allowaltf4"];

/// What a command addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandTarget {
    Main,
    Task(TaskId),
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTarget::Main => f.write_str("__main__"),
            CommandTarget::Task(task) => write!(f, "{}", task),
        }
    }
}

/// Single-word scenario action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Stop,
    Show,
    Hide,
    Pause,
    Resume,
    End,
    AddObject,
    NewRound,
    /// Restart the resource management progress timer
    ProgressTimerStart,
}

impl Action {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "start" => Some(Action::Start),
            "stop" => Some(Action::Stop),
            "show" => Some(Action::Show),
            "hide" => Some(Action::Hide),
            "pause" => Some(Action::Pause),
            "resume" => Some(Action::Resume),
            "end" => Some(Action::End),
            "addobject" => Some(Action::AddObject),
            "newround" | "refresh" => Some(Action::NewRound),
            "progresstimerstart" => Some(Action::ProgressTimerStart),
            _ => None,
        }
    }

    /// Whether the action exists for a target
    pub fn allowed_for(self, target: CommandTarget) -> bool {
        match (self, target) {
            (Action::End | Action::Pause | Action::Resume, CommandTarget::Main) => true,
            (_, CommandTarget::Main) => false,
            (Action::End, CommandTarget::Task(_)) => false,
            (Action::AddObject | Action::NewRound, CommandTarget::Task(task)) => {
                task == TaskId::CollaborativeMatching
            }
            (Action::ProgressTimerStart, CommandTarget::Task(task)) => {
                task == TaskId::ResourceManagement
            }
            (_, CommandTarget::Task(_)) => true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Show => "show",
            Action::Hide => "hide",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::End => "end",
            Action::AddObject => "addobject",
            Action::NewRound => "newround",
            Action::ProgressTimerStart => "progresstimerstart",
        }
    }
}

/// Instruction carried by a scenario command
#[derive(Clone, Debug, PartialEq)]
pub enum CommandPayload {
    Action {
        target: CommandTarget,
        action: Action,
    },
    SetParameter {
        target: CommandTarget,
        parameter: FieldKey,
        value: String,
    },
}

impl CommandPayload {
    pub fn target(&self) -> CommandTarget {
        match self {
            CommandPayload::Action { target, .. } | CommandPayload::SetParameter { target, .. } => {
                *target
            }
        }
    }

    pub fn task(&self) -> Option<TaskId> {
        match self.target() {
            CommandTarget::Main => None,
            CommandTarget::Task(task) => Some(task),
        }
    }
}

impl fmt::Display for CommandPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandPayload::Action { target, action } => {
                write!(f, "{};{}", target, action.name())
            }
            CommandPayload::SetParameter {
                target,
                parameter,
                value,
            } => write!(f, "{};{};{}", target, parameter, value),
        }
    }
}

/// Parsed scenario command. Immutable once parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioCommand {
    /// Whole seconds since session start
    pub due_time: u32,
    /// Higher executes first among same-second commands
    pub priority: u32,
    pub payload: CommandPayload,
    /// 1-based source line number
    pub line: usize,
    /// Position in the source among parsed commands
    pub index: usize,
}

impl ScenarioCommand {
    /// Due time on the session clock
    pub fn due(&self) -> SessionTime {
        SessionTime::from_secs(self.due_time as u64)
    }

    /// Dispatch sort key: (due_time asc, priority desc, index asc)
    pub fn sort_key(&self) -> (u32, std::cmp::Reverse<u32>, usize) {
        (self.due_time, std::cmp::Reverse(self.priority), self.index)
    }
}

/// Lines the loader skips without parsing
pub fn is_ignorable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Parse one scenario line.
///
/// `line_no` is used for error reporting, `index` becomes the command's
/// file-order tie-breaker.
pub fn parse_line(line_no: usize, index: usize, line: &str) -> MatbcResult<ScenarioCommand> {
    let line = line.trim();
    let fields: Vec<&str> = line.split(';').map(str::trim).collect();
    if !(2..=4).contains(&fields.len()) {
        return Err(MatbcError::malformed(
            line_no,
            format!("expected 2 to 4 ';'-separated fields, got {}", fields.len()),
        ));
    }

    let (due_time, priority) = parse_time_priority(line_no, fields[0])?;
    let payload = parse_body(line_no, &fields[1..])?;

    Ok(ScenarioCommand {
        due_time,
        priority,
        payload,
        line: line_no,
        index,
    })
}

/// Parse `H:MM:SS` with an optional `-p` suffix
fn parse_time_priority(line_no: usize, token: &str) -> MatbcResult<(u32, u32)> {
    let (time, priority) = match token.split_once('-') {
        Some((time, priority)) => {
            if priority.is_empty() || !priority.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MatbcError::malformed(
                    line_no,
                    format!("priority '{}' is not a non-negative integer", priority),
                ));
            }
            let priority = priority.parse::<u32>().map_err(|_| {
                MatbcError::malformed(line_no, format!("priority '{}' out of range", priority))
            })?;
            (time, priority)
        }
        None => (token, DEFAULT_PRIORITY),
    };

    let parts: Vec<&str> = time.split(':').collect();
    let well_formed = parts.len() == 3
        && parts[0].len() == 1
        && parts[1].len() == 2
        && parts[2].len() == 2
        && parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        return Err(MatbcError::malformed(
            line_no,
            format!("wrong time format '{}', expected h:mm:ss", time),
        ));
    }

    // All three parts are short digit strings, parsing cannot fail
    let h: u32 = parts[0].parse().unwrap_or(0);
    let m: u32 = parts[1].parse().unwrap_or(0);
    let s: u32 = parts[2].parse().unwrap_or(0);
    if m > 59 || s > 59 {
        return Err(MatbcError::malformed(
            line_no,
            format!("minutes and seconds must be below 60 in '{}'", time),
        ));
    }

    Ok((h * 3600 + m * 60 + s, priority))
}

fn parse_body(line_no: usize, fields: &[&str]) -> MatbcResult<CommandPayload> {
    if fields.iter().any(|f| f.is_empty()) {
        return Err(MatbcError::malformed(line_no, "empty field"));
    }

    match fields {
        [action] => main_action(line_no, action),
        [name, value] if MAIN_PARAMETERS.contains(name) => Ok(CommandPayload::SetParameter {
            target: CommandTarget::Main,
            parameter: FieldKey::from(*name),
            value: value.to_string(),
        }),
        [task, action] => {
            let target = task_target(line_no, task)?;
            let action = Action::parse(action)
                .filter(|a| a.allowed_for(target))
                .ok_or_else(|| {
                    MatbcError::malformed(
                        line_no,
                        format!("'{}' is not an action of '{}'", action, task),
                    )
                })?;
            Ok(CommandPayload::Action { target, action })
        }
        [task, parameter, value] => {
            let target = task_target(line_no, task)?;
            let parameter = parameter_address(line_no, target, parameter)?;
            Ok(CommandPayload::SetParameter {
                target,
                parameter,
                value: value.to_string(),
            })
        }
        _ => Err(MatbcError::malformed(line_no, "unexpected field count")),
    }
}

fn main_action(line_no: usize, word: &str) -> MatbcResult<CommandPayload> {
    let action = Action::parse(word)
        .filter(|a| a.allowed_for(CommandTarget::Main))
        .ok_or_else(|| {
            MatbcError::malformed(line_no, format!("'{}' is not a main action", word))
        })?;
    Ok(CommandPayload::Action {
        target: CommandTarget::Main,
        action,
    })
}

fn task_target(line_no: usize, name: &str) -> MatbcResult<CommandTarget> {
    TaskId::from_name(name)
        .map(CommandTarget::Task)
        .ok_or_else(|| MatbcError::malformed(line_no, format!("unknown task '{}'", name)))
}

fn parameter_address(line_no: usize, target: CommandTarget, raw: &str) -> MatbcResult<FieldKey> {
    // Deprecated sysmon parameter
    if target == CommandTarget::Task(TaskId::SystemMonitoring) && raw == "feedbackduration" {
        return Ok(FieldKey::from("feedbacks-positive-duration"));
    }

    let valid = raw
        .split('-')
        .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
    if !valid {
        return Err(MatbcError::malformed(
            line_no,
            format!("malformed parameter address '{}'", raw),
        ));
    }
    Ok(FieldKey::from(raw))
}
