//! Task identities and typed task fields
//!
//! Each task of the battery keeps its displayed state as a map of named
//! fields. Field names are dash-separated addresses (`scales-1-failure`,
//! `pump-3-state`) that match the scenario parameter syntax.

use std::fmt;

use serde::Serialize;

/// Task of the battery
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum TaskId {
    SystemMonitoring = 0x01,
    Tracking = 0x02,
    Communications = 0x03,
    ResourceManagement = 0x04,
    CollaborativeMatching = 0x05,
    Scoreboard = 0x06,
    Instruction = 0x07,
    GenericScales = 0x08,
    /// Log markers written by scenario generators
    Flag = 0x09,
}

impl TaskId {
    pub const ALL: [TaskId; 9] = [
        TaskId::SystemMonitoring,
        TaskId::Tracking,
        TaskId::Communications,
        TaskId::ResourceManagement,
        TaskId::CollaborativeMatching,
        TaskId::Scoreboard,
        TaskId::Instruction,
        TaskId::GenericScales,
        TaskId::Flag,
    ];

    /// Scenario name of the task
    pub fn name(self) -> &'static str {
        match self {
            TaskId::SystemMonitoring => "sysmon",
            TaskId::Tracking => "track",
            TaskId::Communications => "communications",
            TaskId::ResourceManagement => "resman",
            TaskId::CollaborativeMatching => "collaborativematching",
            TaskId::Scoreboard => "scoreboard",
            TaskId::Instruction => "instruction",
            TaskId::GenericScales => "genericscales",
            TaskId::Flag => "flag",
        }
    }

    /// Tasks that take participant input. The others only display scripted
    /// fields.
    pub fn takes_input(self) -> bool {
        matches!(
            self,
            TaskId::SystemMonitoring
                | TaskId::Tracking
                | TaskId::Communications
                | TaskId::ResourceManagement
                | TaskId::CollaborativeMatching
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        TaskId::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(TaskId::SystemMonitoring),
            0x02 => Some(TaskId::Tracking),
            0x03 => Some(TaskId::Communications),
            0x04 => Some(TaskId::ResourceManagement),
            0x05 => Some(TaskId::CollaborativeMatching),
            0x06 => Some(TaskId::Scoreboard),
            0x07 => Some(TaskId::Instruction),
            0x08 => Some(TaskId::GenericScales),
            0x09 => Some(TaskId::Flag),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field address within a task
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FieldKey(String);

impl FieldKey {
    pub fn new(key: impl Into<String>) -> Self {
        FieldKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the address into its dash-separated segments
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('-')
    }
}

impl From<&str> for FieldKey {
    fn from(s: &str) -> Self {
        FieldKey(s.to_string())
    }
}

impl From<String> for FieldKey {
    fn from(s: String) -> Self {
        FieldKey(s)
    }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.0)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed field value
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Point { x: f64, y: f64 },
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<(f64, f64)> {
        match self {
            FieldValue::Point { x, y } => Some((*x, *y)),
            _ => None,
        }
    }

    /// Parse a raw scenario value into the same type as `self`.
    ///
    /// Booleans are checked before integers; a point is written `x,y`.
    pub fn coerce(&self, raw: &str) -> Option<FieldValue> {
        let raw = raw.trim();
        match self {
            FieldValue::Bool(_) => match raw.to_ascii_lowercase().as_str() {
                "true" => Some(FieldValue::Bool(true)),
                "false" => Some(FieldValue::Bool(false)),
                _ => None,
            },
            FieldValue::Int(_) => raw.parse().ok().map(FieldValue::Int),
            FieldValue::Float(_) => raw.parse().ok().map(FieldValue::Float),
            FieldValue::Text(_) => Some(FieldValue::Text(raw.to_string())),
            FieldValue::Point { .. } => {
                let (x, y) = raw.split_once(',')?;
                Some(FieldValue::Point {
                    x: x.trim().parse().ok()?,
                    y: y.trim().parse().ok()?,
                })
            }
        }
    }

    /// Best-effort typing for a value written to a field that does not exist
    /// yet
    pub fn infer(raw: &str) -> FieldValue {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "true" => return FieldValue::Bool(true),
            "false" => return FieldValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return FieldValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return FieldValue::Float(f);
        }
        FieldValue::Text(raw.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Point { x, y } => write!(f, "{},{}", x, y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_name_roundtrip() {
        for task in TaskId::ALL {
            assert_eq!(TaskId::from_name(task.name()), Some(task));
            assert_eq!(TaskId::from_byte(task.to_byte()), Some(task));
        }
        assert_eq!(TaskId::from_name("scheduling"), None);
        assert_eq!(TaskId::from_byte(0x0a), None);
    }

    #[test]
    fn test_display_tasks_take_no_input() {
        assert!(TaskId::CollaborativeMatching.takes_input());
        for task in [
            TaskId::Scoreboard,
            TaskId::Instruction,
            TaskId::GenericScales,
            TaskId::Flag,
        ] {
            assert!(!task.takes_input(), "{}", task);
        }
    }

    #[test]
    fn test_coerce_keeps_type() {
        assert_eq!(
            FieldValue::Bool(false).coerce("True"),
            Some(FieldValue::Bool(true))
        );
        assert_eq!(FieldValue::Bool(false).coerce("1"), None);
        assert_eq!(FieldValue::Int(0).coerce("42"), Some(FieldValue::Int(42)));
        assert_eq!(FieldValue::Int(0).coerce("4.2"), None);
        assert_eq!(
            FieldValue::Float(0.0).coerce("0.25"),
            Some(FieldValue::Float(0.25))
        );
        assert_eq!(
            FieldValue::Point { x: 0.0, y: 0.0 }.coerce("1.5, -2"),
            Some(FieldValue::Point { x: 1.5, y: -2.0 })
        );
    }

    #[test]
    fn test_infer() {
        assert_eq!(FieldValue::infer("false"), FieldValue::Bool(false));
        assert_eq!(FieldValue::infer("12"), FieldValue::Int(12));
        assert_eq!(FieldValue::infer("0.5"), FieldValue::Float(0.5));
        assert_eq!(FieldValue::infer("up"), FieldValue::text("up"));
    }

    #[test]
    fn test_field_key_segments() {
        let key = FieldKey::from("scales-3-failure");
        let parts: Vec<_> = key.segments().collect();
        assert_eq!(parts, vec!["scales", "3", "failure"]);
    }
}
