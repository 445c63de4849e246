use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Sentinel for "action has not run yet" in `TeamTask` status columns.
pub const NOT_CHECKED: i64 = -1;

/// Verdict of a checker run, as encoded in the checker's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Up,
    Corrupt,
    Mumble,
    Down,
    CheckFailed,
}

impl TaskStatus {
    /// Numeric status code stored in the database and reported over the wire.
    pub fn code(self) -> i64 {
        match self {
            Self::Up => 101,
            Self::Corrupt => 102,
            Self::Mumble => 103,
            Self::Down => 104,
            Self::CheckFailed => 110,
        }
    }

    /// Map a checker exit code back to a status.
    ///
    /// Anything outside the contract is `None`; callers treat that as
    /// `CheckFailed` per the checker contract.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            101 => Some(Self::Up),
            102 => Some(Self::Corrupt),
            103 => Some(Self::Mumble),
            104 => Some(Self::Down),
            110 => Some(Self::CheckFailed),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Corrupt => "CORRUPT",
            Self::Mumble => "MUMBLE",
            Self::Down => "DOWN",
            Self::CheckFailed => "CHECK_FAILED",
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The three checker actions run against every (team, task) each round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Check,
    Put,
    Get,
}

impl Action {
    /// Lowercase name used as the checker argv verb and as record keys.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Put => "put",
            Self::Get => "get",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.verb().to_uppercase())
    }
}

/// Outcome of one checker subprocess invocation.
#[derive(Debug, Clone)]
pub struct CheckerVerdict {
    pub status: TaskStatus,
    pub action: Action,
    pub public_message: String,
    pub private_message: String,
    /// Shell-quoted argv, stored on the TeamTask row for debugging.
    pub command: String,
}
