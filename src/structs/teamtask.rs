use serde::{Deserialize, Serialize};

use super::status::NOT_CHECKED;

/// Per-(team, task) scoring row. Composite key (team_id, task_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamTask {
    pub team_id: i64,
    pub task_id: i64,

    /// Aggregate service status, derived from the three action statuses.
    pub status: i64,

    pub check_status: i64,
    pub check_message: String,
    pub check_private: String,
    pub check_attempts: i64,

    pub put_status: i64,
    pub put_message: String,
    pub put_private: String,
    pub put_attempts: i64,

    pub get_status: i64,
    pub get_message: String,
    pub get_private: String,
    pub get_attempts: i64,

    /// Flags this team captured from rivals on this service.
    pub stolen: i64,
    /// Flags rivals captured from this team's service.
    pub lost: i64,
    pub score: f64,
    pub checks: i64,
    pub checks_passed: i64,

    pub public_message: String,
    pub private_message: String,

    /// Shell-quoted argv of the last checker run.
    pub command: String,
}

impl TeamTask {
    /// SLA ratio in [0, 1].
    pub fn sla(&self) -> f64 {
        if self.checks > 0 {
            self.checks_passed as f64 / self.checks as f64
        } else {
            0.0
        }
    }
}

/// Derive the aggregate status and public message from the three per-action
/// statuses. First match wins; CHECK dominates, a failed PUT reads as
/// CORRUPT, a failed GET as MUMBLE.
///
/// The SQL layer embeds the same table as a CASE expression inside every
/// per-action UPDATE; this function is the reference the tests pin both
/// against.
pub fn derive_overall_status(check_status: i64, put_status: i64, get_status: i64) -> (i64, &'static str) {
    if check_status == 110 {
        return (110, "Service check failed");
    }
    if check_status == 104 {
        return (104, "Service is down");
    }
    if check_status == NOT_CHECKED {
        return (NOT_CHECKED, "Not checked yet");
    }

    if put_status == 110 {
        return (102, "Service corrupted (PUT failed)");
    }
    if put_status == 104 {
        return (102, "Service corrupted (PUT unreachable)");
    }

    if get_status == 110 {
        return (103, "Service mumble (GET failed)");
    }
    if get_status == 104 {
        return (103, "Service mumble (GET unreachable)");
    }

    (101, "Service operational")
}
