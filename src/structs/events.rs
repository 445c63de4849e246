use serde::{Deserialize, Serialize};

/// Messages published on the `adarena-events` bus and fanned out to the
/// spectator WebSocket streams.
///
/// Closed set: consumers match on `event_type` instead of poking at loose
/// JSON dictionaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LiveEvent {
    ScoreboardUpdate {
        event: String,
        data: serde_json::Value,
    },
    FlagSubmission {
        event: String,
        data: SubmissionNotice,
    },
    CheckerUpdate {
        event: String,
        data: CheckerNotice,
    },
    FlagStolen {
        event: String,
        data: StolenNotice,
    },
}

impl LiveEvent {
    pub fn scoreboard_update(data: serde_json::Value) -> Self {
        Self::ScoreboardUpdate {
            event: "update_scoreboard".into(),
            data,
        }
    }

    pub fn flag_submission(data: SubmissionNotice) -> Self {
        Self::FlagSubmission {
            event: "flag_submission".into(),
            data,
        }
    }

    pub fn checker_update(data: CheckerNotice) -> Self {
        Self::CheckerUpdate {
            event: "checker_update".into(),
            data,
        }
    }

    pub fn flag_stolen(data: StolenNotice) -> Self {
        Self::FlagStolen {
            event: "flag_stolen".into(),
            data,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScoreboardUpdate { .. } => "scoreboard_update",
            Self::FlagSubmission { .. } => "flag_submission",
            Self::CheckerUpdate { .. } => "checker_update",
            Self::FlagStolen { .. } => "flag_stolen",
        }
    }

    /// `/ws/game_events` carries scoreboard updates only; everything else
    /// goes out on `/ws/live_events`.
    pub fn is_game_event(&self) -> bool {
        matches!(self, Self::ScoreboardUpdate { .. })
    }
}

/// One processed flag from a submission request (accepted or rejected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionNotice {
    pub attacker_id: i64,
    pub flag: String,
    pub ok: bool,
    pub message: String,
}

/// A finished checker action, as shown on the live ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerNotice {
    pub team_id: i64,
    pub task_id: i64,
    pub round: i64,
    pub action: String,
    pub status: String,
    pub public_message: String,
}

/// A successful capture with both score deltas applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StolenNotice {
    pub attacker_id: i64,
    pub attacker_name: String,
    pub victim_id: i64,
    pub victim_name: String,
    pub task_id: i64,
    pub task_name: String,
    pub points: f64,
    pub timestamp: String,
}
