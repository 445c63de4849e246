use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tournament configuration. Exactly one row exists (id = 1).
///
/// Mutated only by the ticker (`real_round`, `game_running`) and the admin
/// endpoints; everything else reads it through the config cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub id: i64,
    pub game_running: bool,

    /// Difficulty divisor for attack scoring, >= 1.
    pub game_hardness: f64,

    /// Last playable round; 0 means unlimited.
    pub max_round: i64,

    /// Round duration in seconds.
    pub round_time: i64,

    /// Current round; 0 until the first tick.
    pub real_round: i64,

    pub flag_prefix: String,

    /// Rounds a flag stays valid for GET and for submission.
    pub flag_lifetime: i64,

    /// Scale flag value up as the game progresses.
    pub inflation: bool,

    /// Only accept submissions from teams whose own service is UP.
    pub volga_attacks_mode: bool,

    /// IANA timezone name, informational (start_time is stored in UTC).
    pub timezone: String,

    pub start_time: DateTime<Utc>,
}

impl GameConfig {
    /// Whether `round` is past the end of a bounded game.
    pub fn is_finished(&self, round: i64) -> bool {
        self.max_round > 0 && round > self.max_round
    }
}
