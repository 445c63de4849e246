use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use super::game::GameConfig;
use super::task::Task;

/// A unit of attackable content, planted by a PUT action.
///
/// Rows are kept forever in the authoritative store; the flag cache entry
/// expires after twice the flag's validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub id: i64,

    /// `flag_prefix` + 32 hex chars, globally unique.
    pub flag: String,

    /// Victim team the flag was planted on.
    pub team_id: i64,
    pub task_id: i64,

    /// Round the flag was planted in.
    pub round: i64,

    /// Disclosed to every team through attack data (e.g. the place number).
    pub public_flag_data: String,

    /// Shared only with the checker so GET can locate the flag.
    pub private_flag_data: String,

    pub vuln_number: Option<i64>,
}

impl Flag {
    /// Generate a fresh flag for one PUT action.
    ///
    /// The id is 0 until the row is inserted.
    pub fn generate(team_id: i64, task_id: i64, round: i64, task: &Task, config: &GameConfig) -> Self {
        let mut rng = rand::rng();

        let mut flag_bytes = [0u8; 16];
        rng.fill_bytes(&mut flag_bytes);

        let mut private_bytes = [0u8; 32];
        rng.fill_bytes(&mut private_bytes);

        let place = rng.random_range(1..=task.places.max(1));

        Self {
            id: 0,
            flag: format!("{}{}", config.flag_prefix, hex::encode(flag_bytes)),
            team_id,
            task_id,
            round,
            public_flag_data: place.to_string(),
            private_flag_data: hex::encode(private_bytes),
            vuln_number: Some(1),
        }
    }

    /// Whether the flag is still attackable in `current_round`.
    pub fn is_alive(&self, current_round: i64, flag_lifetime: i64) -> bool {
        current_round - self.round <= flag_lifetime
    }
}

/// Cache representation of a flag, keyed by the flag string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFlag {
    pub id: i64,
    pub team_id: i64,
    pub task_id: i64,
    pub flag: String,
    pub round: i64,
    pub public_flag_data: Option<String>,
}

impl From<&Flag> for CachedFlag {
    fn from(flag: &Flag) -> Self {
        Self {
            id: flag.id,
            team_id: flag.team_id,
            task_id: flag.task_id,
            flag: flag.flag.clone(),
            round: flag.round,
            public_flag_data: Some(flag.public_flag_data.clone()),
        }
    }
}

/// Proof of a successful capture; at most one per (flag, attacker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StolenFlag {
    pub flag_id: i64,
    pub attacker_id: i64,
    pub submit_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (Task, GameConfig) {
        let task = Task {
            id: 3,
            name: "web".into(),
            checker: "/checkers/web".into(),
            env_path: String::new(),
            gets: 1,
            puts: 1,
            places: 4,
            checker_timeout: 5,
            checker_type: "hackerdom".into(),
            default_score: 2500,
            active: true,
        };
        let config = GameConfig {
            id: 1,
            game_running: true,
            game_hardness: 10.0,
            max_round: 100,
            round_time: 60,
            real_round: 7,
            flag_prefix: "FLAG".into(),
            flag_lifetime: 5,
            inflation: true,
            volga_attacks_mode: false,
            timezone: "UTC".into(),
            start_time: chrono::Utc::now(),
        };
        (task, config)
    }

    #[test]
    fn generated_flags_match_the_format() {
        let (task, config) = fixtures();
        let flag = Flag::generate(1, 3, 7, &task, &config);

        assert!(flag.flag.starts_with("FLAG"));
        assert_eq!(flag.flag.len(), 4 + 32);
        assert_eq!(flag.private_flag_data.len(), 64);
        assert_eq!(flag.vuln_number, Some(1));

        let place: i64 = flag.public_flag_data.parse().unwrap();
        assert!((1..=4).contains(&place));
    }

    #[test]
    fn lifetime_window_is_inclusive() {
        let (task, config) = fixtures();
        let flag = Flag::generate(1, 3, 2, &task, &config);
        assert!(flag.is_alive(7, 5));
        assert!(!flag.is_alive(8, 5));
    }
}
