use serde::{Deserialize, Serialize};

/// A vulnerable service definition and its checker contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,

    /// Absolute path to the external checker executable.
    pub checker: String,

    /// Extra PATH prefix exported to the checker process.
    pub env_path: String,

    /// Number of GET actions per round, >= 0.
    pub gets: i64,

    /// Number of PUT actions per round, >= 0.
    pub puts: i64,

    /// Number of distinct vulnerability locations, 1..N.
    pub places: i64,

    /// Hard wall-clock limit for a single checker run, in seconds.
    pub checker_timeout: i64,

    /// Underscore-separated tag string, e.g. "hackerdom" or "forcad_nfr".
    pub checker_type: String,

    /// Initial score for every TeamTask row of this service.
    pub default_score: i64,

    pub active: bool,
}

impl Task {
    pub fn checker_tags(&self) -> impl Iterator<Item = &str> {
        self.checker_type.split('_')
    }

    /// Checkers tagged `nfr` do not return a flag id on PUT.
    pub fn checker_returns_flag_id(&self) -> bool {
        !self.checker_tags().any(|tag| tag == "nfr")
    }

    /// Checkers tagged `pfr` produce the public flag data themselves.
    pub fn checker_provides_public_flag_data(&self) -> bool {
        self.checker_tags().any(|tag| tag == "pfr")
    }

    /// View exposed to participants (id and name only).
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
        })
    }
}
