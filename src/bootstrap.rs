//! Game setup from `config.yml`: schema reset, config row, tasks, teams and
//! fresh submission tokens.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use config::{Config as RawConfig, File, FileFormat};
use serde::Deserialize;
use tracing::info;

use crate::database::{self, game, tasks, teams, Db};
use crate::store::Store;
use crate::structs::errors::BootstrapError;
use crate::structs::game::GameConfig;
use crate::structs::task::Task;
use crate::structs::team::Team;

#[derive(Debug, Deserialize)]
pub struct BootstrapConfig {
    pub game: GameSection,
    #[serde(default)]
    pub tasks: Vec<TaskSection>,
    #[serde(default)]
    pub teams: Vec<TeamSection>,
}

#[derive(Debug, Deserialize)]
pub struct GameSection {
    /// RFC 3339, or "YYYY-MM-DD HH:MM:SS" taken as UTC.
    pub start_time: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub round_time: i64,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_round: i64,
    pub flag_lifetime: i64,
    #[serde(default = "default_flag_prefix")]
    pub flag_prefix: String,
    #[serde(default = "default_hardness")]
    pub game_hardness: f64,
    #[serde(default = "default_true")]
    pub inflation: bool,
    #[serde(default)]
    pub volga_attacks_mode: bool,
    #[serde(default = "default_score")]
    pub default_score: i64,
    #[serde(default = "default_env_path")]
    pub env_path: String,
    #[serde(default = "default_checkers_path")]
    pub checkers_path: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskSection {
    pub name: String,
    /// Absolute, or relative to `game.checkers_path`.
    pub checker: String,
    pub env_path: Option<String>,
    #[serde(default)]
    pub gets: i64,
    #[serde(default)]
    pub puts: i64,
    #[serde(default = "default_places")]
    pub places: i64,
    pub checker_timeout: i64,
    #[serde(default = "default_checker_type")]
    pub checker_type: String,
    pub default_score: Option<i64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct TeamSection {
    pub name: String,
    pub ip: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_flag_prefix() -> String {
    "FLAG".to_string()
}
fn default_hardness() -> f64 {
    10.0
}
fn default_true() -> bool {
    true
}
fn default_score() -> i64 {
    2500
}
fn default_env_path() -> String {
    "/checkers/bin".to_string()
}
fn default_checkers_path() -> String {
    "/checkers".to_string()
}
fn default_places() -> i64 {
    1
}
fn default_checker_type() -> String {
    "hackerdom".to_string()
}

pub fn load_game_config(path: &Path) -> Result<BootstrapConfig, BootstrapError> {
    let raw = RawConfig::builder()
        .add_source(File::new(&path.to_string_lossy(), FileFormat::Yaml))
        .build()?;
    Ok(raw.try_deserialize()?)
}

pub fn parse_start_time(value: &str) -> Result<DateTime<Utc>, BootstrapError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| BootstrapError::BadStartTime(value.to_string()))
}

/// Wipe and re-seed the database from the YAML file. Returns the
/// (team name, token) pairs for the operator to hand out.
pub fn reset(db: &Db, store: &Store, path: &Path) -> Result<Vec<(String, String)>, BootstrapError> {
    let config = load_game_config(path)?;
    let start_time = parse_start_time(&config.game.start_time)?;

    info!(path = %path.display(), "resetting game from config");

    db.with_conn(|conn| database::reset_schema(conn))?;

    let game_row = GameConfig {
        id: 1,
        game_running: false,
        game_hardness: config.game.game_hardness,
        max_round: config.game.max_round,
        round_time: config.game.round_time,
        real_round: 0,
        flag_prefix: config.game.flag_prefix.clone(),
        flag_lifetime: config.game.flag_lifetime,
        inflation: config.game.inflation,
        volga_attacks_mode: config.game.volga_attacks_mode,
        timezone: config.game.timezone.clone(),
        start_time,
    };
    db.with_conn(|conn| game::insert_game_config(conn, &game_row))?;

    for section in &config.tasks {
        let checker = if section.checker.starts_with('/') {
            section.checker.clone()
        } else {
            format!("{}/{}", config.game.checkers_path.trim_end_matches('/'), section.checker)
        };
        let task = Task {
            id: 0,
            name: section.name.clone(),
            checker,
            env_path: section.env_path.clone().unwrap_or_else(|| config.game.env_path.clone()),
            gets: section.gets,
            puts: section.puts,
            places: section.places,
            checker_timeout: section.checker_timeout,
            checker_type: section.checker_type.clone(),
            default_score: section.default_score.unwrap_or(config.game.default_score),
            active: section.active,
        };
        db.with_conn(|conn| tasks::create_task(conn, &task))?;
    }

    let mut tokens = Vec::with_capacity(config.teams.len());
    for section in &config.teams {
        let token = Team::generate_token();
        db.with_conn(|conn| teams::create_team(conn, &section.name, &section.ip, &token, section.active))?;
        tokens.push((section.name.clone(), token));
    }

    store.flush_all();
    info!(
        tasks = config.tasks.len(),
        teams = config.teams.len(),
        "game reset complete"
    );
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
game:
  start_time: "2026-08-01 10:00:00"
  round_time: 60
  max_round: 300
  flag_lifetime: 5
  flag_prefix: "FLAG"
  game_hardness: 12.5
  volga_attacks_mode: true
  checkers_path: /checkers

tasks:
  - name: web
    checker: web/checker.py
    puts: 1
    gets: 1
    places: 2
    checker_timeout: 20
  - name: pwn
    checker: /opt/pwn/checker
    puts: 2
    gets: 1
    checker_timeout: 15
    checker_type: forcad_nfr

teams:
  - name: alpha
    ip: 10.80.1.2
  - name: bravo
    ip: 10.80.2.2
"#;

    fn write_sample() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn start_time_formats() {
        assert!(parse_start_time("2026-08-01T10:00:00+03:00").is_ok());
        assert_eq!(
            parse_start_time("2026-08-01 10:00:00").unwrap(),
            DateTime::parse_from_rfc3339("2026-08-01T10:00:00Z").unwrap()
        );
        assert!(parse_start_time("next tuesday").is_err());
    }

    #[test]
    fn reset_seeds_config_tasks_teams_and_matrix() {
        let file = write_sample();
        let db = Db::open_in_memory().unwrap();
        let store = Store::new();

        let tokens = reset(&db, &store, file.path()).unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|(_, token)| token.len() == 16));

        let config = db.with_conn(|conn| game::get_game_config(conn)).unwrap();
        assert_eq!(config.round_time, 60);
        assert!(config.volga_attacks_mode);
        assert!(!config.game_running);

        let all_tasks = db.with_conn(|conn| tasks::get_tasks(conn)).unwrap();
        assert_eq!(all_tasks.len(), 2);
        // Relative checker path resolved against checkers_path.
        assert_eq!(all_tasks[0].checker, "/checkers/web/checker.py");
        assert_eq!(all_tasks[1].checker, "/opt/pwn/checker");
        assert!(!all_tasks[1].checker_returns_flag_id());

        // 2 teams x 2 tasks matrix, seeded with the default score.
        let (cells, min_score): (i64, f64) = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*), MIN(score) FROM teamtasks", [], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
            })
            .unwrap();
        assert_eq!(cells, 4);
        assert_eq!(min_score, 2500.0);
    }

    #[test]
    fn reset_twice_starts_clean() {
        let file = write_sample();
        let db = Db::open_in_memory().unwrap();
        let store = Store::new();

        let first = reset(&db, &store, file.path()).unwrap();
        let second = reset(&db, &store, file.path()).unwrap();
        // Fresh tokens each time.
        assert_ne!(first[0].1, second[0].1);

        let team_count: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM teams", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(team_count, 2);
    }
}
