//! Cache-aware game state operations: the glue between the authoritative
//! database and the fast-path store.
//!
//! Everything here follows one rule: the database is the source of truth,
//! store entries are lossy accelerators. Readers that miss the cache fall
//! back to the database and repopulate it.

use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::database::{flags, game, scoreboard, tasks, teams, teamtasks};
use crate::database::Db;
use crate::store::{keys, Store};
use crate::structs::errors::DbError;
use crate::structs::game::GameConfig;
use crate::structs::team::Team;

const CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);
const TEAM_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Current round from the cache; `-1` when the game has not started (or the
/// cache is cold, which submission handling treats the same way).
pub fn get_real_round(store: &Store) -> i64 {
    store
        .get(keys::current_round())
        .and_then(|value| value.parse().ok())
        .unwrap_or(-1)
}

pub async fn get_real_round_from_db(db: &Db) -> Result<i64, DbError> {
    db.call(|conn| game::get_real_round(conn)).await
}

pub fn set_round_start(store: &Store, round: i64) {
    store.set(&keys::round_start(round), chrono::Utc::now().timestamp().to_string());
}

pub fn get_round_start(store: &Store, round: i64) -> i64 {
    store
        .get(&keys::round_start(round))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Advance `finished_round` -> `finished_round + 1` in the database and the
/// cache, stamping the new round's start instant and dropping the stale
/// config cache. Single writer: the ticker.
pub async fn update_round(db: &Db, store: &Store, finished_round: i64) -> Result<i64, DbError> {
    let new_round = finished_round + 1;

    set_round_start(store, new_round);
    db.call(move |conn| game::set_real_round(conn, new_round)).await?;

    store.set(keys::current_round(), new_round.to_string());
    store.del(keys::game_config());

    Ok(new_round)
}

/// Game config through the 60-second cache.
pub async fn get_current_game_config(db: &Db, store: &Store) -> Result<GameConfig, DbError> {
    if let Some(cached) = store.get(keys::game_config()) {
        if let Ok(config) = serde_json::from_str::<GameConfig>(&cached) {
            return Ok(config);
        }
    }

    let config = db.call(|conn| game::get_game_config(conn)).await?;
    if let Ok(encoded) = serde_json::to_string(&config) {
        store.set_ex(keys::game_config(), encoded, CONFIG_CACHE_TTL);
    }
    Ok(config)
}

pub fn flush_game_config_cache(store: &Store) {
    store.del(keys::game_config());
}

/// Populate the token -> team cache used by submission auth.
pub async fn cache_teams(db: &Db, store: &Store) -> Result<(), DbError> {
    let all = db.call(|conn| teams::get_teams(conn)).await?;
    store.del_prefix("team:token:");
    for team in &all {
        if let Ok(encoded) = serde_json::to_string(team) {
            store.set_ex(&keys::team_by_token(&team.token), encoded, TEAM_CACHE_TTL);
        }
    }
    debug!(teams = all.len(), "team token cache repopulated");
    Ok(())
}

/// Cache the participant-facing task list.
pub async fn cache_tasks(db: &Db, store: &Store) -> Result<(), DbError> {
    let all = db.call(|conn| tasks::get_tasks(conn)).await?;
    let public: Vec<_> = all.iter().map(|task| task.public_view()).collect();
    store.set_ex("tasks", json!(public).to_string(), TEAM_CACHE_TTL);
    Ok(())
}

pub async fn cache_game_config(db: &Db, store: &Store) -> Result<(), DbError> {
    let config = db.call(|conn| game::get_game_config(conn)).await?;
    if let Ok(encoded) = serde_json::to_string(&config) {
        store.set_ex(keys::game_config(), encoded, CONFIG_CACHE_TTL);
    }
    Ok(())
}

/// Resolve a submission token, cache first.
pub async fn get_team_by_token(db: &Db, store: &Store, token: &str) -> Result<Option<Team>, DbError> {
    if let Some(cached) = store.get(&keys::team_by_token(token)) {
        if let Ok(team) = serde_json::from_str::<Team>(&cached) {
            return Ok(Some(team));
        }
    }

    let token = token.to_string();
    let team = db.call(move |conn| teams::get_team_by_token(conn, &token)).await?;
    if let Some(ref team) = team {
        if let Ok(encoded) = serde_json::to_string(team) {
            store.set_ex(&keys::team_by_token(&team.token), encoded, TEAM_CACHE_TTL);
        }
    }
    Ok(team)
}

/// Rebuild the `game_state` snapshot for `round` and cache it.
pub async fn update_game_state(db: &Db, store: &Store, round: i64) -> Result<serde_json::Value, DbError> {
    let cells = db.call(|conn| teamtasks::get_all_teamtasks(conn)).await?;
    let round_start = get_round_start(store, round);

    let state = json!({
        "round": round,
        "round_start": round_start,
        "team_tasks": cells.iter().map(|tt| json!({
            "team_id": tt.team_id,
            "task_id": tt.task_id,
            "status": tt.status,
            "message": tt.public_message,
            "check_status": tt.check_status,
            "check_message": tt.check_message,
            "put_status": tt.put_status,
            "put_message": tt.put_message,
            "get_status": tt.get_status,
            "get_message": tt.get_message,
            "stolen": tt.stolen,
            "lost": tt.lost,
            "score": tt.score,
            "checks": tt.checks,
            "checks_passed": tt.checks_passed,
            "sla": (tt.sla() * 10000.0).round() / 100.0,
        })).collect::<Vec<_>>(),
    });

    store.set(keys::game_state(), state.to_string());
    Ok(state)
}

/// Rebuild attack data for `round` and cache it (no TTL; replaced each
/// round).
pub async fn update_attack_data(db: &Db, store: &Store, round: i64) -> Result<(), DbError> {
    let config = get_current_game_config(db, store).await?;
    let lifetime = config.flag_lifetime;
    let data = db
        .call(move |conn| flags::get_attack_data(conn, round, lifetime))
        .await?;
    store.set(keys::attack_data(), json!(data).to_string());
    Ok(())
}

pub async fn construct_scoreboard(db: &Db) -> Result<serde_json::Value, DbError> {
    db.call(|conn| scoreboard::construct_scoreboard(conn)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_schema;

    async fn setup() -> (Db, Store) {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            init_schema(conn)?;
            conn.execute_batch(
                "INSERT INTO gameconfig (id, game_running, game_hardness, max_round, round_time,
                                         real_round, flag_prefix, flag_lifetime, inflation,
                                         volga_attacks_mode, timezone, start_time)
                 VALUES (1, 0, 10, 100, 60, 0, 'FLAG', 5, 1, 0, 'UTC', 0);
                 INSERT INTO teams (id, name, ip, token) VALUES (1, 'alpha', '10.0.0.2', 'aabbccddeeff0011');",
            )
        })
        .unwrap();
        (db, Store::new())
    }

    #[tokio::test]
    async fn real_round_defaults_to_minus_one() {
        let (_db, store) = setup().await;
        assert_eq!(get_real_round(&store), -1);
        store.set(keys::current_round(), "7");
        assert_eq!(get_real_round(&store), 7);
    }

    #[tokio::test]
    async fn update_round_advances_db_and_cache() {
        let (db, store) = setup().await;
        let new_round = update_round(&db, &store, 0).await.unwrap();
        assert_eq!(new_round, 1);
        assert_eq!(get_real_round(&store), 1);
        assert_eq!(get_real_round_from_db(&db).await.unwrap(), 1);
        assert!(get_round_start(&store, 1) > 0);
    }

    #[tokio::test]
    async fn token_lookup_populates_the_cache() {
        let (db, store) = setup().await;
        let team = get_team_by_token(&db, &store, "aabbccddeeff0011").await.unwrap().unwrap();
        assert_eq!(team.name, "alpha");
        // Second lookup hits the cache even if the row disappears.
        db.with_conn(|conn| conn.execute("DELETE FROM teams", []))
            .unwrap();
        assert!(get_team_by_token(&db, &store, "aabbccddeeff0011")
            .await
            .unwrap()
            .is_some());
        assert!(get_team_by_token(&db, &store, "0000000000000000")
            .await
            .unwrap()
            .is_none());
    }
}
