//! Queries over the single `gameconfig` row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::structs::game::GameConfig;

fn config_from_row(row: &Row) -> rusqlite::Result<GameConfig> {
    let start_ts: i64 = row.get("start_time")?;
    Ok(GameConfig {
        id: row.get("id")?,
        game_running: row.get("game_running")?,
        game_hardness: row.get("game_hardness")?,
        max_round: row.get("max_round")?,
        round_time: row.get("round_time")?,
        real_round: row.get("real_round")?,
        flag_prefix: row.get("flag_prefix")?,
        flag_lifetime: row.get("flag_lifetime")?,
        inflation: row.get("inflation")?,
        volga_attacks_mode: row.get("volga_attacks_mode")?,
        timezone: row.get("timezone")?,
        start_time: DateTime::<Utc>::from_timestamp(start_ts, 0).unwrap_or_else(Utc::now),
    })
}

pub fn get_game_config(conn: &Connection) -> rusqlite::Result<GameConfig> {
    conn.query_row("SELECT * FROM gameconfig WHERE id = 1", [], config_from_row)
}

pub fn get_game_running(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row("SELECT game_running FROM gameconfig WHERE id = 1", [], |row| row.get(0))
}

pub fn set_game_running(conn: &Connection, running: bool) -> rusqlite::Result<()> {
    conn.execute("UPDATE gameconfig SET game_running = ?1 WHERE id = 1", params![running])?;
    Ok(())
}

pub fn get_real_round(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT real_round FROM gameconfig WHERE id = 1", [], |row| row.get(0))
}

pub fn set_real_round(conn: &Connection, round: i64) -> rusqlite::Result<()> {
    conn.execute("UPDATE gameconfig SET real_round = ?1 WHERE id = 1", params![round])?;
    Ok(())
}

pub fn insert_game_config(conn: &Connection, config: &GameConfig) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO gameconfig (
            id, game_running, game_hardness, max_round, round_time, real_round,
            flag_prefix, flag_lifetime, inflation, volga_attacks_mode, timezone, start_time
        ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            config.game_running,
            config.game_hardness,
            config.max_round,
            config.round_time,
            config.real_round,
            config.flag_prefix,
            config.flag_lifetime,
            config.inflation,
            config.volga_attacks_mode,
            config.timezone,
            config.start_time.timestamp(),
        ],
    )?;
    Ok(())
}

/// Admin config update; the round counter and running flag stay with the
/// ticker and the pause/resume endpoints.
pub fn update_game_config(conn: &Connection, config: &GameConfig) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE gameconfig SET
            game_hardness = ?1, max_round = ?2, round_time = ?3, flag_prefix = ?4,
            flag_lifetime = ?5, inflation = ?6, volga_attacks_mode = ?7,
            timezone = ?8, start_time = ?9
         WHERE id = 1",
        params![
            config.game_hardness,
            config.max_round,
            config.round_time,
            config.flag_prefix,
            config.flag_lifetime,
            config.inflation,
            config.volga_attacks_mode,
            config.timezone,
            config.start_time.timestamp(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_schema;
    use chrono::TimeZone;

    fn sample_config() -> GameConfig {
        GameConfig {
            id: 1,
            game_running: false,
            game_hardness: 10.0,
            max_round: 300,
            round_time: 60,
            real_round: 0,
            flag_prefix: "FLAG".into(),
            flag_lifetime: 5,
            inflation: true,
            volga_attacks_mode: false,
            timezone: "UTC".into(),
            start_time: Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn config_round_trips() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        insert_game_config(&conn, &sample_config()).unwrap();

        let loaded = get_game_config(&conn).unwrap();
        assert_eq!(loaded.round_time, 60);
        assert_eq!(loaded.start_time, sample_config().start_time);
        assert!(!get_game_running(&conn).unwrap());

        set_game_running(&conn, true).unwrap();
        set_real_round(&conn, 4).unwrap();
        assert!(get_game_running(&conn).unwrap());
        assert_eq!(get_real_round(&conn).unwrap(), 4);
    }
}
