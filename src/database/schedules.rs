//! Last-run bookkeeping for the ticker's scheduled actions.
//!
//! Two keys exist: `start_game` and `rounds`. Persisting them is what makes
//! the ticker safe to kill and restart without double-starting the game or
//! double-advancing a round.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub const START_GAME: &str = "start_game";
pub const ROUNDS: &str = "rounds";

pub fn get_last_run(conn: &Connection, schedule_id: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ts: Option<i64> = conn
        .query_row(
            "SELECT last_run FROM schedulehistory WHERE id = ?1",
            params![schedule_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(ts.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)))
}

pub fn save_last_run(conn: &Connection, schedule_id: &str, run_time: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schedulehistory (id, last_run) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET last_run = excluded.last_run",
        params![schedule_id, run_time.timestamp()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_schema;
    use chrono::TimeZone;

    #[test]
    fn upsert_overwrites_previous_run() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        assert!(get_last_run(&conn, ROUNDS).unwrap().is_none());

        let first = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let second = first + chrono::Duration::seconds(60);
        save_last_run(&conn, ROUNDS, first).unwrap();
        save_last_run(&conn, ROUNDS, second).unwrap();

        assert_eq!(get_last_run(&conn, ROUNDS).unwrap(), Some(second));
        assert!(get_last_run(&conn, START_GAME).unwrap().is_none());
    }
}
