//! Authoritative store: SQLite behind a blocking-pool handle.
//!
//! Query code lives in the submodules as plain functions over
//! [`rusqlite::Connection`]; async callers wrap them in [`Db::call`] so the
//! event loop never blocks on database I/O.

pub mod flags;
pub mod game;
pub mod schedules;
pub mod scoreboard;
pub mod tasks;
pub mod teams;
pub mod teamtasks;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::structs::errors::DbError;

/// Shared handle to the SQLite database.
///
/// A single connection guarded by a mutex: writes are serialized (which
/// SQLite wants anyway) and every call runs on the blocking thread pool.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|_| DbError::Closed)?
        .map_err(DbError::from)
    }

    /// Synchronous access for bootstrap and tests.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>) -> Result<T, DbError> {
        let mut guard = self.conn.lock();
        f(&mut guard).map_err(DbError::from)
    }
}

/// Create all tables if they don't exist.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// Drop and recreate every table. Used by `adarena reset`.
pub fn reset_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS stolenflags;
         DROP TABLE IF EXISTS flags;
         DROP TABLE IF EXISTS teamtaskslog;
         DROP TABLE IF EXISTS teamtasks;
         DROP TABLE IF EXISTS schedulehistory;
         DROP TABLE IF EXISTS teams;
         DROP TABLE IF EXISTS tasks;
         DROP TABLE IF EXISTS gameconfig;",
    )?;
    init_schema(conn)
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gameconfig (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    game_running INTEGER NOT NULL DEFAULT 0,
    game_hardness REAL NOT NULL CHECK (game_hardness >= 1),
    max_round INTEGER NOT NULL CHECK (max_round >= 0),
    round_time INTEGER NOT NULL CHECK (round_time > 0),
    real_round INTEGER NOT NULL DEFAULT 0,
    flag_prefix TEXT NOT NULL DEFAULT 'FLAG',
    flag_lifetime INTEGER NOT NULL CHECK (flag_lifetime > 0),
    inflation INTEGER NOT NULL DEFAULT 1,
    volga_attacks_mode INTEGER NOT NULL DEFAULT 0,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    start_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS teams (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL DEFAULT '',
    ip TEXT NOT NULL,
    token TEXT NOT NULL DEFAULT '',
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL DEFAULT '',
    checker TEXT NOT NULL DEFAULT '',
    env_path TEXT NOT NULL DEFAULT '',
    gets INTEGER NOT NULL CHECK (gets >= 0),
    puts INTEGER NOT NULL CHECK (puts >= 0),
    places INTEGER NOT NULL CHECK (places > 0),
    checker_timeout INTEGER NOT NULL CHECK (checker_timeout > 0),
    checker_type TEXT NOT NULL DEFAULT 'hackerdom',
    default_score INTEGER NOT NULL CHECK (default_score >= 0),
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS teamtasks (
    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    status INTEGER NOT NULL DEFAULT -1,
    check_status INTEGER NOT NULL DEFAULT -1 CHECK (check_status IN (-1, 101, 102, 103, 104, 110)),
    check_message TEXT NOT NULL DEFAULT '',
    check_private TEXT NOT NULL DEFAULT '',
    check_attempts INTEGER NOT NULL DEFAULT 0 CHECK (check_attempts >= 0),
    put_status INTEGER NOT NULL DEFAULT -1 CHECK (put_status IN (-1, 101, 102, 103, 104, 110)),
    put_message TEXT NOT NULL DEFAULT '',
    put_private TEXT NOT NULL DEFAULT '',
    put_attempts INTEGER NOT NULL DEFAULT 0 CHECK (put_attempts >= 0),
    get_status INTEGER NOT NULL DEFAULT -1 CHECK (get_status IN (-1, 101, 102, 103, 104, 110)),
    get_message TEXT NOT NULL DEFAULT '',
    get_private TEXT NOT NULL DEFAULT '',
    get_attempts INTEGER NOT NULL DEFAULT 0 CHECK (get_attempts >= 0),
    stolen INTEGER NOT NULL DEFAULT 0 CHECK (stolen >= 0),
    lost INTEGER NOT NULL DEFAULT 0 CHECK (lost >= 0),
    score REAL NOT NULL DEFAULT 0 CHECK (score >= 0),
    checks INTEGER NOT NULL DEFAULT 0,
    checks_passed INTEGER NOT NULL DEFAULT 0,
    public_message TEXT NOT NULL DEFAULT '',
    private_message TEXT NOT NULL DEFAULT '',
    command TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (team_id, task_id),
    CHECK (checks >= 0 AND checks_passed >= 0 AND checks_passed <= checks)
);

CREATE TABLE IF NOT EXISTS teamtaskslog (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    round INTEGER NOT NULL,
    team_id INTEGER NOT NULL,
    task_id INTEGER NOT NULL,
    status INTEGER NOT NULL,
    stolen INTEGER NOT NULL DEFAULT 0,
    lost INTEGER NOT NULL DEFAULT 0,
    score REAL NOT NULL DEFAULT 0,
    checks INTEGER NOT NULL DEFAULT 0,
    checks_passed INTEGER NOT NULL DEFAULT 0,
    public_message TEXT NOT NULL DEFAULT '',
    private_message TEXT NOT NULL DEFAULT '',
    command TEXT NOT NULL DEFAULT '',
    ts INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS flags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    flag TEXT NOT NULL UNIQUE,
    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE RESTRICT,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE RESTRICT,
    round INTEGER NOT NULL CHECK (round >= 0),
    public_flag_data TEXT NOT NULL,
    private_flag_data TEXT NOT NULL,
    vuln_number INTEGER
);

CREATE INDEX IF NOT EXISTS idx_flags_team_task_round ON flags (team_id, task_id, round);

CREATE TABLE IF NOT EXISTS stolenflags (
    flag_id INTEGER NOT NULL REFERENCES flags(id) ON DELETE RESTRICT,
    attacker_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE RESTRICT,
    submit_time INTEGER NOT NULL,
    PRIMARY KEY (flag_id, attacker_id)
);

CREATE TABLE IF NOT EXISTS schedulehistory (
    id TEXT PRIMARY KEY,
    last_run INTEGER NOT NULL
);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_runs_queries_on_the_blocking_pool() {
        let db = Db::open_in_memory().unwrap();
        let one: i64 = db
            .call(|conn| conn.query_row("SELECT 1", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }
}
