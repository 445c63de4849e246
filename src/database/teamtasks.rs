//! Atomic per-action updates over the `teamtasks` matrix.
//!
//! Every write recomputes the aggregate `status` and `public_message` inside
//! the same UPDATE statement. The CASE expressions below must stay in sync
//! with [`crate::structs::teamtask::derive_overall_status`]; the tests pin
//! the two against each other. Keeping the derivation inline is what makes
//! CHECK/PUT/GET safe to interleave (and to re-run) for the same cell.

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::structs::status::Action;
use crate::structs::teamtask::TeamTask;

/// Caps applied to checker output before it lands in the row.
pub const PUBLIC_MESSAGE_MAX: usize = 500;
pub const PRIVATE_MESSAGE_MAX: usize = 2000;

/// Char-boundary-safe truncation.
pub fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Aggregate-status CASE. The action currently being written reads from the
/// `:st` parameter (SET expressions see pre-update column values in SQL, so
/// referencing the column would derive from stale state); the other two read
/// their columns.
fn status_case(updated: Action) -> String {
    let slot = |action: Action| {
        if action == updated {
            ":st".to_string()
        } else {
            format!("{}_status", action.verb())
        }
    };
    let (c, p, g) = (slot(Action::Check), slot(Action::Put), slot(Action::Get));
    format!(
        "CASE \
            WHEN {c} = 110 THEN 110 \
            WHEN {c} = 104 THEN 104 \
            WHEN {c} = -1 THEN -1 \
            WHEN {p} = 110 THEN 102 \
            WHEN {p} = 104 THEN 102 \
            WHEN {g} = 110 THEN 103 \
            WHEN {g} = 104 THEN 103 \
            ELSE 101 \
         END"
    )
}

fn message_case(updated: Action) -> String {
    let slot = |action: Action| {
        if action == updated {
            ":st".to_string()
        } else {
            format!("{}_status", action.verb())
        }
    };
    let (c, p, g) = (slot(Action::Check), slot(Action::Put), slot(Action::Get));
    format!(
        "CASE \
            WHEN {c} = 110 THEN 'Service check failed' \
            WHEN {c} = 104 THEN 'Service is down' \
            WHEN {c} = -1 THEN 'Not checked yet' \
            WHEN {p} = 110 THEN 'Service corrupted (PUT failed)' \
            WHEN {p} = 104 THEN 'Service corrupted (PUT unreachable)' \
            WHEN {g} = 110 THEN 'Service mumble (GET failed)' \
            WHEN {g} = 104 THEN 'Service mumble (GET unreachable)' \
            ELSE 'Service operational' \
         END"
    )
}

fn teamtask_from_row(row: &Row) -> rusqlite::Result<TeamTask> {
    Ok(TeamTask {
        team_id: row.get("team_id")?,
        task_id: row.get("task_id")?,
        status: row.get("status")?,
        check_status: row.get("check_status")?,
        check_message: row.get("check_message")?,
        check_private: row.get("check_private")?,
        check_attempts: row.get("check_attempts")?,
        put_status: row.get("put_status")?,
        put_message: row.get("put_message")?,
        put_private: row.get("put_private")?,
        put_attempts: row.get("put_attempts")?,
        get_status: row.get("get_status")?,
        get_message: row.get("get_message")?,
        get_private: row.get("get_private")?,
        get_attempts: row.get("get_attempts")?,
        stolen: row.get("stolen")?,
        lost: row.get("lost")?,
        score: row.get("score")?,
        checks: row.get("checks")?,
        checks_passed: row.get("checks_passed")?,
        public_message: row.get("public_message")?,
        private_message: row.get("private_message")?,
        command: row.get("command")?,
    })
}

pub fn get_teamtask(conn: &Connection, team_id: i64, task_id: i64) -> rusqlite::Result<Option<TeamTask>> {
    conn.query_row(
        "SELECT * FROM teamtasks WHERE team_id = :team AND task_id = :task",
        named_params! { ":team": team_id, ":task": task_id },
        teamtask_from_row,
    )
    .optional()
}

pub fn get_all_teamtasks(conn: &Connection) -> rusqlite::Result<Vec<TeamTask>> {
    let mut stmt = conn.prepare("SELECT * FROM teamtasks ORDER BY team_id, task_id")?;
    let rows = stmt.query_map([], teamtask_from_row)?.collect::<Result<_, _>>()?;
    Ok(rows)
}

/// CHECK and PUT statuses in one read, for the GET dependency poll.
pub fn get_check_and_put_status(
    conn: &Connection,
    team_id: i64,
    task_id: i64,
) -> rusqlite::Result<Option<(i64, i64)>> {
    conn.query_row(
        "SELECT check_status, put_status FROM teamtasks WHERE team_id = :team AND task_id = :task",
        named_params! { ":team": team_id, ":task": task_id },
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

/// Apply a finished CHECK: status fields, counters, SLA bookkeeping and the
/// aggregate derivation, all in one statement.
pub fn apply_check_result(
    conn: &Connection,
    team_id: i64,
    task_id: i64,
    status_code: i64,
    public_message: &str,
    private_message: &str,
    command: &str,
) -> rusqlite::Result<()> {
    let sql = format!(
        "UPDATE teamtasks SET
            check_status = :st,
            check_message = :public,
            check_private = :private,
            check_attempts = check_attempts + 1,
            checks = checks + 1,
            checks_passed = checks_passed + (CASE WHEN :st = 101 THEN 1 ELSE 0 END),
            command = :command,
            private_message = CASE WHEN :st != 101 THEN :private ELSE private_message END,
            status = {status},
            public_message = {message}
         WHERE team_id = :team AND task_id = :task",
        status = status_case(Action::Check),
        message = message_case(Action::Check),
    );
    conn.execute(
        &sql,
        named_params! {
            ":team": team_id,
            ":task": task_id,
            ":st": status_code,
            ":public": clip(public_message, PUBLIC_MESSAGE_MAX),
            ":private": clip(private_message, PRIVATE_MESSAGE_MAX),
            ":command": command,
        },
    )?;
    Ok(())
}

/// Apply a finished PUT or GET run.
pub fn apply_action_result(
    conn: &Connection,
    team_id: i64,
    task_id: i64,
    action: Action,
    status_code: i64,
    public_message: &str,
    private_message: &str,
    command: &str,
) -> rusqlite::Result<()> {
    let verb = action.verb();
    let sql = format!(
        "UPDATE teamtasks SET
            {verb}_status = :st,
            {verb}_message = :public,
            {verb}_private = :private,
            {verb}_attempts = {verb}_attempts + 1,
            command = :command,
            status = {status},
            public_message = {message}
         WHERE team_id = :team AND task_id = :task",
        status = status_case(action),
        message = message_case(action),
    );
    conn.execute(
        &sql,
        named_params! {
            ":team": team_id,
            ":task": task_id,
            ":st": status_code,
            ":public": clip(public_message, PUBLIC_MESSAGE_MAX),
            ":private": clip(private_message, PRIVATE_MESSAGE_MAX),
            ":command": command,
        },
    )?;
    Ok(())
}

/// PUT/GET skipped because an upstream action failed: record the inherited
/// failing code without touching the command.
pub fn apply_skipped(
    conn: &Connection,
    team_id: i64,
    task_id: i64,
    action: Action,
    inherited_code: i64,
    message: &str,
) -> rusqlite::Result<()> {
    let verb = action.verb();
    let sql = format!(
        "UPDATE teamtasks SET
            {verb}_status = :st,
            {verb}_message = :public,
            {verb}_attempts = {verb}_attempts + 1,
            status = {status},
            public_message = {message_case}
         WHERE team_id = :team AND task_id = :task",
        status = status_case(action),
        message_case = message_case(action),
    );
    conn.execute(
        &sql,
        named_params! {
            ":team": team_id,
            ":task": task_id,
            ":st": inherited_code,
            ":public": clip(message, PUBLIC_MESSAGE_MAX),
        },
    )?;
    Ok(())
}

/// An action handler hit an infrastructure error: record CHECK_FAILED for
/// that action. CHECK errors still count towards SLA.
pub fn apply_error(
    conn: &Connection,
    team_id: i64,
    task_id: i64,
    action: Action,
    error: &str,
) -> rusqlite::Result<()> {
    let verb = action.verb();
    let checks = if action == Action::Check { "checks = checks + 1," } else { "" };
    let sql = format!(
        "UPDATE teamtasks SET
            {verb}_status = :st,
            {verb}_message = :public,
            {verb}_private = :private,
            {verb}_attempts = {verb}_attempts + 1,
            {checks}
            status = {status},
            public_message = {message_case}
         WHERE team_id = :team AND task_id = :task",
        status = status_case(action),
        message_case = message_case(action),
    );
    conn.execute(
        &sql,
        named_params! {
            ":team": team_id,
            ":task": task_id,
            ":st": 110i64,
            ":public": format!("{action} action failed"),
            ":private": clip(error, PRIVATE_MESSAGE_MAX),
        },
    )?;
    Ok(())
}

/// Snapshot one cell into the round history log.
pub fn log_to_history(
    conn: &Connection,
    team_id: i64,
    task_id: i64,
    round: i64,
    now_ts: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO teamtaskslog
            (round, team_id, task_id, status, stolen, lost, score, checks,
             checks_passed, public_message, private_message, command, ts)
         SELECT :round, team_id, task_id, status, stolen, lost, score, checks,
                checks_passed, public_message, private_message, command, :ts
         FROM teamtasks WHERE team_id = :team AND task_id = :task",
        named_params! {
            ":round": round,
            ":team": team_id,
            ":task": task_id,
            ":ts": now_ts,
        },
    )?;
    Ok(())
}

/// Full history for one team, newest round last.
pub fn get_team_history(conn: &Connection, team_id: i64) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT round, task_id, status, stolen, lost, score, checks, checks_passed, public_message
         FROM teamtaskslog WHERE team_id = ?1 ORDER BY round, task_id",
    )?;
    let rows = stmt
        .query_map([team_id], |row| {
            let checks: i64 = row.get(6)?;
            let checks_passed: i64 = row.get(7)?;
            let sla = if checks > 0 {
                checks_passed as f64 / checks as f64
            } else {
                0.0
            };
            Ok(serde_json::json!({
                "round": row.get::<_, i64>(0)?,
                "task_id": row.get::<_, i64>(1)?,
                "status": row.get::<_, i64>(2)?,
                "stolen": row.get::<_, i64>(3)?,
                "lost": row.get::<_, i64>(4)?,
                "score": row.get::<_, f64>(5)?,
                "sla": sla,
            }))
        })?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_schema;
    use crate::structs::teamtask::derive_overall_status;
    use rusqlite::params;

    fn setup_cell() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO teams (id, name, ip, token) VALUES (4, 'delta', '10.0.0.5', 'aa');
             INSERT INTO tasks (id, name, checker, env_path, gets, puts, places, checker_timeout,
                                checker_type, default_score)
             VALUES (1, 'web', '/c', '', 1, 1, 1, 10, 'hackerdom', 2500);
             INSERT INTO teamtasks (team_id, task_id, score) VALUES (4, 1, 2500);",
        )
        .unwrap();
        conn
    }

    fn cell(conn: &Connection) -> TeamTask {
        get_teamtask(conn, 4, 1).unwrap().unwrap()
    }

    #[test]
    fn check_updates_counters_and_aggregate() {
        let conn = setup_cell();
        apply_check_result(&conn, 4, 1, 101, "ok", "debug", "checker check ip").unwrap();

        let tt = cell(&conn);
        assert_eq!(tt.check_status, 101);
        assert_eq!((tt.checks, tt.checks_passed, tt.check_attempts), (1, 1, 1));
        assert_eq!(tt.status, 101);
        assert_eq!(tt.public_message, "Service operational");
        assert_eq!(tt.command, "checker check ip");

        apply_check_result(&conn, 4, 1, 104, "down", "refused", "checker check ip").unwrap();
        let tt = cell(&conn);
        assert_eq!((tt.checks, tt.checks_passed), (2, 1));
        assert_eq!(tt.status, 104);
        assert_eq!(tt.public_message, "Service is down");
        assert_eq!(tt.private_message, "refused");
    }

    #[test]
    fn aggregate_uses_the_fresh_action_status() {
        // The CASE must read the value being written, not the stale column.
        let conn = setup_cell();
        apply_check_result(&conn, 4, 1, 101, "ok", "", "c").unwrap();
        apply_action_result(&conn, 4, 1, Action::Put, 110, "bad", "trace", "c put").unwrap();

        let tt = cell(&conn);
        assert_eq!(tt.status, 102);
        assert_eq!(tt.public_message, "Service corrupted (PUT failed)");
    }

    #[test]
    fn sql_derivation_matches_the_reference_function() {
        let conn = setup_cell();
        let codes = [-1i64, 101, 102, 103, 104, 110];
        for &check in &codes {
            for &put in &codes {
                for &get in &codes {
                    conn.execute(
                        "UPDATE teamtasks SET check_status = ?1, put_status = ?2 WHERE team_id = 4",
                        params![check, put],
                    )
                    .unwrap();
                    apply_action_result(&conn, 4, 1, Action::Get, get, "m", "p", "cmd").unwrap();

                    let tt = cell(&conn);
                    let (expected, expected_msg) = derive_overall_status(check, put, get);
                    assert_eq!(tt.status, expected, "check={check} put={put} get={get}");
                    assert_eq!(tt.public_message, expected_msg);
                }
            }
        }
    }

    #[test]
    fn skipped_actions_inherit_the_failing_code() {
        let conn = setup_cell();
        apply_check_result(&conn, 4, 1, 104, "down", "", "c").unwrap();
        apply_skipped(&conn, 4, 1, Action::Put, 104, "Skipped: CHECK failed").unwrap();

        let tt = cell(&conn);
        assert_eq!(tt.put_status, 104);
        assert_eq!(tt.put_attempts, 1);
        // CHECK failure still dominates the aggregate.
        assert_eq!(tt.status, 104);
    }

    #[test]
    fn error_path_counts_checks_for_sla() {
        let conn = setup_cell();
        apply_error(&conn, 4, 1, Action::Check, "db timeout").unwrap();
        let tt = cell(&conn);
        assert_eq!(tt.check_status, 110);
        assert_eq!((tt.checks, tt.checks_passed), (1, 0));
        assert_eq!(tt.status, 110);

        apply_error(&conn, 4, 1, Action::Get, "boom").unwrap();
        let tt = cell(&conn);
        assert_eq!(tt.get_status, 110);
        assert_eq!(tt.checks, 1);
    }

    #[test]
    fn history_snapshot_copies_the_row() {
        let conn = setup_cell();
        apply_check_result(&conn, 4, 1, 101, "ok", "", "c").unwrap();
        log_to_history(&conn, 4, 1, 3, 1_700_000_000).unwrap();

        let history = get_team_history(&conn, 4).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["round"], 3);
        assert_eq!(history[0]["status"], 101);
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("abcdef", 3), "abc");
        // 'é' is two bytes; clipping mid-char must back off.
        assert_eq!(clip("éé", 3), "é");
        assert_eq!(clip("short", 500), "short");
    }
}
