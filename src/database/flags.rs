use std::collections::HashMap;

use rusqlite::{named_params, params, Connection, OptionalExtension, Row};

use crate::structs::flag::Flag;

fn flag_from_row(row: &Row) -> rusqlite::Result<Flag> {
    Ok(Flag {
        id: row.get("id")?,
        flag: row.get("flag")?,
        team_id: row.get("team_id")?,
        task_id: row.get("task_id")?,
        round: row.get("round")?,
        public_flag_data: row.get("public_flag_data")?,
        private_flag_data: row.get("private_flag_data")?,
        vuln_number: row.get("vuln_number")?,
    })
}

/// Insert and return the flag with its assigned id.
pub fn insert_flag(conn: &Connection, flag: &Flag) -> rusqlite::Result<Flag> {
    conn.execute(
        "INSERT INTO flags (flag, team_id, task_id, round, public_flag_data, private_flag_data, vuln_number)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            flag.flag,
            flag.team_id,
            flag.task_id,
            flag.round,
            flag.public_flag_data,
            flag.private_flag_data,
            flag.vuln_number,
        ],
    )?;
    Ok(Flag {
        id: conn.last_insert_rowid(),
        ..flag.clone()
    })
}

pub fn get_flag_by_id(conn: &Connection, flag_id: i64) -> rusqlite::Result<Option<Flag>> {
    conn.query_row("SELECT * FROM flags WHERE id = ?1", params![flag_id], flag_from_row)
        .optional()
}

pub fn get_flag_by_str(conn: &Connection, flag_str: &str) -> rusqlite::Result<Option<Flag>> {
    conn.query_row("SELECT * FROM flags WHERE flag = ?1", params![flag_str], flag_from_row)
        .optional()
}

/// Pick a random flag planted on (team, task) within `[from_round, to_round]`.
/// GET jobs probe these; `None` means there is nothing to retrieve yet.
pub fn get_random_round_flag(
    conn: &Connection,
    team_id: i64,
    task_id: i64,
    from_round: i64,
    to_round: i64,
) -> rusqlite::Result<Option<Flag>> {
    conn.query_row(
        "SELECT * FROM flags
         WHERE team_id = :team AND task_id = :task AND round >= :from AND round <= :to
         ORDER BY RANDOM() LIMIT 1",
        named_params! {
            ":team": team_id,
            ":task": task_id,
            ":from": from_round,
            ":to": to_round,
        },
        flag_from_row,
    )
    .optional()
}

/// Attack data for one round: `task name -> victim ip -> [public_flag_data]`
/// over all flags still inside the lifetime window.
pub fn get_attack_data(
    conn: &Connection,
    current_round: i64,
    flag_lifetime: i64,
) -> rusqlite::Result<HashMap<String, HashMap<String, Vec<String>>>> {
    let mut data: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();

    // Seed every active task so teams see services with no fresh flags too.
    let mut task_stmt = conn.prepare("SELECT name FROM tasks WHERE active = 1")?;
    let task_names = task_stmt.query_map([], |row| row.get::<_, String>(0))?;
    for name in task_names {
        data.entry(name?).or_default();
    }

    let min_round = current_round - flag_lifetime;
    let mut stmt = conn.prepare(
        "SELECT tasks.name, teams.ip, flags.public_flag_data
         FROM flags
         JOIN teams ON flags.team_id = teams.id
         JOIN tasks ON flags.task_id = tasks.id
         WHERE flags.round >= ?1 AND tasks.active = 1
         ORDER BY flags.id",
    )?;
    let rows = stmt.query_map(params![min_round], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    for row in rows {
        let (task_name, ip, public_data) = row?;
        if public_data.is_empty() {
            continue;
        }
        data.entry(task_name).or_default().entry(ip).or_default().push(public_data);
    }

    Ok(data)
}

pub fn insert_stolen_flag(
    conn: &Connection,
    flag_id: i64,
    attacker_id: i64,
    submit_time: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO stolenflags (flag_id, attacker_id, submit_time) VALUES (?1, ?2, ?3)",
        params![flag_id, attacker_id, submit_time],
    )?;
    Ok(())
}

pub fn is_already_stolen(conn: &Connection, flag_id: i64, attacker_id: i64) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM stolenflags WHERE flag_id = ?1 AND attacker_id = ?2",
        params![flag_id, attacker_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
