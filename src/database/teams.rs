use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::structs::team::Team;

fn team_from_row(row: &Row) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get("id")?,
        name: row.get("name")?,
        ip: row.get("ip")?,
        token: row.get("token")?,
        active: row.get("active")?,
    })
}

pub fn get_teams(conn: &Connection) -> rusqlite::Result<Vec<Team>> {
    let mut stmt = conn.prepare("SELECT * FROM teams WHERE active = 1 ORDER BY id")?;
    let teams = stmt.query_map([], team_from_row)?.collect::<Result<_, _>>()?;
    Ok(teams)
}

pub fn get_all_teams(conn: &Connection) -> rusqlite::Result<Vec<Team>> {
    let mut stmt = conn.prepare("SELECT * FROM teams ORDER BY id")?;
    let teams = stmt.query_map([], team_from_row)?.collect::<Result<_, _>>()?;
    Ok(teams)
}

pub fn get_team_by_id(conn: &Connection, team_id: i64) -> rusqlite::Result<Option<Team>> {
    conn.query_row("SELECT * FROM teams WHERE id = ?1", params![team_id], team_from_row)
        .optional()
}

pub fn get_team_by_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<Team>> {
    conn.query_row(
        "SELECT * FROM teams WHERE token = ?1 AND active = 1",
        params![token],
        team_from_row,
    )
    .optional()
}

/// Create a team and its TeamTask matrix row for every active task, each
/// seeded with the task's default score.
pub fn create_team(conn: &mut Connection, name: &str, ip: &str, token: &str, active: bool) -> rusqlite::Result<Team> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO teams (name, ip, token, active) VALUES (?1, ?2, ?3, ?4)",
        params![name, ip, token, active],
    )?;
    let team_id = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO teamtasks (team_id, task_id, score)
         SELECT ?1, id, default_score FROM tasks WHERE active = 1",
        params![team_id],
    )?;
    tx.commit()?;

    Ok(Team {
        id: team_id,
        name: name.to_string(),
        ip: ip.to_string(),
        token: token.to_string(),
        active,
    })
}

pub fn update_team(
    conn: &Connection,
    team_id: i64,
    name: Option<&str>,
    ip: Option<&str>,
    active: Option<bool>,
) -> rusqlite::Result<Option<Team>> {
    conn.execute(
        "UPDATE teams SET
            name = COALESCE(?2, name),
            ip = COALESCE(?3, ip),
            active = COALESCE(?4, active)
         WHERE id = ?1",
        params![team_id, name, ip, active],
    )?;
    get_team_by_id(conn, team_id)
}

/// Soft delete; historical rows and flags stay behind.
pub fn delete_team(conn: &Connection, team_id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute("UPDATE teams SET active = 0 WHERE id = ?1", params![team_id])?;
    Ok(changed > 0)
}
