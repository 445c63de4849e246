use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::structs::task::Task;

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        name: row.get("name")?,
        checker: row.get("checker")?,
        env_path: row.get("env_path")?,
        gets: row.get("gets")?,
        puts: row.get("puts")?,
        places: row.get("places")?,
        checker_timeout: row.get("checker_timeout")?,
        checker_type: row.get("checker_type")?,
        default_score: row.get("default_score")?,
        active: row.get("active")?,
    })
}

pub fn get_tasks(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE active = 1 ORDER BY id")?;
    let tasks = stmt.query_map([], task_from_row)?.collect::<Result<_, _>>()?;
    Ok(tasks)
}

pub fn get_all_tasks(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY id")?;
    let tasks = stmt.query_map([], task_from_row)?.collect::<Result<_, _>>()?;
    Ok(tasks)
}

pub fn get_task_by_id(conn: &Connection, task_id: i64) -> rusqlite::Result<Option<Task>> {
    conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![task_id], task_from_row)
        .optional()
}

/// Insert a task and backfill TeamTask rows for every active team.
pub fn create_task(conn: &Connection, task: &Task) -> rusqlite::Result<Task> {
    conn.execute(
        "INSERT INTO tasks (name, checker, env_path, gets, puts, places,
                            checker_timeout, checker_type, default_score, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            task.name,
            task.checker,
            task.env_path,
            task.gets,
            task.puts,
            task.places,
            task.checker_timeout,
            task.checker_type,
            task.default_score,
            task.active,
        ],
    )?;
    let task_id = conn.last_insert_rowid();

    conn.execute(
        "INSERT OR IGNORE INTO teamtasks (team_id, task_id, score)
         SELECT id, ?1, ?2 FROM teams WHERE active = 1",
        params![task_id, task.default_score],
    )?;

    Ok(Task {
        id: task_id,
        ..task.clone()
    })
}

#[allow(clippy::too_many_arguments)]
pub fn update_task(
    conn: &Connection,
    task_id: i64,
    name: Option<&str>,
    checker: Option<&str>,
    env_path: Option<&str>,
    gets: Option<i64>,
    puts: Option<i64>,
    places: Option<i64>,
    checker_timeout: Option<i64>,
    checker_type: Option<&str>,
    default_score: Option<i64>,
    active: Option<bool>,
) -> rusqlite::Result<Option<Task>> {
    conn.execute(
        "UPDATE tasks SET
            name = COALESCE(?2, name),
            checker = COALESCE(?3, checker),
            env_path = COALESCE(?4, env_path),
            gets = COALESCE(?5, gets),
            puts = COALESCE(?6, puts),
            places = COALESCE(?7, places),
            checker_timeout = COALESCE(?8, checker_timeout),
            checker_type = COALESCE(?9, checker_type),
            default_score = COALESCE(?10, default_score),
            active = COALESCE(?11, active)
         WHERE id = ?1",
        params![
            task_id,
            name,
            checker,
            env_path,
            gets,
            puts,
            places,
            checker_timeout,
            checker_type,
            default_score,
            active,
        ],
    )?;
    get_task_by_id(conn, task_id)
}

pub fn delete_task(conn: &Connection, task_id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute("UPDATE tasks SET active = 0 WHERE id = ?1", params![task_id])?;
    Ok(changed > 0)
}
