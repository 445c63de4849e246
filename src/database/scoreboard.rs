//! Scoreboard construction: per-team total score, mean SLA, attack and
//! defense tallies, ranked by score.

use rusqlite::Connection;
use serde_json::json;

use super::{game, tasks, teams, teamtasks};

/// Build the full scoreboard document: `{state, teams, tasks, config}`.
pub fn construct_scoreboard(conn: &Connection) -> rusqlite::Result<serde_json::Value> {
    let all_teams = teams::get_teams(conn)?;
    let all_tasks = tasks::get_tasks(conn)?;
    let cells = teamtasks::get_all_teamtasks(conn)?;
    let config = game::get_game_config(conn)?;

    let cell_map: std::collections::HashMap<(i64, i64), &crate::structs::teamtask::TeamTask> =
        cells.iter().map(|tt| ((tt.team_id, tt.task_id), tt)).collect();

    let mut team_scores: Vec<serde_json::Value> = Vec::with_capacity(all_teams.len());
    for team in &all_teams {
        let mut total_score = 0.0;
        let mut sla_sum = 0.0;
        let mut sla_count = 0usize;
        let mut attacks = 0i64;
        let mut losses = 0i64;

        for task in &all_tasks {
            if let Some(tt) = cell_map.get(&(team.id, task.id)) {
                total_score += tt.score;
                sla_sum += tt.sla();
                sla_count += 1;
                attacks += tt.stolen;
                losses += tt.lost;
            }
        }

        let avg_sla = if sla_count > 0 { sla_sum / sla_count as f64 } else { 0.0 };
        team_scores.push(json!({
            "team_id": team.id,
            "team_name": team.name,
            "score": (total_score * 100.0).round() / 100.0,
            "sla": (avg_sla * 1000.0).round() / 1000.0,
            "attack": attacks,
            "defense": losses,
        }));
    }

    team_scores.sort_by(|a, b| {
        let sa = a["score"].as_f64().unwrap_or(0.0);
        let sb = b["score"].as_f64().unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });
    for (idx, entry) in team_scores.iter_mut().enumerate() {
        entry["rank"] = json!(idx + 1);
    }

    Ok(json!({
        "state": {
            "round": config.real_round,
            "team_scores": team_scores,
        },
        "teams": all_teams.iter().map(|t| json!({"id": t.id, "name": t.name})).collect::<Vec<_>>(),
        "tasks": all_tasks.iter().map(|t| json!({"id": t.id, "name": t.name})).collect::<Vec<_>>(),
        "config": public_config(&config),
    }))
}

/// Config fields participants are allowed to see.
pub fn public_config(config: &crate::structs::game::GameConfig) -> serde_json::Value {
    json!({
        "game_running": config.game_running,
        "round_time": config.round_time,
        "max_round": config.max_round,
        "real_round": config.real_round,
        "flag_lifetime": config.flag_lifetime,
        "flag_prefix": config.flag_prefix,
        "volga_attacks_mode": config.volga_attacks_mode,
        "timezone": config.timezone,
        "start_time": config.start_time.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_schema;

    #[test]
    fn scoreboard_ranks_by_total_score() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO gameconfig (id, game_running, game_hardness, max_round, round_time,
                                     real_round, flag_prefix, flag_lifetime, inflation,
                                     volga_attacks_mode, timezone, start_time)
             VALUES (1, 1, 10, 100, 60, 5, 'FLAG', 5, 1, 0, 'UTC', 0);
             INSERT INTO teams (id, name, ip, token) VALUES (1, 'alpha', '10.0.0.2', 'aa');
             INSERT INTO teams (id, name, ip, token) VALUES (2, 'bravo', '10.0.0.3', 'bb');
             INSERT INTO tasks (id, name, checker, env_path, gets, puts, places, checker_timeout,
                                checker_type, default_score)
             VALUES (1, 'web', '/c', '', 1, 1, 1, 10, 'hackerdom', 2500);
             INSERT INTO teamtasks (team_id, task_id, score, checks, checks_passed, stolen, lost)
             VALUES (1, 1, 1000, 10, 5, 3, 1);
             INSERT INTO teamtasks (team_id, task_id, score, checks, checks_passed, stolen, lost)
             VALUES (2, 1, 2000, 10, 10, 0, 2);",
        )
        .unwrap();

        let board = construct_scoreboard(&conn).unwrap();
        let scores = board["state"]["team_scores"].as_array().unwrap();

        assert_eq!(scores[0]["team_name"], "bravo");
        assert_eq!(scores[0]["rank"], 1);
        assert_eq!(scores[0]["sla"], 1.0);
        assert_eq!(scores[1]["team_name"], "alpha");
        assert_eq!(scores[1]["attack"], 3);
        assert_eq!(board["state"]["round"], 5);
        assert_eq!(board["config"]["round_time"], 60);
    }
}
