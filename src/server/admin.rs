//! Admin API: CRUD over teams and tasks, game config, pause/resume and the
//! monitoring views. Everything except login sits behind the session
//! middleware.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::context::Ctx;
use crate::database::{game, tasks, teams};
use crate::game_state;
use crate::monitor;
use crate::structs::game::GameConfig;
use crate::structs::task::Task;
use crate::structs::team::Team;

use super::auth;

pub fn router(ctx: Ctx) -> Router<Ctx> {
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/status", get(auth::status))
        .route("/teams/", get(list_teams).post(create_team))
        .route("/teams/:team_id/", get(get_team).put(update_team).delete(delete_team))
        .route("/tasks/", get(list_tasks).post(create_task))
        .route("/tasks/:task_id/", get(get_task).put(update_task).delete(delete_task))
        .route("/config", get(get_config).put(put_config))
        .route("/game/pause", post(pause_game))
        .route("/game/resume", post(resume_game))
        .route("/monitor/health", get(monitor_health))
        .route("/monitor/current", get(monitor_current))
        .route("/monitor/round/:round", get(monitor_round))
        .route(
            "/monitor/round/:round/team/:team_id/task/:task_id",
            get(monitor_team_task),
        )
        .layer(middleware::from_fn_with_state(ctx, auth::require_admin));

    Router::new().route("/auth/login", post(auth::login)).merge(protected)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"detail": err.to_string()})),
    )
}

fn not_found(what: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({"detail": format!("{what} not found")})))
}

// ---- teams ----

#[derive(Debug, Deserialize)]
struct TeamCreate {
    name: String,
    ip: String,
    #[serde(default = "default_true")]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct TeamUpdate {
    name: Option<String>,
    ip: Option<String>,
    active: Option<bool>,
}

fn default_true() -> bool {
    true
}

async fn list_teams(State(ctx): State<Ctx>) -> Result<Json<Vec<Team>>, ApiError> {
    let all = ctx.db.call(|conn| teams::get_all_teams(conn)).await.map_err(internal)?;
    Ok(Json(all))
}

async fn create_team(State(ctx): State<Ctx>, Json(body): Json<TeamCreate>) -> Result<Json<Team>, ApiError> {
    let token = Team::generate_token();
    let team = ctx
        .db
        .call(move |conn| teams::create_team(conn, &body.name, &body.ip, &token, body.active))
        .await
        .map_err(internal)?;

    // New token must be resolvable for submissions right away.
    game_state::cache_teams(&ctx.db, &ctx.store).await.map_err(internal)?;
    Ok(Json(team))
}

async fn get_team(State(ctx): State<Ctx>, Path(team_id): Path<i64>) -> Result<Json<Team>, ApiError> {
    let team = ctx
        .db
        .call(move |conn| teams::get_team_by_id(conn, team_id))
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Team"))?;
    Ok(Json(team))
}

async fn update_team(
    State(ctx): State<Ctx>,
    Path(team_id): Path<i64>,
    Json(body): Json<TeamUpdate>,
) -> Result<Json<Team>, ApiError> {
    let team = ctx
        .db
        .call(move |conn| {
            teams::update_team(conn, team_id, body.name.as_deref(), body.ip.as_deref(), body.active)
        })
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Team"))?;

    game_state::cache_teams(&ctx.db, &ctx.store).await.map_err(internal)?;
    Ok(Json(team))
}

async fn delete_team(State(ctx): State<Ctx>, Path(team_id): Path<i64>) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = ctx
        .db
        .call(move |conn| teams::delete_team(conn, team_id))
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(not_found("Team"));
    }
    game_state::cache_teams(&ctx.db, &ctx.store).await.map_err(internal)?;
    Ok(Json(json!({"status": "ok"})))
}

// ---- tasks ----

#[derive(Debug, Deserialize)]
struct TaskCreate {
    name: String,
    checker: String,
    #[serde(default)]
    env_path: String,
    #[serde(default)]
    gets: i64,
    #[serde(default)]
    puts: i64,
    #[serde(default = "default_places")]
    places: i64,
    #[serde(default = "default_timeout")]
    checker_timeout: i64,
    #[serde(default = "default_checker_type")]
    checker_type: String,
    #[serde(default = "default_task_score")]
    default_score: i64,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_places() -> i64 {
    1
}
fn default_timeout() -> i64 {
    30
}
fn default_checker_type() -> String {
    "hackerdom".to_string()
}
fn default_task_score() -> i64 {
    2500
}

#[derive(Debug, Deserialize)]
struct TaskUpdate {
    name: Option<String>,
    checker: Option<String>,
    env_path: Option<String>,
    gets: Option<i64>,
    puts: Option<i64>,
    places: Option<i64>,
    checker_timeout: Option<i64>,
    checker_type: Option<String>,
    default_score: Option<i64>,
    active: Option<bool>,
}

async fn list_tasks(State(ctx): State<Ctx>) -> Result<Json<Vec<Task>>, ApiError> {
    let all = ctx.db.call(|conn| tasks::get_all_tasks(conn)).await.map_err(internal)?;
    Ok(Json(all))
}

async fn create_task(State(ctx): State<Ctx>, Json(body): Json<TaskCreate>) -> Result<Json<Task>, ApiError> {
    let task = Task {
        id: 0,
        name: body.name,
        checker: body.checker,
        env_path: body.env_path,
        gets: body.gets,
        puts: body.puts,
        places: body.places,
        checker_timeout: body.checker_timeout,
        checker_type: body.checker_type,
        default_score: body.default_score,
        active: body.active,
    };
    let task = ctx
        .db
        .call(move |conn| tasks::create_task(conn, &task))
        .await
        .map_err(internal)?;
    game_state::cache_tasks(&ctx.db, &ctx.store).await.map_err(internal)?;
    Ok(Json(task))
}

async fn get_task(State(ctx): State<Ctx>, Path(task_id): Path<i64>) -> Result<Json<Task>, ApiError> {
    let task = ctx
        .db
        .call(move |conn| tasks::get_task_by_id(conn, task_id))
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Task"))?;
    Ok(Json(task))
}

async fn update_task(
    State(ctx): State<Ctx>,
    Path(task_id): Path<i64>,
    Json(body): Json<TaskUpdate>,
) -> Result<Json<Task>, ApiError> {
    let task = ctx
        .db
        .call(move |conn| {
            tasks::update_task(
                conn,
                task_id,
                body.name.as_deref(),
                body.checker.as_deref(),
                body.env_path.as_deref(),
                body.gets,
                body.puts,
                body.places,
                body.checker_timeout,
                body.checker_type.as_deref(),
                body.default_score,
                body.active,
            )
        })
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Task"))?;
    game_state::cache_tasks(&ctx.db, &ctx.store).await.map_err(internal)?;
    Ok(Json(task))
}

async fn delete_task(State(ctx): State<Ctx>, Path(task_id): Path<i64>) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = ctx
        .db
        .call(move |conn| tasks::delete_task(conn, task_id))
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(not_found("Task"));
    }
    game_state::cache_tasks(&ctx.db, &ctx.store).await.map_err(internal)?;
    Ok(Json(json!({"status": "ok"})))
}

// ---- config and game control ----

async fn get_config(State(ctx): State<Ctx>) -> Result<Json<GameConfig>, ApiError> {
    let config = ctx.db.call(|conn| game::get_game_config(conn)).await.map_err(internal)?;
    Ok(Json(config))
}

async fn put_config(State(ctx): State<Ctx>, Json(body): Json<GameConfig>) -> Result<Json<GameConfig>, ApiError> {
    ctx.db
        .call(move |conn| game::update_game_config(conn, &body))
        .await
        .map_err(internal)?;
    game_state::flush_game_config_cache(&ctx.store);
    let config = ctx.db.call(|conn| game::get_game_config(conn)).await.map_err(internal)?;
    Ok(Json(config))
}

async fn pause_game(State(ctx): State<Ctx>) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.db
        .call(|conn| game::set_game_running(conn, false))
        .await
        .map_err(internal)?;
    game_state::flush_game_config_cache(&ctx.store);
    Ok(Json(json!({"status": "ok", "game_running": false})))
}

async fn resume_game(State(ctx): State<Ctx>) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.db
        .call(|conn| game::set_game_running(conn, true))
        .await
        .map_err(internal)?;
    game_state::flush_game_config_cache(&ctx.store);
    Ok(Json(json!({"status": "ok", "game_running": true})))
}

// ---- monitoring ----

async fn monitor_health(State(ctx): State<Ctx>) -> Result<Json<monitor::GlobalHealth>, ApiError> {
    let health = monitor::get_global_health(&ctx).await.map_err(internal)?;
    Ok(Json(health))
}

async fn monitor_round(
    State(ctx): State<Ctx>,
    Path(round): Path<i64>,
) -> Result<Json<monitor::RoundCompletion>, ApiError> {
    let completion = monitor::get_round_completion_status(&ctx, round).await.map_err(internal)?;
    Ok(Json(completion))
}

async fn monitor_team_task(
    State(ctx): State<Ctx>,
    Path((round, team_id, task_id)): Path<(i64, i64, i64)>,
) -> Json<serde_json::Value> {
    Json(monitor::get_team_task_status(&ctx, team_id, task_id, round))
}

async fn monitor_current(State(ctx): State<Ctx>) -> Result<Json<monitor::RoundCompletion>, ApiError> {
    let health = monitor::get_global_health(&ctx).await.map_err(internal)?;
    if health.current_round == 0 {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Game not started yet"})),
        ));
    }
    let completion = monitor::get_round_completion_status(&ctx, health.current_round)
        .await
        .map_err(internal)?;
    Ok(Json(completion))
}
