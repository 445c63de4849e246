//! Read-only client endpoints for participants and spectators.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::context::Ctx;
use crate::database::{scoreboard, teams, teamtasks};
use crate::game_state;
use crate::store::keys;

pub fn router() -> Router<Ctx> {
    Router::new()
        .route("/api/client/teams/", get(list_teams))
        .route("/api/client/tasks/", get(list_tasks))
        .route("/api/client/config/", get(get_config))
        .route("/api/client/attack_data/", get(get_attack_data))
        .route("/api/client/teams/:team_id/", get(team_history))
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"detail": err.to_string()})),
    )
}

async fn list_teams(State(ctx): State<Ctx>) -> Result<Json<serde_json::Value>, ApiError> {
    let all = ctx.db.call(|conn| teams::get_teams(conn)).await.map_err(internal)?;
    Ok(Json(json!(all.iter().map(|t| t.public_view()).collect::<Vec<_>>())))
}

async fn list_tasks(State(ctx): State<Ctx>) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(cached) = ctx.store.get("tasks") {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&cached) {
            return Ok(Json(value));
        }
    }
    let all = ctx
        .db
        .call(|conn| crate::database::tasks::get_tasks(conn))
        .await
        .map_err(internal)?;
    Ok(Json(json!(all.iter().map(|t| t.public_view()).collect::<Vec<_>>())))
}

async fn get_config(State(ctx): State<Ctx>) -> Result<Json<serde_json::Value>, ApiError> {
    let config = game_state::get_current_game_config(&ctx.db, &ctx.store)
        .await
        .map_err(internal)?;
    Ok(Json(scoreboard::public_config(&config)))
}

async fn get_attack_data(State(ctx): State<Ctx>) -> Json<serde_json::Value> {
    let data = ctx
        .store
        .get(keys::attack_data())
        .and_then(|encoded| serde_json::from_str(&encoded).ok())
        .unwrap_or_else(|| json!({}));
    Json(data)
}

async fn team_history(
    State(ctx): State<Ctx>,
    Path(team_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let team = ctx
        .db
        .call(move |conn| teams::get_team_by_id(conn, team_id))
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, Json(json!({"detail": "Team not found"}))))?;

    let history = ctx
        .db
        .call(move |conn| teamtasks::get_team_history(conn, team_id))
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "team": team.public_view(),
        "history": history,
    })))
}
