//! `PUT /flags/`, the flag submission endpoint.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::attacks;
use crate::context::Ctx;
use crate::game_state;

/// Maximum flags per request.
const MAX_FLAGS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct FlagsRequest {
    pub flags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FlagResponse {
    pub msg: String,
    pub flag: String,
}

type SubmitRejection = (StatusCode, Json<serde_json::Value>);

fn bad_request(detail: &str) -> SubmitRejection {
    (StatusCode::BAD_REQUEST, Json(json!({"detail": detail})))
}

/// Validate the team token, then run every flag through the validation and
/// scoring pipeline sequentially, preserving input order in the response.
pub async fn submit_flags(
    State(ctx): State<Ctx>,
    headers: HeaderMap,
    Json(body): Json<FlagsRequest>,
) -> Result<Json<Vec<FlagResponse>>, SubmitRejection> {
    let token = headers
        .get("X-Team-Token")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| bad_request("Missing X-Team-Token header"))?;

    // Uniform rejection: unknown and inactive tokens read the same.
    let team = game_state::get_team_by_token(&ctx.db, &ctx.store, token)
        .await
        .map_err(|_| bad_request("Invalid team token"))?
        .ok_or_else(|| bad_request("Invalid team token"))?;

    if body.flags.is_empty() || body.flags.len() > MAX_FLAGS {
        return Err(bad_request("Expected between 1 and 100 flags"));
    }

    let current_round = game_state::get_real_round(&ctx.store);
    if current_round == -1 {
        return Err(bad_request("Game is not available."));
    }

    // Sequential on purpose: per-flag scoring must be deterministic within a
    // request.
    let mut responses = Vec::with_capacity(body.flags.len());
    for flag in &body.flags {
        let outcome = attacks::handle_attack(&ctx, team.id, flag, current_round).await;
        responses.push(FlagResponse {
            msg: format!("[{flag}] {}", outcome.message),
            flag: flag.clone(),
        });
    }

    Ok(Json(responses))
}
