//! Admin session auth: login issues an opaque session token stored with a
//! one-day TTL; protected routes verify it through a middleware layer.
//!
//! Failures are uniform 401s, with no hint whether the username or the session
//! was the problem.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::Ctx;
use crate::store::keys;

const SESSION_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: &'static str,
    pub session: String,
}

fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Pull the `session` cookie out of the request headers.
pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "session").then(|| value.to_string())
    })
}

fn verify_session(ctx: &Ctx, session: Option<&str>) -> bool {
    let Some(session) = session else {
        return false;
    };
    match ctx.store.get(&keys::session(session)) {
        Some(username) => username == ctx.settings.admin.username,
        None => false,
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Not authenticated. Please login first."})),
    )
        .into_response()
}

/// Middleware guarding the admin routes.
pub async fn require_admin(State(ctx): State<Ctx>, request: Request, next: Next) -> Response {
    let session = session_from_headers(request.headers());
    if !verify_session(&ctx, session.as_deref()) {
        return unauthorized();
    }
    next.run(request).await
}

/// `POST /api/admin/auth/login`
pub async fn login(State(ctx): State<Ctx>, Json(body): Json<LoginRequest>) -> Response {
    let admin = &ctx.settings.admin;
    if body.username != admin.username || body.password != admin.password {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid credentials"}))).into_response();
    }

    let session = new_session_token();
    ctx.store
        .set_ex(&keys::session(&session), body.username, SESSION_TTL);

    let cookie = format!(
        "session={session}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_TTL.as_secs()
    );
    (
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            status: "ok",
            session,
        }),
    )
        .into_response()
}

/// `POST /api/admin/auth/logout`
pub async fn logout(State(ctx): State<Ctx>, headers: HeaderMap) -> Response {
    if let Some(session) = session_from_headers(&headers) {
        ctx.store.del(&keys::session(&session));
    }
    (
        [(header::SET_COOKIE, "session=; Path=/; Max-Age=0".to_string())],
        Json(json!({"status": "ok", "message": "Logged out successfully"})),
    )
        .into_response()
}

/// `GET /api/admin/auth/status`
pub async fn status(State(ctx): State<Ctx>, headers: HeaderMap) -> Json<serde_json::Value> {
    let valid = verify_session(&ctx, session_from_headers(&headers).as_deref());
    Json(json!({
        "authenticated": valid,
        "status": if valid { "ok" } else { "unauthorized" },
    }))
}
