//! HTTP/WebSocket API: flag submission, admin, public client data and the
//! spectator event streams.

pub mod admin;
pub mod auth;
pub mod events;
pub mod public;
pub mod submissions;

use axum::routing::put;
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::context::Ctx;

pub fn build_router(ctx: Ctx) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/flags/", put(submissions::submit_flags))
        .merge(public::router())
        .merge(events::router())
        .nest("/api/admin", admin::router(ctx.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until shutdown flips.
pub async fn serve(ctx: Ctx, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr = ctx.settings.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "API listening");

    let router = build_router(ctx);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
