//! Spectator WebSocket streams.
//!
//! `/ws/game_events` sends an `init_scoreboard` on connect, then
//! `scoreboard_update` events. `/ws/live_events` carries the per-action
//! ticker: `flag_submission`, `checker_update`, `flag_stolen`. Both forward
//! from the notifier's broadcast channel, so per-subscriber order matches
//! publish order.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tracing::debug;

use crate::context::Ctx;
use crate::game_state;

pub fn router() -> Router<Ctx> {
    Router::new()
        .route("/ws/game_events", get(game_events))
        .route("/ws/live_events", get(live_events))
}

async fn game_events(State(ctx): State<Ctx>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_stream(ctx, socket, true))
}

async fn live_events(State(ctx): State<Ctx>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_stream(ctx, socket, false))
}

async fn handle_stream(ctx: Ctx, socket: WebSocket, game_stream: bool) {
    let (mut sink, mut source) = socket.split();
    let mut events = ctx.notifier.subscribe();

    if game_stream {
        // Late joiners need the current standings before the next update.
        if let Ok(board) = game_state::construct_scoreboard(&ctx.db).await {
            let init = json!({
                "event_type": "init_scoreboard",
                "event": "init_scoreboard",
                "data": board,
            });
            if sink.send(Message::Text(init.to_string())).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Ok(event) = event else {
                    // Lagged or closed; drop the subscriber.
                    break;
                };
                if event.is_game_event() != game_stream {
                    continue;
                }
                let Ok(encoded) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(encoded)).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Spectator streams are write-only; ignore anything else.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!(game_stream, "websocket subscriber disconnected");
}
