//! WebSocket progress stream for one job.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{api_error, ApiError};
use crate::state::AppState;

/// GET /ws/{job_id}
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(job_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    state.controller.status(job_id).map_err(api_error)?;
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, job_id)).into_response())
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>, job_id: Uuid) {
    let hub = state.controller.hub().clone();
    let subscription = hub.subscribe(job_id);
    let subscriber = subscription.id;
    let mut rx = subscription.rx;
    let (mut sender, mut receiver) = socket.split();
    debug!(%job_id, "progress subscriber connected");

    // Forward hub messages to this client. Ends when the hub drops the
    // channel (failed delivery or job reaped) or the client goes away.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(%job_id, error = %e, "failed to encode progress message");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Client frames only keep the connection alive.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unsubscribe(job_id, subscriber);
    debug!(%job_id, "progress subscriber disconnected");
}
