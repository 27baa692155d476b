//! services/api/src/web/generation_task.rs
//!
//! This module contains the asynchronous "worker" function that runs one
//! generation for a connection and relays its progress to the client.

use crate::web::{
    protocol::{send_message, ServerMessage},
    state::{AppState, WsSender},
};
use artifact_studio_core::domain::ChatMode;
use artifact_studio_core::engine::{GenerateInput, GenerationError, GenerationEvent};
use artifact_studio_core::workspace::Workspace;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

/// Runs one generation against the connection's workspace.
///
/// The workspace lock is held for the whole generation; progress events are
/// forwarded to the socket by a companion task so the client sees them live.
pub async fn generation_process(
    app_state: Arc<AppState>,
    workspace_lock: Arc<Mutex<Workspace>>,
    ws_sender: WsSender,
    user_id: Uuid,
    input: GenerateInput,
    cancellation_token: CancellationToken,
) {
    let mode = input.mode;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let forwarder = tokio::spawn(forward_events(events_rx, ws_sender.clone()));

    let mut workspace = workspace_lock.lock().await;
    let result = app_state
        .engine
        .generate(&mut workspace, user_id, input, cancellation_token, &events_tx)
        .await;

    // Let every event reach the client before the closing messages.
    drop(events_tx);
    if let Err(e) = forwarder.await {
        error!("Event forwarder for session {} panicked: {}", workspace.id(), e);
    }

    let closing = match result {
        Ok(_) => (mode == ChatMode::Creator).then(|| ServerMessage::version_changed(&workspace)),
        Err(e @ GenerationError::QuotaExceeded { .. }) => Some(ServerMessage::QuotaExceeded {
            limit: app_state.engine.governor().daily_limit(),
            message: e.user_message(),
        }),
        Err(GenerationError::Busy(_)) => Some(ServerMessage::busy()),
        Err(e) => {
            warn!("Generation for session {} was rejected: {}", workspace.id(), e);
            Some(ServerMessage::Error {
                message: e.user_message(),
            })
        }
    };

    if let Some(message) = closing {
        if !send_message(&ws_sender, &message).await {
            warn!("Client went away before the generation result was delivered.");
        }
    }
}

async fn forward_events(mut events: mpsc::UnboundedReceiver<GenerationEvent>, ws_sender: WsSender) {
    let mut connected = true;
    while let Some(event) = events.recv().await {
        if connected && !send_message(&ws_sender, &ServerMessage::from(event)).await {
            warn!("Client disconnected during generation; events are no longer delivered.");
            connected = false;
        }
    }
}
