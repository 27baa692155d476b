//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It owns the connection's workspace and delegates generations to background tasks.

use crate::web::{
    generation_task::generation_process,
    protocol::{send_message, AttachmentPayload, ClientMessage, ServerMessage},
    state::{AppState, SessionState, WsSender},
};
use artifact_studio_core::domain::{ChatMode, Tier};
use artifact_studio_core::engine::GenerateInput;
use artifact_studio_core::request::AttachmentSource;
use artifact_studio_core::workspace::{Workspace, WorkspaceError};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Initialization Phase ---
    let mut session = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => match serde_json::from_str::<ClientMessage>(&init_json) {
            Ok(ClientMessage::Init { session_id }) => {
                info!("Initializing session with ID: {}", session_id);
                match SessionState::resume(&app_state, user_id, session_id).await {
                    Ok(session) => session,
                    Err(e) => {
                        error!("Failed to load session {}: {:?}", session_id, e);
                        let err_msg = ServerMessage::Error {
                            message: "Failed to load session data.".to_string(),
                        };
                        send_message(&ws_sender, &err_msg).await;
                        return;
                    }
                }
            }
            _ => {
                error!("First message was not a valid Init message.");
                return;
            }
        },
        _ => {
            error!("Client disconnected before sending Init message.");
            return;
        }
    };

    let kickoff = {
        let workspace = session.workspace.lock().await;
        if !send_message(&ws_sender, &ServerMessage::session_initialized(&workspace)).await {
            error!("Failed to send session initialized message.");
            return;
        }
        workspace.needs_kickoff().then(|| workspace.kickoff_prompt())
    };

    // A fresh creator project starts generating straight away.
    if let Some(prompt) = kickoff {
        info!("Starting the first generation for session.");
        start_generation(
            &app_state,
            &mut session,
            &ws_sender,
            GenerateInput::new(prompt, ChatMode::Creator),
        );
    }

    // --- 2. Main Message Loop ---
    loop {
        if let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_message(text.to_string(), &app_state, &mut session, &ws_sender).await;
                }
                Message::Close(_) => {
                    info!("Client sent close message.");
                    break;
                }
                _ => {}
            }
        } else {
            info!("Client disconnected.");
            break;
        }
    }

    // --- 3. Cleanup ---
    // Cancelling lets a running generation settle and persist what it has.
    session.cancellation_token.cancel();
    info!("WebSocket connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: String,
    app_state: &Arc<AppState>,
    session: &mut SessionState,
    ws_sender: &WsSender,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
        Ok(client_msg) => client_msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return;
        }
    };

    match client_msg {
        ClientMessage::Send { text, attachments } => {
            if text.trim().is_empty() && attachments.is_empty() {
                return;
            }
            request_generation(app_state, session, ws_sender, text, attachments).await;
        }
        ClientMessage::QuickAction { action } => {
            info!("Quick action {:?} requested.", action);
            request_generation(app_state, session, ws_sender, action.prompt().to_string(), Vec::new())
                .await;
        }
        ClientMessage::Stop => {
            info!("Stop message received. Cancelling the generation.");
            session.cancellation_token.cancel();
        }
        ClientMessage::Undo => step_history(app_state, session, ws_sender, HistoryStep::Back).await,
        ClientMessage::Redo => step_history(app_state, session, ws_sender, HistoryStep::Forward).await,
        ClientMessage::SwitchMode { mode } => {
            if session.is_generating() {
                send_message(ws_sender, &ServerMessage::busy()).await;
                return;
            }
            let mut workspace = session.workspace.lock().await;
            match workspace.switch_mode(mode) {
                Ok(()) => {
                    send_message(ws_sender, &ServerMessage::ModeChanged { mode }).await;
                }
                Err(e) => reply_workspace_error(ws_sender, e).await,
            }
        }
        ClientMessage::EditCode { code } => {
            if session.is_generating() {
                send_message(ws_sender, &ServerMessage::busy()).await;
                return;
            }
            let tier = match app_state.engine.quota_for(session.user_id).await {
                Ok(quota) => quota.tier,
                Err(e) => {
                    error!("Failed to load tier for user {}: {:?}", session.user_id, e);
                    Tier::Free
                }
            };
            let mut workspace = session.workspace.lock().await;
            match workspace.edit_artifact(code, tier) {
                Ok(()) => {
                    persist(app_state, &workspace).await;
                    let code = workspace.artifact().to_string();
                    send_message(ws_sender, &ServerMessage::ArtifactUpdated { code }).await;
                }
                Err(e) => reply_workspace_error(ws_sender, e).await,
            }
        }
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
        }
    }
}

enum HistoryStep {
    Back,
    Forward,
}

async fn step_history(
    app_state: &Arc<AppState>,
    session: &SessionState,
    ws_sender: &WsSender,
    step: HistoryStep,
) {
    if session.is_generating() {
        send_message(ws_sender, &ServerMessage::busy()).await;
        return;
    }
    let mut workspace = session.workspace.lock().await;
    let moved = match step {
        HistoryStep::Back => workspace.undo().map(|code| code.is_some()),
        HistoryStep::Forward => workspace.redo().map(|code| code.is_some()),
    };
    match moved {
        Ok(true) => {
            persist(app_state, &workspace).await;
            send_message(ws_sender, &ServerMessage::version_changed(&workspace)).await;
        }
        Ok(false) => {}
        Err(e) => reply_workspace_error(ws_sender, e).await,
    }
}

/// Starts a generation in the active mode unless one is already running.
async fn request_generation(
    app_state: &Arc<AppState>,
    session: &mut SessionState,
    ws_sender: &WsSender,
    prompt: String,
    attachments: Vec<AttachmentPayload>,
) {
    if session.is_generating() {
        send_message(ws_sender, &ServerMessage::busy()).await;
        return;
    }
    let mode = session.workspace.lock().await.active_mode();
    let attachments: Vec<AttachmentSource> = attachments.into_iter().map(Into::into).collect();
    let input = GenerateInput::new(prompt, mode).with_attachments(attachments);
    start_generation(app_state, session, ws_sender, input);
}

fn start_generation(
    app_state: &Arc<AppState>,
    session: &mut SessionState,
    ws_sender: &WsSender,
    input: GenerateInput,
) {
    let task = {
        let app_state = app_state.clone();
        let workspace = session.workspace.clone();
        let ws_sender = ws_sender.clone();
        let user_id = session.user_id;
        let token = session.next_token();
        tokio::spawn(async move {
            generation_process(app_state, workspace, ws_sender, user_id, input, token).await;
        })
    };
    session.generation_task = Some(task);
}

async fn persist(app_state: &Arc<AppState>, workspace: &Workspace) {
    if let Err(e) = app_state.sessions.save_session(&workspace.to_record()).await {
        error!("Failed to save session {}: {:?}", workspace.id(), e);
    }
}

async fn reply_workspace_error(ws_sender: &WsSender, err: WorkspaceError) {
    let message = match err {
        WorkspaceError::Busy => ServerMessage::busy(),
        WorkspaceError::EditNotAllowed => ServerMessage::Error {
            message: err.to_string(),
        },
    };
    send_message(ws_sender, &message).await;
}
