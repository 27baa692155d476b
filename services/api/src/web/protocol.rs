//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for the code-generation workspace.

use artifact_studio_core::domain::{ChatMode, ConversationMessage, Role};
use artifact_studio_core::engine::{GenerationEvent, GenerationOutcome};
use artifact_studio_core::extractor::strip_code_regions;
use artifact_studio_core::request::AttachmentSource;
use artifact_studio_core::workspace::{QuickAction, Workspace};
use axum::extract::ws::Message;
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::web::state::WsSender;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// A file attached to a request, base64-encoded by the browser.
#[derive(Deserialize, Debug, Clone)]
pub struct AttachmentPayload {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

impl From<AttachmentPayload> for AttachmentSource {
    fn from(payload: AttachmentPayload) -> Self {
        AttachmentSource::Base64 {
            name: payload.name,
            mime_type: payload.mime_type,
            data: payload.data,
        }
    }
}

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a session. This must be the first message sent on the connection.
    Init { session_id: Uuid },

    /// A new instruction for the active mode's thread.
    Send {
        text: String,
        #[serde(default)]
        attachments: Vec<AttachmentPayload>,
    },

    /// One of the canned one-click requests.
    QuickAction { action: QuickAction },

    /// Cancels the generation in flight, keeping whatever was applied so far.
    Stop,

    Undo,

    Redo,

    SwitchMode { mode: ChatMode },

    /// A manual edit of the artifact (premium and admin users only).
    EditCode { code: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the session was opened and carries its full state.
    SessionInitialized {
        session_id: Uuid,
        name: String,
        mode: ChatMode,
        code: String,
        creator_messages: Vec<ConversationMessage>,
        question_messages: Vec<ConversationMessage>,
        can_undo: bool,
        can_redo: bool,
    },

    /// The model is working; the UI should disable input for this thread.
    GenerationStarted { mode: ChatMode },

    /// A message was added to a thread, or a streaming reply grew.
    MessageUpdated {
        mode: ChatMode,
        message: ConversationMessage,
    },

    /// The artifact preview should re-render.
    ArtifactUpdated { code: String },

    /// The generation settled (completed, cancelled or failed).
    GenerationEnded {
        mode: ChatMode,
        outcome: GenerationOutcome,
    },

    /// The artifact moved through its version history.
    VersionChanged {
        code: String,
        can_undo: bool,
        can_redo: bool,
    },

    ModeChanged { mode: ChatMode },

    /// The daily request limit is used up; the UI should offer an upgrade.
    QuotaExceeded { limit: u32, message: String },

    /// The request was refused because a generation is in flight.
    Busy { message: String },

    /// Reports an error to the client, which should display it.
    Error { message: String },
}

impl ServerMessage {
    pub fn session_initialized(workspace: &Workspace) -> Self {
        ServerMessage::SessionInitialized {
            session_id: workspace.id(),
            name: workspace.name().to_string(),
            mode: workspace.active_mode(),
            code: workspace.artifact().to_string(),
            creator_messages: display_thread(workspace, ChatMode::Creator),
            question_messages: display_thread(workspace, ChatMode::Question),
            can_undo: workspace.history().can_undo(),
            can_redo: workspace.history().can_redo(),
        }
    }

    pub fn version_changed(workspace: &Workspace) -> Self {
        ServerMessage::VersionChanged {
            code: workspace.artifact().to_string(),
            can_undo: workspace.history().can_undo(),
            can_redo: workspace.history().can_redo(),
        }
    }

    pub fn busy() -> Self {
        ServerMessage::Busy {
            message: "Please wait for the current response to finish.".to_string(),
        }
    }
}

impl From<GenerationEvent> for ServerMessage {
    fn from(event: GenerationEvent) -> Self {
        match event {
            GenerationEvent::UserMessage { mode, message }
            | GenerationEvent::MessageUpdated { mode, message } => {
                ServerMessage::MessageUpdated {
                    mode,
                    message: for_display(message),
                }
            }
            GenerationEvent::Started { mode } => ServerMessage::GenerationStarted { mode },
            GenerationEvent::ArtifactUpdated { code } => ServerMessage::ArtifactUpdated { code },
            GenerationEvent::Settled { mode, outcome } => {
                ServerMessage::GenerationEnded { mode, outcome }
            }
        }
    }
}

/// Model replies are shown without their fenced code; the code lives in the artifact pane.
fn for_display(mut message: ConversationMessage) -> ConversationMessage {
    if message.role == Role::Model {
        message.text = strip_code_regions(&message.text);
    }
    message
}

fn display_thread(workspace: &Workspace, mode: ChatMode) -> Vec<ConversationMessage> {
    workspace
        .threads()
        .thread(mode)
        .messages()
        .iter()
        .cloned()
        .map(for_display)
        .collect()
}

/// Serializes and sends one message. Returns false if the socket is gone.
pub async fn send_message(ws_sender: &WsSender, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return false;
        }
    };
    ws_sender.lock().await.send(Message::Text(json.into())).await.is_ok()
}
