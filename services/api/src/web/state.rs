//! services/api/src/web/state.rs
//!
//! Defines the application's shared and connection-specific states.

use crate::config::Config;
use artifact_studio_core::engine::GenerationEngine;
use artifact_studio_core::ports::{PortError, PortResult, SessionStore};
use artifact_studio_core::workspace::Workspace;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The write half of a WebSocket, shared between the control loop and generation tasks.
pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: GenerationEngine,
    pub sessions: Arc<dyn SessionStore>,
    pub config: Arc<Config>,
}

//=========================================================================================
// SessionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active WebSocket connection.
pub struct SessionState {
    pub user_id: Uuid,
    /// Held by a generation task for as long as it runs.
    pub workspace: Arc<Mutex<Workspace>>,
    /// Lives outside the workspace lock so Stop can fire mid-generation.
    pub cancellation_token: CancellationToken,
    pub generation_task: Option<JoinHandle<()>>,
}

impl SessionState {
    /// Loads the session and checks that it belongs to `user_id`.
    pub async fn resume(app_state: &AppState, user_id: Uuid, session_id: Uuid) -> PortResult<Self> {
        let session = app_state.sessions.load_session(session_id).await?;
        if session.owner_id != user_id {
            // Other users' sessions read as missing.
            return Err(PortError::NotFound(format!("Session {} not found", session_id)));
        }

        Ok(Self {
            user_id,
            workspace: Arc::new(Mutex::new(Workspace::resume(session))),
            cancellation_token: CancellationToken::new(),
            generation_task: None,
        })
    }

    pub fn is_generating(&self) -> bool {
        self.generation_task
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Fresh token for the next generation; the previous one may already be cancelled.
    pub fn next_token(&mut self) -> CancellationToken {
        self.cancellation_token = CancellationToken::new();
        self.cancellation_token.clone()
    }
}
