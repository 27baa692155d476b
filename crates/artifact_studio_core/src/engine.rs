//! crates/artifact_studio_core/src/engine.rs
//!
//! Runs one generation end to end: quota, request assembly, dispatch, incremental
//! artifact extraction and persistence once the generation settles.

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::dispatch::{DeltaStream, DispatchError, Dispatcher, EMPTY_RESPONSE_FALLBACK};
use crate::domain::{ChatMode, ConversationMessage, QuotaState};
use crate::extractor::ArtifactExtractor;
use crate::ports::{PortError, QuotaStore, SessionStore};
use crate::quota::{QuotaDecision, QuotaGovernor};
use crate::request::{AttachmentError, AttachmentSource, RequestBuilder, RequestInput};
use crate::workspace::Workspace;

//=========================================================================================
// Inputs, Outcomes and Events
//=========================================================================================

/// One user action that should reach the model.
#[derive(Debug, Clone)]
pub struct GenerateInput {
    pub prompt: String,
    pub mode: ChatMode,
    pub attachments: Vec<AttachmentSource>,
}

impl GenerateInput {
    pub fn new(prompt: impl Into<String>, mode: ChatMode) -> Self {
        Self {
            prompt: prompt.into(),
            mode,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachmentSource>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// How a dispatched generation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Completed,
    /// Stopped by the user; whatever was applied so far is kept.
    Cancelled,
    /// An error-flagged message carrying `message` was appended to the thread.
    Failed { message: String },
}

/// Progress notifications published while a generation runs.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    UserMessage {
        mode: ChatMode,
        message: ConversationMessage,
    },
    Started {
        mode: ChatMode,
    },
    MessageUpdated {
        mode: ChatMode,
        message: ConversationMessage,
    },
    ArtifactUpdated {
        code: String,
    },
    Settled {
        mode: ChatMode,
        outcome: GenerationOutcome,
    },
}

pub type EventSender = mpsc::UnboundedSender<GenerationEvent>;

//=========================================================================================
// Errors
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("The {0:?} thread already has a generation in flight")]
    Busy(ChatMode),
    #[error("Daily request limit of {limit} reached")]
    QuotaExceeded { limit: u32 },
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error("Rate limit still exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("Model transport failed: {message}")]
    TransportFatal { status: Option<u16>, message: String },
    #[error("Store error: {0}")]
    Store(#[from] PortError),
}

impl From<DispatchError> for GenerationError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::RateLimited { attempts } => GenerationError::RateLimited { attempts },
            DispatchError::Fatal(e) => GenerationError::TransportFatal {
                status: e.status,
                message: e.message,
            },
        }
    }
}

impl GenerationError {
    /// Text suitable for showing to the user in the chat.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Busy(_) => "Please wait for the current response to finish.".to_string(),
            GenerationError::QuotaExceeded { limit } => format!(
                "You have reached the daily request limit ({}). Upgrade to premium for unlimited requests!",
                limit
            ),
            GenerationError::Attachment(e) => format!("Could not read the attached file: {}", e),
            GenerationError::RateLimited { .. } => {
                "Request limit reached (rate limit). Please wait a minute and try again.".to_string()
            }
            GenerationError::TransportFatal { status, .. } => format!(
                "Error communicating with the server (error code: {})",
                status.map_or_else(|| "Unknown".to_string(), |s| s.to_string())
            ),
            GenerationError::Store(_) => "Could not load your account data. Please try again.".to_string(),
        }
    }
}

//=========================================================================================
// The Engine
//=========================================================================================

#[derive(Clone)]
pub struct GenerationEngine {
    dispatcher: Dispatcher,
    builder: RequestBuilder,
    governor: QuotaGovernor,
    sessions: Arc<dyn SessionStore>,
    quotas: Arc<dyn QuotaStore>,
}

impl GenerationEngine {
    pub fn new(
        dispatcher: Dispatcher,
        builder: RequestBuilder,
        governor: QuotaGovernor,
        sessions: Arc<dyn SessionStore>,
        quotas: Arc<dyn QuotaStore>,
    ) -> Self {
        Self {
            dispatcher,
            builder,
            governor,
            sessions,
            quotas,
        }
    }

    pub fn governor(&self) -> &QuotaGovernor {
        &self.governor
    }

    pub async fn quota_for(&self, user_id: Uuid) -> Result<QuotaState, PortError> {
        self.quotas.load_quota(user_id).await
    }

    /// Runs one generation against `workspace`.
    ///
    /// `Err` is returned only for rejections that happen before anything is
    /// dispatched (busy thread, quota, unreadable attachment, store failure while
    /// reading or consuming quota); the workspace is untouched in those cases.
    /// Dispatch failures settle as [`GenerationOutcome::Failed`].
    pub async fn generate(
        &self,
        workspace: &mut Workspace,
        user_id: Uuid,
        input: GenerateInput,
        token: CancellationToken,
        events: &EventSender,
    ) -> Result<GenerationOutcome, GenerationError> {
        let mode = input.mode;
        if workspace.threads().is_busy(mode) {
            return Err(GenerationError::Busy(mode));
        }

        let quota = self.quotas.load_quota(user_id).await?;
        let consumed = match self.governor.check_and_consume(&quota, Utc::now()) {
            QuotaDecision::Granted(consumed) => consumed,
            QuotaDecision::Rejected { limit } => {
                info!("User {} hit the daily limit of {} requests.", user_id, limit);
                return Err(GenerationError::QuotaExceeded { limit });
            }
        };

        let request = self
            .builder
            .build(RequestInput {
                model: &workspace.config().model,
                prompt: &input.prompt,
                mode,
                history: workspace.threads().thread(mode).messages(),
                attachments: &input.attachments,
                current_artifact: workspace.artifact(),
                tier: quota.tier,
            })
            .await?;

        self.quotas.save_quota(user_id, &consumed).await?;

        let user_message = ConversationMessage::user(input.prompt);
        workspace.threads_mut().thread_mut(mode).push(user_message.clone());
        send(events, GenerationEvent::UserMessage {
            mode,
            message: user_message,
        });
        if mode == ChatMode::Creator {
            workspace.snapshot_artifact();
        }

        info!(
            "Generation started for session {} ({:?} mode, {} attachment(s)).",
            workspace.id(),
            mode,
            input.attachments.len()
        );
        workspace.threads_mut().thread_mut(mode).set_busy(true);
        send(events, GenerationEvent::Started { mode });

        let deltas = self.dispatcher.stream(request, token.clone());
        let outcome = consume_deltas(workspace, mode, deltas, &token, events).await;

        workspace.threads_mut().thread_mut(mode).set_busy(false);
        workspace.touch();
        info!("Generation for session {} settled: {:?}", workspace.id(), outcome);
        send(events, GenerationEvent::Settled {
            mode,
            outcome: outcome.clone(),
        });

        if let Err(e) = self.sessions.save_session(&workspace.to_record()).await {
            error!("Failed to save session {} after generation: {}", workspace.id(), e);
        }

        Ok(outcome)
    }
}

/// Applies deltas in order until the stream ends, fails or the token fires.
async fn consume_deltas(
    workspace: &mut Workspace,
    mode: ChatMode,
    mut deltas: DeltaStream,
    token: &CancellationToken,
    events: &EventSender,
) -> GenerationOutcome {
    let mut extractor = ArtifactExtractor::new();
    let mut reply_id: Option<Uuid> = None;

    while let Some(item) = deltas.next().await {
        let delta = match item {
            Ok(delta) => delta,
            Err(err) => {
                let message = GenerationError::from(err).user_message();
                workspace
                    .threads_mut()
                    .thread_mut(mode)
                    .push(ConversationMessage::model_error(message.clone()));
                return GenerationOutcome::Failed { message };
            }
        };
        if token.is_cancelled() {
            break;
        }

        let candidate = extractor.push_delta(&delta);
        let thread = workspace.threads_mut().thread_mut(mode);
        let updated = match reply_id.and_then(|id| thread.update_text(id, extractor.text())) {
            Some(reply) => reply,
            None => {
                let reply = ConversationMessage::streaming_model(extractor.text());
                reply_id = Some(thread.push(reply.clone()));
                reply
            }
        };
        send(events, GenerationEvent::MessageUpdated {
            mode,
            message: updated,
        });

        if mode == ChatMode::Creator {
            if let Some(code) = candidate {
                if code != workspace.artifact() {
                    workspace.set_artifact(code.clone());
                    send(events, GenerationEvent::ArtifactUpdated { code });
                }
            }
        }
    }

    if token.is_cancelled() {
        return GenerationOutcome::Cancelled;
    }

    let thread = workspace.threads_mut().thread_mut(mode);
    if !reply_id.is_some_and(|id| thread.mark_complete(id)) {
        let mut reply = ConversationMessage::streaming_model(EMPTY_RESPONSE_FALLBACK);
        reply.is_complete = true;
        thread.push(reply);
    }
    GenerationOutcome::Completed
}

fn send(events: &EventSender, event: GenerationEvent) {
    // A closed receiver only means nobody is watching this generation anymore.
    let _ = events.send(event);
}
