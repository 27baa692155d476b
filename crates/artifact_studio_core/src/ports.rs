//! crates/artifact_studio_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine's collaborators.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the model provider and of the persistence backend.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{ProjectSession, QuotaState};
use crate::request::GenerationRequest;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for store operations.
/// This abstracts away the specific errors from external services (e.g., database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Model Transport
//=========================================================================================

/// How the dispatcher should treat a failed model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Too many requests; worth retrying after a delay.
    RateLimited,
    /// Anything else.
    Fatal,
}

/// A failure reported by a model transport adapter.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::RateLimited,
            status: Some(429),
            message: message.into(),
        }
    }

    pub fn fatal(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Fatal,
            status,
            message: message.into(),
        }
    }

    /// Classifies a provider failure from whatever the provider gives us: an HTTP status,
    /// a status/code string such as `RESOURCE_EXHAUSTED` or `rate_limit_exceeded`, and
    /// the message text.
    pub fn classify(status: Option<u16>, code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let code_says_rate_limit = code.is_some_and(|c| {
            c.eq_ignore_ascii_case("RESOURCE_EXHAUSTED")
                || c.eq_ignore_ascii_case("rate_limit_exceeded")
                || c == "429"
        });
        let rate_limited = status == Some(429) || code_says_rate_limit || message.contains("429");
        Self {
            kind: if rate_limited {
                TransportErrorKind::RateLimited
            } else {
                TransportErrorKind::Fatal
            },
            status,
            message,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == TransportErrorKind::RateLimited
    }
}

/// An ordered sequence of text fragments from the model, ended by natural completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Sends the request and waits for the complete response text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError>;

    /// Sends the request and returns the response as a stream of text deltas.
    async fn generate_stream(&self, request: &GenerationRequest)
        -> Result<TextStream, TransportError>;
}

//=========================================================================================
// Persistence Ports
//=========================================================================================

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, session_id: Uuid) -> PortResult<ProjectSession>;

    /// Inserts or replaces the whole record.
    async fn save_session(&self, session: &ProjectSession) -> PortResult<()>;

    /// Returns the owner's most recently modified sessions, newest first.
    async fn list_sessions(&self, owner_id: Uuid, limit: usize) -> PortResult<Vec<ProjectSession>>;
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Unknown users yield a fresh free-tier record rather than `NotFound`.
    async fn load_quota(&self, user_id: Uuid) -> PortResult<QuotaState>;

    async fn save_quota(&self, user_id: Uuid, quota: &QuotaState) -> PortResult<()>;
}
