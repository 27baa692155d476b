//! crates/artifact_studio_core/src/domain.rs
//!
//! Defines the pure, core data structures for the workspace.
//! These structs are independent of any database or transport format; serde
//! derives exist only so adapters can persist them as-is.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// The two conversation modes that share one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Every answer regenerates the complete artifact.
    Creator,
    /// Explanations and debugging help without regenerating the artifact.
    Question,
}

/// A user's privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Premium,
    Admin,
}

impl Tier {
    /// Premium and admin users bypass the daily limit and the sponsored-content policy.
    pub fn is_exempt(self) -> bool {
        matches!(self, Tier::Premium | Tier::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            "admin" => Ok(Tier::Admin),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// A single turn in one of the conversation threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_error: bool,
    /// False while a model message is still streaming, and forever if the
    /// generation that produced it was cancelled.
    #[serde(default = "default_true")]
    pub is_complete: bool,
}

fn default_true() -> bool {
    true
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            is_error: false,
            is_complete: true,
        }
    }

    /// A model message that will grow in place as deltas arrive.
    pub fn streaming_model(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Model,
            text: text.into(),
            timestamp: Utc::now(),
            is_error: false,
            is_complete: false,
        }
    }

    pub fn model_error(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Model,
            text: text.into(),
            timestamp: Utc::now(),
            is_error: true,
            is_complete: true,
        }
    }
}

/// Settings chosen when the project was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub prompt: String,
    pub language: String,
    pub model: String,
    pub chat_mode: ChatMode,
}

/// Represents a persisted workspace session, as read from and written to the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSession {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub config: ProjectConfig,
    pub code: String,
    pub creator_messages: Vec<ConversationMessage>,
    pub question_messages: Vec<ConversationMessage>,
    pub last_modified: DateTime<Utc>,
}

/// The quota-relevant slice of a user record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaState {
    pub daily_requests_count: u32,
    pub last_request_date: Option<NaiveDate>,
    pub tier: Tier,
}
