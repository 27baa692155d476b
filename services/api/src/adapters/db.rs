//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! `SessionStore` and `QuotaStore` ports from the core crate. It handles all
//! interactions with the PostgreSQL database using `sqlx`.

use artifact_studio_core::domain::{
    ConversationMessage, ProjectConfig, ProjectSession, QuotaState, Tier,
};
use artifact_studio_core::ports::{PortError, PortResult, QuotaStore, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the persistence ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Sessions reference their owner, so the user row has to exist first.
    async fn ensure_user(&self, user_id: Uuid) -> PortResult<()> {
        sqlx::query("INSERT INTO users (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    config: Json<ProjectConfig>,
    code: String,
    creator_messages: Json<Vec<ConversationMessage>>,
    question_messages: Json<Vec<ConversationMessage>>,
    last_modified: DateTime<Utc>,
}
impl SessionRecord {
    fn to_domain(self) -> ProjectSession {
        ProjectSession {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            config: self.config.0,
            code: self.code,
            creator_messages: self.creator_messages.0,
            question_messages: self.question_messages.0,
            last_modified: self.last_modified,
        }
    }
}

#[derive(FromRow)]
struct QuotaRecord {
    tier: String,
    daily_requests_count: i32,
    last_request_date: Option<NaiveDate>,
}
impl QuotaRecord {
    fn to_domain(self) -> PortResult<QuotaState> {
        let tier = self.tier.parse::<Tier>().map_err(PortError::Unexpected)?;
        Ok(QuotaState {
            daily_requests_count: self.daily_requests_count.max(0) as u32,
            last_request_date: self.last_request_date,
            tier,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, owner_id, name, config, code, creator_messages, question_messages, last_modified";

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for DbAdapter {
    async fn load_session(&self, session_id: Uuid) -> PortResult<ProjectSession> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Session {} not found", session_id)),
            _ => PortError::Unexpected(e.to_string()),
        })?;
        Ok(record.to_domain())
    }

    async fn save_session(&self, session: &ProjectSession) -> PortResult<()> {
        self.ensure_user(session.owner_id).await?;

        sqlx::query(
            "INSERT INTO sessions (id, owner_id, name, config, code, creator_messages, question_messages, last_modified)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                config = EXCLUDED.config,
                code = EXCLUDED.code,
                creator_messages = EXCLUDED.creator_messages,
                question_messages = EXCLUDED.question_messages,
                last_modified = EXCLUDED.last_modified",
        )
        .bind(session.id)
        .bind(session.owner_id)
        .bind(&session.name)
        .bind(Json(&session.config))
        .bind(&session.code)
        .bind(Json(&session.creator_messages))
        .bind(Json(&session.question_messages))
        .bind(session.last_modified)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn list_sessions(&self, owner_id: Uuid, limit: usize) -> PortResult<Vec<ProjectSession>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE owner_id = $1 ORDER BY last_modified DESC LIMIT $2",
            SESSION_COLUMNS
        ))
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let sessions = records.into_iter().map(|r| r.to_domain()).collect();
        Ok(sessions)
    }
}

//=========================================================================================
// `QuotaStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuotaStore for DbAdapter {
    async fn load_quota(&self, user_id: Uuid) -> PortResult<QuotaState> {
        let record = sqlx::query_as::<_, QuotaRecord>(
            "SELECT tier, daily_requests_count, last_request_date FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        match record {
            Some(record) => record.to_domain(),
            None => Ok(QuotaState::default()),
        }
    }

    async fn save_quota(&self, user_id: Uuid, quota: &QuotaState) -> PortResult<()> {
        // The tier is managed elsewhere; only the usage counters are written back.
        sqlx::query(
            "INSERT INTO users (user_id, tier, daily_requests_count, last_request_date)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id) DO UPDATE SET
                daily_requests_count = EXCLUDED.daily_requests_count,
                last_request_date = EXCLUDED.last_request_date",
        )
        .bind(user_id)
        .bind(quota.tier.as_str())
        .bind(quota.daily_requests_count as i32)
        .bind(quota.last_request_date)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
