//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use artifact_studio_core::domain::{ChatMode, ProjectConfig, ProjectSession};
use artifact_studio_core::ports::PortError;
use artifact_studio_core::quota::QuotaGovernor;
use artifact_studio_core::workspace::Workspace;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        list_sessions_handler,
        export_session_handler,
        quota_handler,
    ),
    components(
        schemas(CreateSessionRequest, CreateSessionResponse, SessionSummary, QuotaResponse)
    ),
    tags(
        (name = "Artifact Studio API", description = "API endpoints for the code-generation workspace.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The payload for starting a new project.
#[derive(Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// What the user wants to build.
    prompt: String,
    /// Target language or stack, e.g. "HTML/CSS/JS".
    language: String,
    /// Overrides the configured model.
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "creator")]
    chat_mode: Option<ChatMode>,
}

/// The response payload sent after successfully creating a session.
#[derive(Serialize, ToSchema)]
pub struct CreateSessionResponse {
    session_id: Uuid,
    name: String,
}

/// One entry of the recent-projects list.
#[derive(Serialize, ToSchema)]
pub struct SessionSummary {
    id: Uuid,
    name: String,
    language: String,
    #[schema(value_type = String, example = "creator")]
    chat_mode: ChatMode,
    has_code: bool,
    last_modified: DateTime<Utc>,
}

impl From<ProjectSession> for SessionSummary {
    fn from(session: ProjectSession) -> Self {
        Self {
            id: session.id,
            name: session.name,
            language: session.config.language,
            chat_mode: session.config.chat_mode,
            has_code: !session.code.is_empty(),
            last_modified: session.last_modified,
        }
    }
}

/// The caller's usage for today.
#[derive(Serialize, ToSchema)]
pub struct QuotaResponse {
    tier: String,
    daily_limit: u32,
    used_today: u32,
    /// Absent for tiers without a limit.
    remaining: Option<u32>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Create a new project.
///
/// The session starts empty; the first WebSocket connection kicks off generation
/// for creator-mode projects.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created successfully", body = CreateSessionResponse),
        (status = 400, description = "Bad request (e.g., empty prompt)"),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if payload.prompt.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "prompt must not be empty".to_string()));
    }

    let config = ProjectConfig {
        prompt: payload.prompt.trim().to_string(),
        language: payload.language,
        model: payload
            .model
            .unwrap_or_else(|| app_state.config.model_id.clone()),
        chat_mode: payload.chat_mode.unwrap_or(ChatMode::Creator),
    };
    let workspace = Workspace::new(user_id, config);

    match app_state.sessions.save_session(&workspace.to_record()).await {
        Ok(()) => {
            info!("Created session {} for user {}", workspace.id(), user_id);
            let response = CreateSessionResponse {
                session_id: workspace.id(),
                name: workspace.name().to_string(),
            };
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(e) => {
            error!("Failed to create session: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create session".to_string(),
            ))
        }
    }
}

/// List the caller's most recently modified projects.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Recent sessions, newest first", body = Vec<SessionSummary>),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<Vec<SessionSummary>>, (StatusCode, String)> {
    let sessions = app_state
        .sessions
        .list_sessions(user_id, app_state.config.session_list_limit)
        .await
        .map_err(|e| {
            error!("Failed to list sessions for user {}: {:?}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list sessions".to_string(),
            )
        })?;

    Ok(Json(sessions.into_iter().map(SessionSummary::from).collect()))
}

/// Download the artifact as a standalone HTML document with the branding footer.
#[utoipa::path(
    get,
    path = "/sessions/{id}/export",
    responses(
        (status = 200, description = "The exported HTML document", content_type = "text/html"),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "No such session for this user"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("id" = Uuid, Path, description = "The session to export."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn export_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let not_found = || (StatusCode::NOT_FOUND, "Session not found".to_string());

    let session = app_state
        .sessions
        .load_session(session_id)
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => not_found(),
            PortError::Unexpected(msg) => {
                error!("Failed to load session {} for export: {}", session_id, msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to load session".to_string(),
                )
            }
        })?;
    if session.owner_id != user_id {
        return Err(not_found());
    }

    let tier = app_state
        .engine
        .quota_for(user_id)
        .await
        .map_err(|e| {
            error!("Failed to load tier for user {}: {:?}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load account data".to_string(),
            )
        })?
        .tier;

    let html = Workspace::resume(session).export_html(tier, &app_state.config.assistant_name.to_uppercase());
    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html))
}

/// Report today's request usage for the caller.
#[utoipa::path(
    get,
    path = "/quota",
    responses(
        (status = 200, description = "Today's usage", body = QuotaResponse),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn quota_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<QuotaResponse>, (StatusCode, String)> {
    let quota = app_state.engine.quota_for(user_id).await.map_err(|e| {
        error!("Failed to load quota for user {}: {:?}", user_id, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to load quota".to_string(),
        )
    })?;

    let now = Utc::now();
    let governor = app_state.engine.governor();

    Ok(Json(QuotaResponse {
        tier: quota.tier.as_str().to_string(),
        daily_limit: governor.daily_limit(),
        used_today: QuotaGovernor::used_today(&quota, now.date_naive()),
        remaining: governor.remaining(&quota, now),
    }))
}
