//! services/api/src/bin/api.rs

use artifact_studio_core::{
    dispatch::Dispatcher, ports::ModelTransport, quota::QuotaGovernor, request::RequestBuilder,
    GenerationEngine,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use studio_api_lib::{
    adapters::{DbAdapter, GeminiModelAdapter, OpenAiModelAdapter},
    config::{Config, ConfigError, ModelProvider},
    error::ApiError,
    web::{
        create_session_handler, export_session_handler, list_sessions_handler,
        middleware::USER_ID_HEADER, quota_handler, require_user, rest::ApiDoc, state::AppState,
        ws_handler,
    },
};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize the Model Transport ---
    let transport: Arc<dyn ModelTransport> = match config.model_provider {
        ModelProvider::Gemini => {
            let api_key = config
                .gemini_api_key
                .clone()
                .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;
            Arc::new(GeminiModelAdapter::new(api_key))
        }
        ModelProvider::OpenAi => {
            let api_key = config
                .openai_api_key
                .as_ref()
                .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
            Arc::new(OpenAiModelAdapter::from_api_key(api_key))
        }
    };
    info!(
        "Using {:?} with model {} as the model provider.",
        config.model_provider, config.model_id
    );

    // --- 4. Build the Generation Engine & Shared AppState ---
    let engine = GenerationEngine::new(
        Dispatcher::new(transport),
        RequestBuilder::new(config.assistant_name.clone()),
        QuotaGovernor::new(config.daily_request_limit),
        db_adapter.clone(),
        db_adapter.clone(),
    );
    let app_state = Arc::new(AppState {
        engine,
        sessions: db_adapter,
        config: config.clone(),
    });

    let origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string()))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static(USER_ID_HEADER)]);

    // --- 5. Create the Web Router ---
    // Every route needs the caller's identity.
    let api_router = Router::new()
        .route("/sessions", post(create_session_handler).get(list_sessions_handler))
        .route("/sessions/{id}/export", get(export_session_handler))
        .route("/quota", get(quota_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn(require_user))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
