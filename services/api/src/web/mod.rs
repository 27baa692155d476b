pub mod generation_task;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the main handlers to make them easily accessible
// to the binary that builds the web server router.
pub use middleware::require_user;
pub use rest::{create_session_handler, export_session_handler, list_sessions_handler, quota_handler};
pub use ws_handler::ws_handler;
