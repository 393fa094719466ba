use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - what the chat front end talks to
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Conversation
            .route(
                "/chat",
                get(handlers::api::get_chat).delete(handlers::api::clear_chat),
            )
            .route("/chat/messages", post(handlers::api::send_message))
            .route("/chat/regenerate", post(handlers::api::regenerate))

            // Chart data for a settled query answer
            .route("/chat/messages/{id}/chart", get(handlers::api::get_chart))

            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
