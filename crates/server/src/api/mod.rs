//! HTTP surface: the two OpenAI-compatible endpoints (§6) plus an
//! unauthenticated health probe.

pub mod chat;
pub mod embeddings;
pub mod health;
mod wire;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the Axum router. Authentication happens per-request inside each
/// handler (the gateway key is one of several admission checks, not an
/// Axum-layer concern) rather than via a tower middleware, since a missing
/// key must still produce a finalized trace through the normal error path.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/embeddings", post(embeddings::embeddings))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
