//! Standalone HTTP surface for the Warden LLM policy gateway.
//!
//! Everything here is wiring: parse configuration, assemble one
//! [`state::AppState`] per process, and expose it over `axum` as the two
//! OpenAI-compatible endpoints named in §6. The admission and dispatch
//! logic itself lives in `warden-gateway`.

pub mod api;
pub mod config;
pub mod error;
pub mod route_table;
pub mod state;
pub mod telemetry;
