use axum::{extract::State, Json};
use std::sync::Arc;

use super::AppState;

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let db = &state.db;
    let cache = db.reader_cache();

    Json(serde_json::json!({
        "status": if db.is_shut_down() { "shutting_down" } else { "ok" },
        "cached_readers": cache.len(),
        "open_readers": db.storage().open_reader_count(),
        "indexes": db.indexes().len(),
        "reader_cache": cache.stats(),
        "build_profile": if cfg!(debug_assertions) { "debug" } else { "release" },
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
