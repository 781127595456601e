use axum::{extract::State, Json};
use griddle::{GriddleError, QueryResult};
use std::sync::Arc;

use super::{blocking, AppState};
use crate::dto::QueryRequest;

/// `POST /db/query`: run one statement.
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResult>, GriddleError> {
    if req.statement.trim().is_empty() {
        return Err(GriddleError::InvalidQuery("statement is empty".to_string()));
    }
    let db = Arc::clone(&state.db);
    let started = std::time::Instant::now();
    let result = blocking(move || db.execute(&req.statement)).await?;
    tracing::debug!(
        rows = result.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "[query] Statement executed"
    );
    Ok(Json(result))
}
