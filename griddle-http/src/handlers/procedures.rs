use axum::{
    extract::{Path, State},
    Json,
};
use griddle::{GriddleError, QueryResult};
use std::sync::Arc;

use super::{blocking, AppState};

/// `POST /db/procedures/:name`, e.g. `/db/procedures/db.clearIndexCaches`.
pub async fn call_procedure(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<QueryResult>, GriddleError> {
    let db = Arc::clone(&state.db);
    let result = blocking(move || db.call_procedure(&name)).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use griddle::{Database, DatabaseConfig};
    use tower::ServiceExt;

    async fn call(db: Arc<Database>, name: &str) -> (StatusCode, serde_json::Value) {
        let app = Router::new()
            .route("/db/procedures/:name", post(call_procedure))
            .with_state(AppState::new(db));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/db/procedures/{}", name))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn clear_on_fresh_database_removes_zero() {
        let (status, json) = call(Database::in_memory(), "db.clearIndexCaches").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["columns"], serde_json::json!(["removed"]));
        assert_eq!(json["rows"][0]["removed"], 0);
    }

    #[tokio::test]
    async fn stats_after_seek() {
        let db = Database::open(DatabaseConfig {
            populate_in_background: false,
            ..DatabaseConfig::default()
        })
        .unwrap();
        db.execute("CREATE INDEX ON :Person(firstname)").unwrap();
        db.execute(
            "MATCH (p:Person) USING INDEX p:Person(firstname) WHERE p.firstname = 'A' RETURN p",
        )
        .unwrap();

        let (status, json) = call(db, "db.readerCacheStats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["rows"][0]["cached"], 1);
        assert_eq!(json["rows"][0]["builds"], 1);
    }

    #[tokio::test]
    async fn unknown_procedure_is_404() {
        let (status, json) = call(Database::in_memory(), "db.nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "procedure_not_found");
        assert!(json["suggestion"]
            .as_str()
            .unwrap()
            .contains("db.clearIndexCaches"));
    }

    #[tokio::test]
    async fn shut_down_database_is_503() {
        let db = Database::in_memory();
        db.shutdown().unwrap();
        let (status, json) = call(db, "db.indexes").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"], "database_shutdown");
    }
}
