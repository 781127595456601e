use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GriddleError {
    #[error("Failed to build reader for index {index}: {reason}")]
    BuildFailed { index: String, reason: String },

    #[error("Reader for index {0} is already closed")]
    ResourceClosed(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Index is not online: {0}")]
    IndexNotOnline(String),

    #[error("Timed out after {timeout_secs}s waiting for {pending} index(es) to come online")]
    IndexAwaitTimeout { pending: usize, timeout_secs: u64 },

    #[error("Node not found: {0}")]
    NodeNotFound(u64),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("Procedure not found: {0}")]
    ProcedureNotFound(String),

    #[error("Database has been shut down")]
    DatabaseShutdown,

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GriddleError>;

impl From<std::io::Error> for GriddleError {
    fn from(e: std::io::Error) -> Self {
        GriddleError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for GriddleError {
    fn from(e: serde_json::Error) -> Self {
        GriddleError::Json(e.to_string())
    }
}

impl From<nom::Err<nom::error::Error<&str>>> for GriddleError {
    fn from(e: nom::Err<nom::error::Error<&str>>) -> Self {
        match e {
            nom::Err::Incomplete(_) => GriddleError::QueryParse("unexpected end of input".into()),
            nom::Err::Error(inner) | nom::Err::Failure(inner) => GriddleError::QueryParse(format!(
                "unexpected input near '{}'",
                inner.input.chars().take(24).collect::<String>()
            )),
        }
    }
}

impl GriddleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GriddleError::BuildFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GriddleError::ResourceClosed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GriddleError::IndexNotFound(_) => StatusCode::NOT_FOUND,
            GriddleError::IndexAlreadyExists(_) => StatusCode::CONFLICT,
            GriddleError::IndexNotOnline(_) => StatusCode::SERVICE_UNAVAILABLE,
            GriddleError::IndexAwaitTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GriddleError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            GriddleError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            GriddleError::QueryParse(_) => StatusCode::BAD_REQUEST,
            GriddleError::ProcedureNotFound(_) => StatusCode::NOT_FOUND,
            GriddleError::DatabaseShutdown => StatusCode::SERVICE_UNAVAILABLE,
            GriddleError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GriddleError::Json(_) => StatusCode::BAD_REQUEST,
            GriddleError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build failures are not cached, so the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GriddleError::BuildFailed { .. }
                | GriddleError::IndexNotOnline(_)
                | GriddleError::IndexAwaitTimeout { .. }
        )
    }
}


// Axum IntoResponse implementation (feature-gated)
#[cfg(feature = "axum-support")]
use axum::response::{IntoResponse, Json, Response};
#[cfg(feature = "axum-support")]
use serde::Serialize;

#[cfg(feature = "axum-support")]
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[cfg(feature = "axum-support")]
impl IntoResponse for GriddleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error_code, suggestion) = match &self {
            GriddleError::BuildFailed { .. } => (
                "reader_build_failed",
                Some("Retry the query; failed builds are not cached".to_string()),
            ),
            GriddleError::ResourceClosed(_) => ("reader_closed", None),
            GriddleError::IndexNotFound(_) => (
                "index_not_found",
                Some("Create the index first with CREATE INDEX ON :Label(prop)".to_string()),
            ),
            GriddleError::IndexAlreadyExists(_) => ("index_already_exists", None),
            GriddleError::IndexNotOnline(_) => (
                "index_not_online",
                Some("Wait for index population to finish".to_string()),
            ),
            GriddleError::IndexAwaitTimeout { .. } => ("index_await_timeout", None),
            GriddleError::NodeNotFound(_) => ("node_not_found", None),
            GriddleError::InvalidQuery(_) => ("invalid_query", None),
            GriddleError::QueryParse(_) => ("query_parse_error", None),
            GriddleError::ProcedureNotFound(_) => (
                "procedure_not_found",
                Some(
                    "Known procedures: db.clearIndexCaches (alias db.ericsson.clearIndexCaches), db.indexes, db.readerCacheStats"
                        .to_string(),
                ),
            ),
            GriddleError::DatabaseShutdown => ("database_shutdown", None),
            GriddleError::Io(_) => ("io_error", None),
            GriddleError::Json(_) => ("json_error", None),
            GriddleError::Config(_) => ("config_error", None),
        };

        let error_response = ErrorResponse {
            error: error_code.to_string(),
            message: self.to_string(),
            request_id: format!("req_gd_{}", uuid::Uuid::new_v4()),
            suggestion,
        };

        let mut response = (status, Json(error_response)).into_response();
        if matches!(&self, GriddleError::IndexNotOnline(_)) {
            response
                .headers_mut()
                .insert("Retry-After", http::HeaderValue::from_static("1"));
        }
        response
    }
}
