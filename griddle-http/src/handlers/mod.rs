use griddle::Database;
use std::sync::Arc;

pub mod health;
pub mod procedures;
pub mod query;

pub struct AppState {
    pub db: Arc<Database>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(db: Arc<Database>) -> Arc<Self> {
        Arc::new(AppState {
            db,
            start_time: std::time::Instant::now(),
        })
    }
}

/// Run a blocking database call off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> griddle::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> griddle::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| griddle::GriddleError::Io(format!("spawn_blocking join error: {}", e)))?
}

pub use health::health;
pub use procedures::call_procedure;
pub use query::run_query;
