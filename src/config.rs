use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Where `graph.json` and `schema.json` live. `None` keeps everything in
    /// memory and skips snapshots.
    pub data_dir: Option<PathBuf>,
    pub index_await_timeout: Duration,
    /// Run index population on a worker thread. When false, `create_index`
    /// returns only after the index is online.
    pub populate_in_background: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            data_dir: None,
            index_await_timeout: Duration::from_secs(30),
            populate_in_background: true,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        DatabaseConfig {
            data_dir: env::var("GRIDDLE_DATA_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            index_await_timeout: Duration::from_secs(
                env::var("GRIDDLE_INDEX_AWAIT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            populate_in_background: env::var("GRIDDLE_POPULATE_IN_BACKGROUND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        }
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn graph_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("graph.json"))
    }

    pub fn schema_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("schema.json"))
    }
}
