use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use griddle::{Database, DatabaseConfig};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::{call_procedure, health, run_query, AppState};

pub fn router(state: Arc<AppState>) -> Router {
    let max_body_mb: usize = std::env::var("GRIDDLE_MAX_BODY_MB")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    Router::new()
        .route("/health", get(health))
        .route("/db/query", post(run_query))
        .route("/db/procedures/:name", post(call_procedure))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_mb * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive().max_age(std::time::Duration::from_secs(86400)))
}

pub async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let startup_start = std::time::Instant::now();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DatabaseConfig::from_env();
    let data_dir = config
        .data_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "(in memory)".to_string());
    tracing::info!(
        data_dir = %data_dir,
        index_await_timeout_secs = config.index_await_timeout.as_secs(),
        populate_in_background = config.populate_in_background,
        "Database configuration loaded"
    );

    let db = tokio::task::spawn_blocking(move || Database::open(config)).await??;
    let state = AppState::new(Arc::clone(&db));
    let app = router(state);

    let bind_addr =
        std::env::var("GRIDDLE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:7700".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let local_addr = listener.local_addr()?.to_string();

    print_startup_banner(&local_addr, startup_start.elapsed().as_millis(), &data_dir);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("[shutdown] HTTP server stopped, closing database");
    tokio::task::spawn_blocking(move || db.shutdown()).await??;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[shutdown] Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("[shutdown] Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("[shutdown] Signal received");
}

fn print_startup_banner(bind_addr: &str, startup_ms: u128, data_dir: &str) {
    use colored::Colorize;

    let url = format!("http://{}", bind_addr);
    let version = format!("v{}", env!("CARGO_PKG_VERSION"));
    let timing = format!("ready in {}ms", startup_ms);

    println!();
    println!(
        "  {} {}  {}",
        "Griddle".bold().bright_green(),
        version.as_str().dimmed(),
        timing.as_str().dimmed(),
    );
    println!();
    println!("  {}  Local:      {}", "➜".green(), url.as_str().cyan());
    let query = format!("{}/db/query", url);
    println!("  {}  Query:      {}", "➜".green(), query.as_str().cyan());
    println!("  {}  Data:       {}", "➜".green(), data_dir.dimmed());
    println!();
}
