use std::sync::Arc;

use tether::{ServerConfig, TetherError, TetherServerBuilder};
use tether_session::{MemoryUserStore, UserStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), TetherError> {
    // A missing .env is fine; the real environment still applies.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let builder = TetherServerBuilder::from_config(&config);

    match &config.database_path {
        #[cfg(feature = "sqlite")]
        Some(path) => {
            tracing::info!(path = %path.display(), "using SQLite user store");
            let store = tether_session::SqliteUserStore::open(path)?;
            serve(builder, Arc::new(store)).await
        }
        #[cfg(not(feature = "sqlite"))]
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                "built without SQLite support; using in-memory user store"
            );
            serve(builder, Arc::new(MemoryUserStore::new())).await
        }
        None => {
            tracing::info!("using in-memory user store");
            serve(builder, Arc::new(MemoryUserStore::new())).await
        }
    }
}

async fn serve<S: UserStore>(builder: TetherServerBuilder, store: Arc<S>) -> Result<(), TetherError> {
    let server = builder.build(store).await?;
    server.run_until(shutdown_on(tokio::signal::ctrl_c())).await
}

/// Resolves when `signal` fires. If the signal handler can't be
/// installed this never resolves, and the server keeps running until the
/// process is killed.
async fn shutdown_on(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
