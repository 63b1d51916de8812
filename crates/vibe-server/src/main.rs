use std::sync::Arc;

use tracing::info;

use vibe_server::build_app;
use vibe_server::config::Config;
use vibe_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vibe=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let store = Arc::new(Store::open(&config.data_dir).await?);
    let app = build_app(&config, store)?;

    let addr = config.addr()?;
    info!("Vibe server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
