use std::sync::Arc;

use tracing::info;

use parlor::{ChatEngine, Config, Database};

#[tokio::main]
async fn main() -> parlor::Result<()> {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = parlor::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        parlor::logging::init_console_only(&config.logging.level);
    }

    info!("parlor - multi-room chat engine");

    let db = Database::open(&config.database.path).await?;
    let engine = Arc::new(ChatEngine::new(db, &config.chat).await?);
    engine.ensure_room(&config.chat.default_room).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, parlor::server::router(engine))
        .await
        .map_err(parlor::ParlorError::Io)?;

    Ok(())
}
