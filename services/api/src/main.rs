use anyhow::Context;
use interview_api::config::Config;
use interview_api::db::InterviewDb;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load API configuration")?;

    // Initialize the tracing subscriber for logging.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let db = InterviewDb::open(&config.database_path).context("Failed to open database")?;
    let app = interview_api::router(Arc::new(db));

    info!("Starting interview API, listening on {}", config.bind_address);

    // Create a TCP listener and bind it to the address.
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    // Run the server.
    axum::serve(listener, app).await?;

    Ok(())
}
