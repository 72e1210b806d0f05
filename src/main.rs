use clap::Parser;
use tracing_subscriber::EnvFilter;
use zipstream::{router, Config};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("zipstream=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        tracing::error!("invalid configuration: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(config).await {
        tracing::error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> std::io::Result<()> {
    let address = config.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        address = %address,
        source = %config.source_dir.display(),
        "listening; GET /downloadzip for the archive"
    );

    axum::serve(listener, router(config))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
