use anyhow::Context;
use args::Args;
use clap::Parser;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log);

    let mut config = config::Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    if let Some(listen) = args.listen {
        config.server.listen_address = Some(listen);
    }

    let router = gateway::router(&config)?;

    let address = config.server.listen_address_or_default();
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    log::info!(
        "Switchboard listening on {address} with {} provider(s)",
        config.providers.len()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for the shutdown signal: {error}");
        return;
    }

    log::info!("Shutting down");
}
