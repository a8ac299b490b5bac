use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::pool::pool_factory;
use server::pool_manager::PoolManager;
use server::server::{bind_listener, spawn_shutdown_listener, spawn_stats_reporter, Server};
use server::streamer::Streamer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parses command-line arguments, wires the pool core together and runs the
/// accept loop until shutdown.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::parse();
    config.validate()?;

    info!(
        "Starting server with {} pools of {} connections",
        config.pool_limit, config.conn_limit
    );

    let root = CancellationToken::new();

    let streamer = Arc::new(Streamer::new(root.clone(), config.broadcast_delay())?);
    let factory = pool_factory(
        root.clone(),
        config.conn_limit,
        streamer,
        config.playground(),
    )?;
    let manager = Arc::new(PoolManager::new(factory, config.pool_limit)?);

    let server = Server::bind(
        &config.addr(),
        Arc::clone(&manager),
        root.clone(),
        config.grace(),
    )
    .await?;

    let shutdown = bind_listener(&config.shutdown_addr()).await?;
    spawn_shutdown_listener(shutdown, root.clone());
    spawn_stats_reporter(manager, config.stats_interval(), root.clone());

    {
        let root = root.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    root.cancel();
                }
                Err(e) => error!("Cannot listen for Ctrl+C: {}", e),
            }
        });
    }

    server.run().await?;

    info!("Server finished");
    Ok(())
}
