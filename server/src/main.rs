use std::{fs::OpenOptions, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use server::{config::{Args, FileConfig}, location_feed, routes, server_state::ServerState, ticker};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workout_data_management::DataManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", args.log_dir))?;
    let log_file = args.log_dir.join("server.log");

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {:?}", log_file))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=trace,workout_data_management=debug,workout_tracker_lib=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    tracing::info!("Starting server...");

    let file_config = match &args.config {
        Some(path) => FileConfig::load(path).await?,
        None => FileConfig::default(),
    };
    tracing::debug!("Calorie table: {:?}", file_config.calories);

    let data_manager = match &args.data_root {
        Some(root) => DataManager::start_at(root).await,
        None => DataManager::start().await,
    }.context("Failed to start data manager")?;

    let server_state = Arc::new(ServerState::new(data_manager, file_config.calories));

    let feed_listener = TcpListener::bind(args.feed_addr).await
        .with_context(|| format!("Failed to bind location feed on {}", args.feed_addr))?;
    tokio::spawn(location_feed::listen(feed_listener, server_state.clone()));

    tokio::spawn(ticker::run(server_state.clone(), Duration::from_millis(args.tick_ms)));

    let app = routes::router(server_state.clone());

    let listener = TcpListener::bind(args.http_addr).await
        .with_context(|| format!("Failed to bind http on {}", args.http_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Whatever is still in progress is abandoned
    server_state.abandon().await;
    tracing::info!("Server stopped");
    Ok(())
}
