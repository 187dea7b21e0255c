// src/main.rs

//! The `spinelq` command: connects to the configured store, runs the queue connection
//! initialization, prints the server version and disconnects.

use anyhow::{Result, anyhow};
use spinelq::QueueConnection;
use spinelq::config::{ConnectionOptions, GlobalConfig, set_global_config};
use std::env;
use tracing::{error, info, warn};

const VERSION: &str = env!("SPINELQ_BUILD_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("spinelq: {e:#}");
        std::process::exit(1);
    }
}

async fn run_app() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--version") {
        println!("SpinelQ version {VERSION}");
        return Ok(());
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    let config = match args.iter().position(|arg| arg == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("--config flag requires a value"))?;
            GlobalConfig::from_file(path)?
        }
        None => GlobalConfig::default(),
    };
    set_global_config(config);

    let skip_version_check = args.iter().any(|arg| arg == "--skip-version-check");
    let connection =
        QueueConnection::new(ConnectionOptions::default().skip_version_check(skip_version_check));

    if let Err(e) = connection.client().await {
        error!("Could not initialize the queue connection: {}", e);
        // Stop reconnect attempts before reporting the failure.
        if let Err(close_err) = connection.close().await {
            warn!("Failed to close the queue connection: {}", close_err);
        }
        return Err(e.into());
    }

    match connection.redis_version() {
        Some(version) => println!("Connected. Server version {version}"),
        None => println!("Connected. Server version not checked"),
    }

    connection.close().await?;
    info!("Connection closed");
    Ok(())
}
