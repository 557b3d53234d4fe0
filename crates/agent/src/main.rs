// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use logship::config::Config;

/// Ships tailed log files to a Forward-protocol endpoint.
#[derive(Parser)]
#[command(name = "logship", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: cannot load config: {e:#}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();
    info!(path = %cli.config.display(), "loaded config file");

    let mut hub = match logship::run(config).await {
        Ok(hub) => hub,
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        name = shutdown_signal() => info!("received {name}, shutting down"),
        _ = hub.inputs_done() => info!("all input tasks finished, shutting down"),
    }

    // A second signal after a 3-second floor aborts the process.
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let name = shutdown_signal().await;
        warn!("received {name} before shutdown completed, aborting");
        std::process::exit(1);
    });

    hub.shutdown().await;
    std::process::exit(0);
}

/// Wait for any of the trapped shutdown signals.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    async fn recv(stream: &mut Option<Signal>) {
        match stream {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let mut hup = signal(SignalKind::hangup()).ok();
    let mut int = signal(SignalKind::interrupt()).ok();
    let mut term = signal(SignalKind::terminate()).ok();
    let mut quit = signal(SignalKind::quit()).ok();

    tokio::select! {
        _ = recv(&mut hup) => "SIGHUP",
        _ = recv(&mut int) => "SIGINT",
        _ = recv(&mut term) => "SIGTERM",
        _ = recv(&mut quit) => "SIGQUIT",
    }
}
