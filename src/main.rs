#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::too_many_lines)]

use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::Mutex;

use kbundle_mcp::config::{self, Args, Config};
use kbundle_mcp::format::Verbosity;
use kbundle_mcp::lifecycle::Lifecycle;
use kbundle_mcp::logging;
use kbundle_mcp::rpc;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.expand_config {
        return handle_expand_config();
    }

    let mcp_mode = !std::io::stdin().is_terminal();
    logging::init(args.verbose, mcp_mode);

    let config = match Config::build(&args) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to build configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("unexpected error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(bundle_dir = %config.bundle_dir.display(), "starting kbundle-mcp");

    let enable_periodic_cleanup = config.enable_periodic_cleanup;
    let lifecycle = Arc::new(Mutex::new(Lifecycle::new(config)));

    if enable_periodic_cleanup {
        Lifecycle::spawn_periodic_cleanup(&lifecycle).await;
    }

    let default_verbosity = Verbosity::from_env();

    let shutdown_lifecycle = Arc::clone(&lifecycle);
    let dispatcher = tokio::spawn(rpc::run(lifecycle, default_verbosity));

    tokio::select! {
        result = dispatcher => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
        }
        _ = wait_for_sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    shutdown_lifecycle.lock().await.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

fn handle_expand_config() -> ExitCode {
    let Some(path) = std::env::var("MCP_CONFIG_PATH").ok() else {
        eprintln!("MCP_CONFIG_PATH is not set");
        return ExitCode::from(2);
    };
    let loaded = config::load_config_from_path(&path);
    match loaded {
        Ok(doc) => {
            let expanded = config::expand_client_config(&doc);
            match serde_json::to_string_pretty(&expanded) {
                Ok(text) => {
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("failed to serialize expanded config: {e}");
                    ExitCode::from(2)
                }
            }
        }
        Err(e) => {
            eprintln!("failed to load config: {e}");
            ExitCode::from(2)
        }
    }
}
