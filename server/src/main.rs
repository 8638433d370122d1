use anyhow::Result;
use std::path::PathBuf;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use server::{config, run_gateway};

const CONFIG_PATH: &str = "/etc/nixmirror/config.toml";

/// nixmirror-server - resigning gateway for a Nix binary cache.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the 'config.toml'.
    #[arg(short, long, default_value_t = CONFIG_PATH.to_string())]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    dump_version();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config::load(&PathBuf::from(args.config)).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(handle_signals(shutdown.clone()));

    run_gateway(config, shutdown).await?;

    Ok(())
}

async fn handle_signals(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            tracing::error!(error = %err, "Could not install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    tracing::info!("Caught signal - shutting down");
    shutdown.cancel();
}

fn dump_version() {
    #[cfg(debug_assertions)]
    eprintln!("nixmirror-server {} (debug)", env!("CARGO_PKG_VERSION"));
    #[cfg(not(debug_assertions))]
    eprintln!("nixmirror-server {} (release)", env!("CARGO_PKG_VERSION"));
}
