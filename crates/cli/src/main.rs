use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use drover_core::auth::StaticAuth;
use drover_core::engine::LoopbackEngine;
use drover_core::GatewayConfig;

use drover_cli::serve;

/// Drover remote-execution gateway.
#[derive(Parser)]
#[command(name = "drover", version, about = "Drover remote-execution gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket gateway
    Serve {
        /// Path to a TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Listen address (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Expose internal error detail to clients
        #[arg(long)]
        debug: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            debug,
        } => {
            let mut config = match config {
                Some(path) => match GatewayConfig::load(&path) {
                    Ok(config) => config,
                    Err(e) => {
                        eprintln!("error: {e}");
                        process::exit(1);
                    }
                },
                None => GatewayConfig::default(),
            };
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if debug {
                config.debug = true;
            }

            let engine = Arc::new(LoopbackEngine::with_default_fleet());
            let auth = Arc::new(StaticAuth::from_config(&config));
            let state = Arc::new(serve::AppState::new(config, engine, auth));

            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("failed to create tokio runtime: {e}");
                    process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(serve::start_server(state)) {
                eprintln!("server error: {e}");
                process::exit(1);
            }
        }
    }
}
