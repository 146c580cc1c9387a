mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, LogFormat};
use terrarium_config::load_config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(cli.log_format, &config.log_level);

    match cli.command {
        Command::Serve {
            root,
            bind,
            port,
            tofu_binary,
        } => {
            let mut config = config;
            if let Some(root) = root {
                config.root = root;
            }
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(bin) = tofu_binary {
                config.tofu_binary = bin;
            }
            if let Some(token) = cli.token {
                config.api.auth_token = Some(token);
            }
            commands::serve(config).await
        }
        Command::List => {
            let client = commands::Client::new(cli.remote, cli.token, &config);
            commands::list(&client).await
        }
        Command::History { tr_id, request_id } => {
            let client = commands::Client::new(cli.remote, cli.token, &config);
            commands::history(&client, &tr_id, &request_id).await
        }
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(format: LogFormat, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}
