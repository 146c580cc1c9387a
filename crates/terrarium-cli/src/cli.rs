use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "terrarium",
    about = "REST front end for OpenTofu with per-terrarium single-flight runs",
    version
)]
pub struct Cli {
    /// Configuration file. Defaults to ./terrarium.yaml when it exists.
    #[arg(long, short, env = "TERRARIUM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server URL for client commands. Defaults to the configured local port.
    #[arg(long, env = "TERRARIUM_URL", global = true)]
    pub remote: Option<String>,

    /// Bearer token for client commands. Defaults to `api.auth_token`.
    #[arg(long, env = "TERRARIUM_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Log output format.
    #[arg(long, env = "TERRARIUM_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load the snapshot and start the API server.
    Serve {
        /// Root directory for terrarium workspaces and the snapshot.
        #[arg(long, env = "TERRARIUM_ROOT")]
        root: Option<PathBuf>,

        /// Address to bind.
        #[arg(long, env = "TERRARIUM_BIND")]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(long, env = "TERRARIUM_PORT")]
        port: Option<u16>,

        /// Path or name of the OpenTofu binary.
        #[arg(long, env = "TERRARIUM_TOFU_BINARY")]
        tofu_binary: Option<String>,
    },

    /// List terrariums known to a running server.
    List,

    /// Show status and log of one request.
    History {
        /// Terrarium id.
        tr_id: String,
        /// Request id returned by the action call.
        request_id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
