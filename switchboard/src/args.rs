use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// A unified chat-completions gateway in front of multiple AI providers.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "switchboard.toml")]
    pub config: PathBuf,

    /// Listen address override, e.g. 127.0.0.1:8080.
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "gateway=debug,switchboard=debug".
    #[arg(long, default_value = "info")]
    pub log: String,
}
