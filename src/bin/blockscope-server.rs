#![forbid(unsafe_code)]
//! Blockscope RPC server

use blockscope::config::{load_config_from, DEFAULT_CONFIG_PATH};
use blockscope::node::Node;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "blockscope-server", about = "Serve block summaries over JSON RPC")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the configured database path
    #[arg(long)]
    database: Option<String>,

    /// Override the configured API port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config_from(&args.config)?;
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    let node = Arc::new(Node::init(config)?);
    node.start().await
}
