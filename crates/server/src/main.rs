use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod api;
mod config;
mod middleware;
mod sessions;

use config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "everything-server")]
#[command(about = "MCP everything server: resource subscriptions, logging and completions over Streamable HTTP", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "everything.toml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Serve without sessions (overrides the config file)
    #[arg(long)]
    stateless: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "EVERYTHING_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "everything=info,tower_http=debug".into());
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    tracing::info!("Starting MCP everything server");

    // Load configuration
    let mut config = ServerConfig::load(&args.config)?;
    if args.stateless {
        config.transport.stateless = true;
    }

    let addr = format!("{}:{}", args.host, args.port);
    api::serve(&addr, config).await?;

    Ok(())
}
