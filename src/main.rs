mod config;
mod io;
mod logging;
mod lsp;

#[cfg(test)]
mod test_utils;

use clap::Parser;
use config::ServerConfig;
use io::StreamTransport;
use logging::{LogConfig, init_logging};
use lsp::{LspServer, default_registry};
use std::path::PathBuf;
use tracing::{error, info};

/// CLI arguments for the language server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides LSP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Write logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Log every message body sent or received
    #[arg(long)]
    trace_messages: bool,

    /// Largest accepted message body in bytes (overrides LSP_MAX_MESSAGE_SIZE)
    #[arg(long, value_name = "BYTES")]
    max_message_size: Option<usize>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config =
        LogConfig::from_env().with_overrides(args.log_level, args.log_file, args.log_json);

    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config =
        ServerConfig::from_env().with_overrides(args.trace_messages, args.max_message_size);
    info!(
        "Starting {} {} on stdio",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let server = LspServer::new(StreamTransport::stdio(), default_registry(), config);
    let termination = server.termination();
    let session = tokio::spawn(server.run());

    let reason = termination.wait().await;
    if let Err(e) = session.await {
        error!("Session task failed: {}", e);
    }

    info!("Exiting with status {}: {}", reason.exit_code(), reason);
    std::process::exit(reason.exit_code());
}
