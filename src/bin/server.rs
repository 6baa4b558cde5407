//! tsarchive Server Binary
//!
//! Opens an archive read-only and serves remote scans over TCP.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use tsarchive::network::Server;
use tsarchive::{Archive, Config};

/// tsarchive Server
#[derive(Parser, Debug)]
#[command(name = "tsarchive-server")]
#[command(about = "Serve remote scans from a time-series archive")]
#[command(version)]
struct Args {
    /// Archive file
    #[arg(short, long, default_value = "./archive.tsa")]
    archive: PathBuf,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:38402")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "256")]
    max_connections: usize,

    /// Socket read/write timeout in milliseconds (0 = none)
    #[arg(short = 't', long, default_value = "5000")]
    io_timeout_ms: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tsarchive=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("tsarchive server v{}", tsarchive::VERSION);
    tracing::info!("Archive: {}", args.archive.display());

    let config = Config::builder()
        .path(&args.archive)
        .read_only(true)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .io_timeout_ms(args.io_timeout_ms)
        .build();

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(2);
    }

    let archive = match Archive::open(config.clone()) {
        Ok(archive) => archive,
        Err(e) => {
            tracing::error!("Failed to open archive: {}", e);
            std::process::exit(1);
        }
    };

    let server = match Server::bind(config, archive) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
