//! tsarchive CLI
//!
//! Command-line interface for local archive files and remote servers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use tsarchive::network::Client;
use tsarchive::{Archive, Config, EncodingKind, Key, PointIdFilter, Result, StreamId, Value};

/// tsarchive CLI
#[derive(Parser, Debug)]
#[command(name = "tsarchive-cli")]
#[command(about = "CLI for tsarchive time-series archives")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty archive file
    Create {
        path: PathBuf,

        /// Page size in bytes (power of two, 512..=65536)
        #[arg(long, default_value = "4096")]
        page_size: usize,
    },

    /// Add one measurement
    Insert {
        path: PathBuf,

        #[arg(long, default_value = "0")]
        stream: StreamId,

        #[arg(long)]
        timestamp: u64,

        #[arg(long)]
        point: u64,

        #[arg(long)]
        value: f64,

        #[arg(long, default_value = "0")]
        flags: u64,

        /// Encoding for a stream created by this insert
        #[arg(long, default_value = "timeseries")]
        encoding: EncodingKind,
    },

    /// Print entries with start <= timestamp < end
    Scan {
        path: PathBuf,

        #[arg(long, default_value = "0")]
        stream: StreamId,

        #[arg(long, default_value = "0")]
        start: u64,

        #[arg(long, default_value_t = u64::MAX)]
        end: u64,

        /// Only these point ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        points: Vec<u64>,
    },

    /// Show archive version and page usage
    Info { path: PathBuf },

    /// Scan through a running server
    RemoteScan {
        #[arg(short, long, default_value = "127.0.0.1:38402")]
        server: String,

        #[arg(long, default_value = "0")]
        stream: StreamId,

        #[arg(long, default_value = "0")]
        start: u64,

        #[arg(long, default_value_t = u64::MAX)]
        end: u64,

        #[arg(long, value_delimiter = ',')]
        points: Vec<u64>,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    if let Err(e) = run(args.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Create { path, page_size } => {
            let archive = Archive::create(Config::builder().path(&path).page_size(page_size).build())?;
            println!("created {} (page size {})", path.display(), archive.page_size());
        }
        Commands::Insert {
            path,
            stream,
            timestamp,
            point,
            value,
            flags,
            encoding,
        } => {
            let archive = Archive::open_existing(&path, false)?;
            let mut edit = archive.edit()?;
            edit.create_stream(stream, encoding, encoding)?;
            edit.add(stream, Key::new(timestamp, point), Value::from_f64(value, flags))?;
            let version = edit.commit()?;
            println!("committed version {}", version);
        }
        Commands::Scan {
            path,
            stream,
            start,
            end,
            points,
        } => {
            let archive = Archive::open_existing(&path, true)?;
            let read = archive.begin_read();
            let filter = PointIdFilter::new(points.iter().copied());
            let scan = if points.is_empty() {
                read.scan(stream, Key::new(start, 0), Key::end_before(end))
            } else {
                read.scan_filtered(stream, Key::new(start, 0), Key::end_before(end), &filter)
            };
            for entry in scan {
                let (key, value) = entry?;
                print_entry(&key, &value);
            }
        }
        Commands::Info { path } => {
            let archive = Archive::open_existing(&path, true)?;
            let stats = archive.stats();
            let read = archive.begin_read();
            println!("version:     {}", stats.version);
            println!("page size:   {}", archive.page_size());
            println!("total pages: {}", stats.total_pages);
            println!("leaf pages:  {}", stats.leaf_pages);
            println!("free pages:  {}", stats.free_pages);
            for id in read.stream_ids() {
                println!("stream {:>5}: {} entries", id, read.entry_count(id));
            }
        }
        Commands::RemoteScan {
            server,
            stream,
            start,
            end,
            points,
        } => {
            let mut client = Client::connect(&server, 5000)?;
            let entries = client.scan(stream, Key::new(start, 0), Key::end_before(end), &points)?;
            for (key, value) in entries {
                print_entry(&key, &value);
            }
            client.disconnect();
        }
    }
    Ok(())
}

fn print_entry(key: &Key, value: &Value) {
    println!(
        "{}\t{}\t{}\t0x{:x}",
        key.timestamp,
        key.point_id,
        value.as_f64(),
        value.flags
    );
}
