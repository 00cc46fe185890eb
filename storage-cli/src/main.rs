use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_cli::{commands, resolve_url, Backend, ConnectionConfig};
use storage_core::{GenericStorage, SizeUnit, TerminalProgress, TransferConfig, TransferEngine};

#[derive(Parser)]
#[command(name = "storage")]
#[command(about = "Move files in and out of GridFS and S3 compatible object stores", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Connection string, overrides the configured connections
    #[arg(long, global = true, env = "STORAGE_URL")]
    url: Option<String>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List buckets, or the files of a bucket
    Ls {
        bucket: Option<String>,
    },

    /// Upload a local file
    Put {
        bucket: String,

        /// Local file to upload
        source: PathBuf,

        /// Name to store the file under (defaults to the source file name)
        filename: Option<String>,
    },

    /// Download files from a bucket
    Get {
        bucket: String,

        /// File to download (all files when omitted)
        filename: Option<String>,

        /// Target file or directory
        #[arg(default_value = ".")]
        destination: PathBuf,
    },

    /// Remove a file, or the whole bucket when no file is given
    Rm {
        bucket: String,
        filename: Option<String>,
    },

    /// Bucket operations
    Bucket {
        #[command(subcommand)]
        action: BucketAction,
    },

    /// Show server statistics
    ///
    /// MongoDB reports version and storage figures. S3 endpoints report the
    /// server software, reachability and summed usage; capacity and disk
    /// health are not exposed over the S3 API.
    Stats {
        /// Fixed unit for sizes (b, kb, mb, gb, tb, pb)
        #[arg(short, long)]
        unit: Option<SizeUnit>,
    },

    /// List configured connections or select the active one
    Conn {
        index: Option<usize>,
    },
}

#[derive(Subcommand)]
enum BucketAction {
    /// List buckets
    Ls,

    /// Create a bucket
    New { name: String },

    /// Remove a bucket and everything in it
    Rm { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > verbose flag > default (warn)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = ConnectionConfig::default_location()?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if let Commands::Conn { index } = cli.command {
        return commands::conn::run(&config, index, &mut out);
    }

    let url = resolve_url(cli.url.as_deref(), &config)?;
    let storage = Backend::from_url(&url)?;
    storage.connect().await?;

    let result = run(&storage, cli.command, &mut out).await;
    out.flush()?;

    if let Err(e) = storage.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    result
}

async fn run(storage: &Backend, command: Commands, out: &mut dyn Write) -> Result<()> {
    let engine =
        TransferEngine::new(TransferConfig::default()).with_sink(Arc::new(TerminalProgress::new()));

    match command {
        Commands::Ls { bucket } => {
            commands::ls::run(storage, bucket.as_deref(), out).await?;
        }
        Commands::Put {
            bucket,
            source,
            filename,
        } => {
            commands::put::run(storage, &engine, &bucket, &source, filename.as_deref(), out).await?;
        }
        Commands::Get {
            bucket,
            filename,
            destination,
        } => {
            commands::get::run(storage, &engine, &bucket, filename.as_deref(), &destination, out)
                .await?;
        }
        Commands::Rm { bucket, filename } => {
            commands::rm::run(storage, &bucket, filename.as_deref(), out).await?;
        }
        Commands::Bucket { action } => match action {
            BucketAction::Ls => commands::bucket::list(storage, out).await?,
            BucketAction::New { name } => commands::bucket::create(storage, &name, out).await?,
            BucketAction::Rm { name } => commands::bucket::remove(storage, &name, out).await?,
        },
        Commands::Stats { unit } => {
            commands::stats::run(storage, unit, out).await?;
        }
        // Handled before connecting
        Commands::Conn { .. } => {}
    }
    Ok(())
}
