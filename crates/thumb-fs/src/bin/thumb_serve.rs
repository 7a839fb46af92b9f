//! thumb-serve: Serve a directory of originals with on-demand thumbnails over WebDAV.
//!
//! # Usage
//!
//! ```bash
//! thumb-serve /srv/media --port 4918
//!
//! curl http://localhost:4918/88/c3/04/cat_100x50.jpg > thumb.jpg
//! ```

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thumb_fs::{webdav, ThumbFsConfig, VirtualFsResolver};

/// Serve a directory of images with lazily generated thumbnails over WebDAV.
#[derive(Parser, Debug)]
#[command(name = "thumb-serve")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the originals and the generated thumbnails
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Port to listen on (default: 4918)
    #[arg(short, long, default_value = "4918")]
    port: u16,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JPEG quality of generated thumbnails (1-100)
    #[arg(short, long)]
    quality: Option<u8>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    if !args.source.is_dir() {
        error!("Source is not a directory: {}", args.source.display());
        process::exit(1);
    }

    let mut config = match &args.config {
        Some(path) => match ThumbFsConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("{}", e);
                process::exit(1);
            }
        },
        None => ThumbFsConfig::default(),
    };
    if let Some(quality) = args.quality {
        config = config.with_quality(quality);
    }
    if let Err(e) = config.validate() {
        error!("{}", e);
        process::exit(1);
    }

    info!("Source: {}", args.source.display());
    info!("Thumbnail quality: {}", config.quality);

    let resolver = Arc::new(VirtualFsResolver::local(&args.source, config));

    if let Err(e) = webdav::serve(resolver, args.port).await {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
