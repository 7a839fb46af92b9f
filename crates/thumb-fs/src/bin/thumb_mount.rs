//! thumb-mount: Mount a directory of originals with on-demand thumbnails.
//!
//! # Usage
//!
//! ```bash
//! thumb-mount /mnt/thumbs /srv/media
//!
//! # Originals pass through unchanged...
//! cat /mnt/thumbs/88/c3/04/cat.jpg > /dev/null
//! # ...and thumbnails are generated on first open.
//! cat /mnt/thumbs/88/c3/04/cat_100x50.jpg > thumb.jpg
//! ```

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thumb_fs::{fuse, ThumbFsConfig, VirtualFsResolver};

/// Mount a directory of images with lazily generated thumbnails.
#[derive(Parser, Debug)]
#[command(name = "thumb-mount")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory where the overlay is mounted
    #[arg(value_name = "MOUNTPOINT")]
    mount_point: PathBuf,

    /// Directory holding the originals and the generated thumbnails
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

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

fn main() {
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

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    info!("Source: {}", args.source.display());
    info!("Mount point: {}", args.mount_point.display());
    info!("Thumbnail quality: {}", config.quality);

    let read_only = config.read_only_mount;
    let resolver = Arc::new(VirtualFsResolver::local(&args.source, config));

    if let Err(e) = fuse::mount(resolver, &args.mount_point, read_only) {
        error!("Mount failed: {}", e);
        process::exit(1);
    }
}

fn load_config(args: &Args) -> thumb_fs::Result<ThumbFsConfig> {
    let mut config = match &args.config {
        Some(path) => ThumbFsConfig::load(path)?,
        None => ThumbFsConfig::default(),
    };
    if let Some(quality) = args.quality {
        config = config.with_quality(quality);
    }
    config.validate()?;
    Ok(config)
}
