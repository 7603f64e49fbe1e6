//! regionstore CLI
//!
//! Inspect and edit a single region file.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use regionstore::{
    block_index, BlockStore, CompressionScheme, RegionError, RegionFile, StoreConfig,
};
use tracing_subscriber::{fmt, EnvFilter};

/// regionstore CLI
#[derive(Parser, Debug)]
#[command(name = "regionstore-cli")]
#[command(about = "Inspect and edit region files")]
#[command(version)]
struct Args {
    /// Region file to operate on (created if missing)
    #[arg(short, long)]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show sector usage
    Info,

    /// List stored blocks
    List,

    /// Decompress a block to stdout or a file
    Read {
        x: i32,
        z: i32,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Store a block from stdin or a file
    Write {
        x: i32,
        z: i32,

        /// Read from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Use gzip (version 1) instead of zlib
        #[arg(long)]
        gzip: bool,
    },

    /// Remove a block
    Delete { x: i32, z: i32 },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,regionstore=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> regionstore::Result<()> {
    let scheme = match &args.command {
        Commands::Write { gzip: true, .. } => CompressionScheme::Gzip,
        _ => CompressionScheme::Zlib,
    };
    let config = StoreConfig::builder().compression(scheme).build();
    let region = RegionFile::open(&args.file, &config)?;

    match args.command {
        Commands::Info => {
            let stats = region.stats()?;
            println!("file:          {}", region.path().display());
            println!("sectors:       {}", stats.total_sectors);
            println!("used sectors:  {}", stats.used_sectors);
            println!("free sectors:  {}", stats.free_sectors);
            println!("blocks:        {}", stats.blocks);
            println!("block sectors: {}", stats.block_sectors);
        }
        Commands::List => {
            println!(
                "{:>5} {:>3} {:>3} {:>8} {:>5} {:>11} {:>10}",
                "index", "x", "z", "sector", "count", "timestamp", "crc32"
            );
            for info in region.blocks()? {
                let crc = match region.read(info.index).and_then(|r| r.read_to_vec()) {
                    Ok(data) => format!("{:08x}", crc32fast::hash(&data)),
                    Err(RegionError::Corrupt(reason)) => {
                        tracing::warn!(index = info.index, %reason, "corrupt block");
                        "corrupt".to_string()
                    }
                    Err(e) => return Err(e),
                };
                println!(
                    "{:>5} {:>3} {:>3} {:>8} {:>5} {:>11} {:>10}",
                    info.index,
                    info.index % 32,
                    info.index / 32,
                    info.run.start(),
                    info.run.count(),
                    info.timestamp,
                    crc
                );
            }
        }
        Commands::Read { x, z, out } => {
            let data = region.read(block_index(x, z)?)?.read_to_vec()?;
            match out {
                Some(path) => fs::write(path, &data)?,
                None => io::stdout().write_all(&data)?,
            }
        }
        Commands::Write { x, z, input, .. } => {
            let data = match input {
                Some(path) => fs::read(path)?,
                None => {
                    let mut buf = Vec::new();
                    io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            let mut writer = region.write(block_index(x, z)?)?;
            writer.write_all(&data)?;
            writer.finish()?;
            tracing::info!(x, z, bytes = data.len(), "block written");
        }
        Commands::Delete { x, z } => {
            region.delete(block_index(x, z)?)?;
            tracing::info!(x, z, "block deleted");
        }
    }

    region.attempt_close()?;
    Ok(())
}
