//! CoinShelf image cache maintenance CLI
//!
//! Small operator tool around the cache engine: inspect stats, warm the
//! cache from a list of URIs, or wipe it.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use coinshelf_image_cache::{CacheConfig, ImageCacheService, PreloadConfig, PreloadScheduler};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Print cache statistics
    Stats,
    /// Preload URIs listed (one per line) in a file
    Warm { uris_file: PathBuf },
    /// Delete all cached artifacts and metadata
    Clear,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"coinshelf-imgcache - CoinShelf image cache maintenance

USAGE:
    coinshelf-imgcache [--cache-dir <dir>] stats
    coinshelf-imgcache [--cache-dir <dir>] warm <uris-file>
    coinshelf-imgcache [--cache-dir <dir>] clear
    coinshelf-imgcache help

COMMANDS:
    stats   Print entry count, total size, and age spread
    warm    Preload every URI listed in <uris-file> (one per line)
    clear   Delete all cached images and metadata

OPTIONS:
    --cache-dir <dir>   Cache root (default: platform cache dir)

ENVIRONMENT:
    RUST_LOG   Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<(Command, CacheConfig)> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut config = CacheConfig::default();

    if let Some(pos) = args.iter().position(|a| a == "--cache-dir") {
        if pos + 1 >= args.len() {
            return Err(anyhow!("--cache-dir requires a value"));
        }
        config.cache_root = PathBuf::from(args.remove(pos + 1));
        args.remove(pos);
    }

    let command = match args.first().map(String::as_str) {
        Some("stats") => Command::Stats,
        Some("warm") => {
            let file = args
                .get(1)
                .ok_or_else(|| anyhow!("Usage: coinshelf-imgcache warm <uris-file>"))?;
            Command::Warm {
                uris_file: PathBuf::from(file),
            }
        }
        Some("clear") => Command::Clear,
        Some("help") | Some("--help") | Some("-h") | None => Command::Help,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            Command::Help
        }
    };

    Ok((command, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (command, config) = match parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Stats => {
            let cache = ImageCacheService::initialize(config).await?;
            let stats = cache.cache_stats();
            println!("Cache root:    {}", cache.cache_root().display());
            println!("Entries:       {}", stats.total_entries);
            println!("Total size:    {:.2} MB", stats.total_size_mb);
            println!(
                "Oldest entry:  {:.1} h",
                stats.oldest_age_ms as f64 / 3_600_000.0
            );
            println!(
                "Newest entry:  {:.1} h",
                stats.newest_age_ms as f64 / 3_600_000.0
            );
        }
        Command::Warm { uris_file } => {
            let contents = fs::read_to_string(&uris_file)
                .with_context(|| format!("Failed to read URI list: {:?}", uris_file))?;
            let uris: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from)
                .collect();

            let cache = ImageCacheService::initialize(config).await?;
            let scheduler = PreloadScheduler::new(cache, PreloadConfig::collection());
            scheduler.preload(&uris).await;

            let progress = scheduler.progress();
            println!("Preloaded {}/{} images", progress.completed, progress.total);
        }
        Command::Clear => {
            let cache = ImageCacheService::initialize(config).await?;
            cache.clear_cache()?;
            println!("Cache cleared: {}", cache.cache_root().display());
        }
        Command::Help => {
            print_help();
        }
    }

    Ok(())
}
