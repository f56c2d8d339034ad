/// `actionkey cache` command implementation
///
/// Inspects and cleans the action cache configured for the current project.
use anyhow::{Context, Result};

use super::load_config;
use crate::cache::ActionCache;
use crate::cli::{CacheArgs, CacheCommands};
use crate::cli_utils::actionkey_prefix;

pub fn run(args: CacheArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let Some(cache) = config.open_cache()? else {
        eprintln!("{} Action cache is disabled", actionkey_prefix());
        return Ok(());
    };

    match args.command {
        CacheCommands::Stats => stats(cache.as_ref(), &config.cache_dir().display().to_string()),
        CacheCommands::Clean { output, all } => clean(cache.as_ref(), output.as_deref(), all),
    }
}

fn stats(cache: &dyn ActionCache, location: &str) -> Result<()> {
    let stats = cache.stats().context("Failed to read cache statistics")?;

    println!("Action cache: {location}");
    println!("  Entries: {}", stats.entries);
    println!(
        "  Size: {:.2} KB ({} bytes)",
        stats.total_bytes as f64 / 1024.0,
        stats.total_bytes
    );
    Ok(())
}

fn clean(cache: &dyn ActionCache, output: Option<&str>, all: bool) -> Result<()> {
    match (output, all) {
        (_, true) => {
            cache.clear().context("Failed to clear action cache")?;
            eprintln!("{} Removed all cache entries", actionkey_prefix());
        }
        (Some(output), false) => {
            if cache.remove(output)? {
                eprintln!("{} Removed cache entry for {output}", actionkey_prefix());
            } else {
                eprintln!("{} No cache entry for {output}", actionkey_prefix());
            }
        }
        (None, false) => anyhow::bail!("Specify an output to clean or pass --all"),
    }
    Ok(())
}
