//! # kibble_canon
//!
//! Data-engineering jobs for a pet-food and dog-breed content catalog. Rows
//! arrive from scraped sources (Zooplus, AADF, Chewy, AKC, Wikipedia) and
//! live in a hosted Postgres database reached through its REST API.
//!
//! ## Features
//!
//! - Canonical brand names through a YAML brand map (built in, extendable)
//! - Product keys (`brand_slug|name_slug|form`) that match the same product
//!   across sources, pack sizes and spellings
//! - Detection and repair of split brands ("Royal" / "Canin Maxi Adult")
//! - Deduplication by product key
//! - Dry-run-by-default remote repair with a JSON rollback file written
//!   before any patch
//!
//! ## Usage
//!
//! ```sh
//! kibble_canon canonicalize -i zooplus.csv -o zooplus_canon.csv --source zooplus
//! kibble_canon dedupe -i all.csv -o keepers.csv -r dedupe.json
//! kibble_canon split-brands -i aadf.csv -r splits.json --source aadf
//! kibble_canon sync-brands --apply
//! kibble_canon rollback rollbacks/rollback_products_20260301T120000Z.json --apply
//! kibble_canon brands check --brand-map extra_brands.yaml
//! ```
//!
//! ## Architecture
//!
//! 1. **Normalize**: fold text, resolve brands, detect forms
//! 2. **Repair**: split brands are rejoined before anything is keyed
//! 3. **Key**: build product keys and group rows by them
//! 4. **Output**: CSV/JSON files, or patches against the REST catalog

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod brands;
mod canonical;
mod cli;
mod config;
mod dedupe;
mod forms;
mod jobs;
mod models;
mod outputs;
mod rollback;
mod sources;
mod split;
mod store;
mod utils;

use brands::BrandMap;
use canonical::CanonicalOptions;
use cli::{BrandsCommand, Cli, Command};
use config::Settings;
use jobs::SyncOptions;
use store::{RestStore, RetryStore};

/// Retry policy for every REST call.
const MAX_RETRIES: usize = 5;
const BASE_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "kibble_canon starting up");

    let args = Cli::parse();
    debug!(command = ?args.command, "Parsed CLI arguments");

    let settings = match Settings::resolve(&args.global) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let result = run(args.command, &settings).await;

    let elapsed = start_time.elapsed();
    match &result {
        Ok(()) => info!(
            elapsed_secs = elapsed.as_secs_f64(),
            "kibble_canon finished"
        ),
        Err(e) => error!(
            elapsed_secs = elapsed.as_secs_f64(),
            error = %e,
            "kibble_canon failed"
        ),
    }
    result
}

fn remote_store(settings: &Settings) -> Result<RetryStore<RestStore>, Box<dyn Error>> {
    let (url, key) = settings.remote()?;
    let store = RestStore::new(url, key, &settings.table)?;
    info!(table = %settings.table, "Connected catalog REST client");
    Ok(RetryStore::new(store, MAX_RETRIES, BASE_DELAY))
}

fn load_map(settings: &Settings) -> Result<(BrandMap, CanonicalOptions), Box<dyn Error>> {
    let map = BrandMap::load(settings.brand_map.as_deref())?;
    let opts = CanonicalOptions {
        fuzzy_threshold: settings.fuzzy_threshold,
    };
    Ok((map, opts))
}

async fn run(command: Command, settings: &Settings) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Canonicalize {
            input,
            output,
            source,
        } => {
            let (map, opts) = load_map(settings)?;
            jobs::run_canonicalize(&input, &output, source, &map, &opts)?;
        }
        Command::Dedupe {
            input,
            output,
            report,
            source,
        } => {
            let (map, opts) = load_map(settings)?;
            jobs::run_dedupe(&input, &output, &report, source, &map, &opts).await?;
        }
        Command::SplitBrands {
            input,
            report,
            output,
            source,
        } => {
            let (map, _) = load_map(settings)?;
            jobs::run_split_brands(&input, &report, output.as_deref(), source, &map).await?;
        }
        Command::SyncBrands {
            apply,
            upload_bucket,
        } => {
            let (map, opts) = load_map(settings)?;
            let store = remote_store(settings)?;
            let sync = SyncOptions {
                table: settings.table.clone(),
                page_size: settings.page_size,
                concurrency: settings.concurrency,
                rollback_dir: settings.rollback_dir.clone(),
                apply,
                upload_bucket,
            };
            let outcome = jobs::sync_brands(&store, &map, &opts, &sync).await?;
            info!(
                fetched = outcome.fetched,
                planned = outcome.planned,
                unchanged = outcome.unchanged,
                rejected = outcome.rejected,
                patched = outcome.applied.as_ref().map(|a| a.patched),
                failed = outcome.applied.as_ref().map(|a| a.failed.len()),
                "sync-brands complete"
            );
        }
        Command::Rollback { file, apply } => {
            let store = remote_store(settings)?;
            let outcome =
                jobs::rollback(&store, &file, &settings.table, apply, settings.concurrency).await?;
            info!(
                restorable = outcome.restorable,
                patched = outcome.applied.as_ref().map(|a| a.patched),
                failed = outcome.applied.as_ref().map(|a| a.failed.len()),
                "rollback complete"
            );
        }
        Command::Brands {
            action: BrandsCommand::Check,
        } => {
            let stats = jobs::brands_check(settings.brand_map.as_deref())?;
            println!(
                "{} canonical brands, {} aliases, longest alias {} words",
                stats.brands, stats.aliases, stats.max_alias_tokens
            );
        }
    }

    Ok(())
}
