//! Command-line interface definitions for kibble_canon.
//!
//! Global options (config file, brand map, REST connection) may appear
//! before or after the subcommand. Connection options can also be provided
//! through environment variables.

use crate::sources::Source;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Brand canonicalization and deduplication jobs for the pet-food catalog.
///
/// # Examples
///
/// ```sh
/// # Add canonical columns to a Zooplus export
/// kibble_canon canonicalize -i zooplus.csv -o zooplus_canon.csv --source zooplus
///
/// # See which catalog rows would be repaired, without writing anything
/// CATALOG_REST_URL=https://abc.supabase.co CATALOG_API_KEY=... kibble_canon sync-brands
///
/// # Repair them, keeping a rollback file
/// kibble_canon sync-brands --apply --upload-bucket exports
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Optional path to a YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// YAML brand map merged over the built-in one
    #[arg(long, global = true)]
    pub brand_map: Option<PathBuf>,

    /// Base URL of the catalog database REST API
    #[arg(long, env = "CATALOG_REST_URL", global = true)]
    pub rest_url: Option<String>,

    /// API key for the catalog database
    #[arg(long, env = "CATALOG_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Catalog table to read and patch
    #[arg(long, env = "CATALOG_TABLE", global = true)]
    pub table: Option<String>,

    /// Enable fuzzy brand matching with this Jaro-Winkler threshold (0, 1]
    #[arg(long, global = true)]
    pub fuzzy_threshold: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add brand, brand_slug, name_slug, form and product_key columns to a CSV
    Canonicalize {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Source::Manual)]
        source: Source,
    },

    /// Collapse rows sharing a product key, keeping the most complete one
    Dedupe {
        #[arg(short, long)]
        input: PathBuf,
        /// CSV of keeper rows
        #[arg(short, long)]
        output: PathBuf,
        /// JSON dedupe report
        #[arg(short, long)]
        report: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Source::Manual)]
        source: Source,
    },

    /// Report brand splits found in a CSV
    SplitBrands {
        #[arg(short, long)]
        input: PathBuf,
        /// JSON list of fixes
        #[arg(short, long)]
        report: PathBuf,
        /// Optional corrected CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = Source::Manual)]
        source: Source,
    },

    /// Repair split brands and product keys in the remote catalog
    SyncBrands {
        /// Send patches; without this only the plan is written
        #[arg(long)]
        apply: bool,
        /// Also upload the rollback file to this storage bucket
        #[arg(long)]
        upload_bucket: Option<String>,
    },

    /// Restore the previous values recorded in a rollback file
    ///
    /// Only columns that held a value before the sync are restored. A column
    /// that was empty before the sync keeps the value the sync wrote.
    Rollback {
        file: PathBuf,
        /// Send patches; without this the restore is only logged
        #[arg(long)]
        apply: bool,
    },

    /// Brand map maintenance
    Brands {
        #[command(subcommand)]
        action: BrandsCommand,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrandsCommand {
    /// Load the brand map and print its size
    Check,
}
