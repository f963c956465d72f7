//! Batch jobs behind the CLI subcommands.
//!
//! File jobs (`canonicalize`, `dedupe`, `split-brands`) read one source CSV
//! and write CSV/JSON outputs. Remote jobs (`sync-brands`, `rollback`) talk to
//! the catalog through a [`CatalogStore`] and are dry-run unless `apply` is
//! set. Before any remote write a rollback file is written.

use crate::brands::{BrandMap, BrandMapError};
use crate::canonical::{CanonicalOptions, CanonicalProduct, canonicalize};
use crate::dedupe::{DedupeReport, Rejected, dedupe};
use crate::models::{CatalogRow, RowPatch};
use crate::outputs::csv::{write_canonical, write_rows};
use crate::outputs::json::write_json;
use crate::rollback::{RollbackEntry, RollbackFile, read_rollback, write_rollback};
use crate::sources::{Source, read_rows};
use crate::split::{SplitFix, scan};
use crate::store::{CatalogStore, ObjectStore, StoreError, fetch_all};
use crate::utils::{ensure_writable_dir, utc_stamp};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::error::Error;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

/// Planned patches shown in the log during a dry run.
const PREVIEW_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CsvSummary {
    pub read: usize,
    pub written: usize,
    pub rejected: usize,
}

fn open_input(path: &Path) -> Result<File, Box<dyn Error>> {
    File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()).into())
}

fn create_output(path: &Path) -> Result<File, Box<dyn Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path).map_err(|e| format!("cannot create {}: {e}", path.display()).into())
}

// ---------------------------------------------------------------------------
// canonicalize
// ---------------------------------------------------------------------------

/// Canonicalize every row of a source CSV. Rows that fail are logged and
/// skipped.
pub fn canonicalize_csv<R: Read, W: Write>(
    input: R,
    output: W,
    source: Source,
    map: &BrandMap,
    opts: &CanonicalOptions,
) -> Result<CsvSummary, Box<dyn Error>> {
    let rows = read_rows(input, source)?;

    let mut products: Vec<(&CatalogRow, CanonicalProduct)> = Vec::with_capacity(rows.len());
    let mut rejected = 0usize;
    for row in &rows {
        match canonicalize(&row.brand, &row.product_name, row.form.as_deref(), map, opts) {
            Ok(product) => products.push((row, product)),
            Err(e) => {
                rejected += 1;
                warn!(id = %row.id, error = %e, "Skipping row");
            }
        }
    }

    let written = write_canonical(output, products.iter().map(|(row, p)| (*row, p)))?;
    Ok(CsvSummary {
        read: rows.len(),
        written,
        rejected,
    })
}

#[instrument(level = "info", skip_all, fields(input = %input.display(), output = %output.display(), source = %source))]
pub fn run_canonicalize(
    input: &Path,
    output: &Path,
    source: Source,
    map: &BrandMap,
    opts: &CanonicalOptions,
) -> Result<CsvSummary, Box<dyn Error>> {
    let summary = canonicalize_csv(open_input(input)?, create_output(output)?, source, map, opts)?;
    info!(
        read = summary.read,
        written = summary.written,
        rejected = summary.rejected,
        "Canonicalize complete"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// dedupe
// ---------------------------------------------------------------------------

/// Deduplicate a source CSV, writing one canonical record per product key.
pub fn dedupe_csv<R: Read, W: Write>(
    input: R,
    keepers: W,
    source: Source,
    map: &BrandMap,
    opts: &CanonicalOptions,
) -> Result<DedupeReport, Box<dyn Error>> {
    let rows = read_rows(input, source)?;
    let report = dedupe(&rows, map, opts);
    write_canonical(
        keepers,
        report
            .groups
            .iter()
            .map(|g| (&rows[g.keeper_index], &g.product)),
    )?;
    Ok(report)
}

#[instrument(level = "info", skip_all, fields(input = %input.display(), source = %source))]
pub async fn run_dedupe(
    input: &Path,
    output: &Path,
    report_path: &Path,
    source: Source,
    map: &BrandMap,
    opts: &CanonicalOptions,
) -> Result<DedupeReport, Box<dyn Error>> {
    let report = dedupe_csv(open_input(input)?, create_output(output)?, source, map, opts)?;
    write_json(&report, report_path).await?;
    info!(
        keepers = report.unique_keys,
        duplicates = report.duplicate_rows,
        rejected = report.rejected.len(),
        output = %output.display(),
        report = %report_path.display(),
        "Dedupe complete"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// split-brands
// ---------------------------------------------------------------------------

/// Rows with their split fixes applied.
pub fn apply_fixes(rows: &[CatalogRow], fixes: &[SplitFix]) -> Vec<CatalogRow> {
    rows.iter()
        .map(|row| {
            let fix = fixes.iter().find(|f| {
                f.id == row.id && f.old_brand == row.brand && f.old_name == row.product_name
            });
            match fix {
                Some(f) => CatalogRow {
                    brand: f.new_brand.clone(),
                    product_name: f.new_name.clone(),
                    ..row.clone()
                },
                None => row.clone(),
            }
        })
        .collect()
}

/// Find brand splits in a source CSV, optionally writing the corrected rows.
pub fn split_brands_csv<R: Read, W: Write>(
    input: R,
    corrected: Option<W>,
    source: Source,
    map: &BrandMap,
) -> Result<Vec<SplitFix>, Box<dyn Error>> {
    let rows = read_rows(input, source)?;
    let fixes = scan(&rows, map);
    if let Some(out) = corrected {
        write_rows(out, &apply_fixes(&rows, &fixes))?;
    }
    Ok(fixes)
}

#[instrument(level = "info", skip_all, fields(input = %input.display(), source = %source))]
pub async fn run_split_brands(
    input: &Path,
    report_path: &Path,
    output: Option<&Path>,
    source: Source,
    map: &BrandMap,
) -> Result<Vec<SplitFix>, Box<dyn Error>> {
    let reader = open_input(input)?;
    let corrected = output.map(create_output).transpose()?;
    let fixes = split_brands_csv(reader, corrected, source, map)?;
    write_json(&fixes, report_path).await?;
    info!(fixes = fixes.len(), report = %report_path.display(), "Split scan complete");
    Ok(fixes)
}

// ---------------------------------------------------------------------------
// sync-brands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncPlan {
    pub entries: Vec<RollbackEntry>,
    pub unchanged: usize,
    pub rejected: Vec<Rejected>,
}

/// Before/after values of one column, set only when the value changes.
fn diff_field(
    current: Option<&str>,
    wanted: &str,
    before: &mut Option<String>,
    after: &mut Option<String>,
) {
    if current != Some(wanted) {
        *before = current.map(str::to_string);
        *after = Some(wanted.to_string());
    }
}

/// Work out which rows need new canonical values.
///
/// `product_name` is only rewritten when a brand split was repaired.
pub fn plan_sync(rows: &[CatalogRow], map: &BrandMap, opts: &CanonicalOptions) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for row in rows {
        let product = match canonicalize(&row.brand, &row.product_name, row.form.as_deref(), map, opts)
        {
            Ok(p) => p,
            Err(e) => {
                warn!(id = %row.id, error = %e, "Row cannot be canonicalized");
                plan.rejected.push(Rejected {
                    id: row.id.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let mut before = RowPatch::default();
        let mut after = RowPatch::default();
        diff_field(Some(row.brand.as_str()), &product.brand, &mut before.brand, &mut after.brand);
        if product.split.is_some() {
            diff_field(
                Some(row.product_name.as_str()),
                &product.name,
                &mut before.product_name,
                &mut after.product_name,
            );
        }
        diff_field(
            row.brand_slug.as_deref(),
            &product.brand_slug,
            &mut before.brand_slug,
            &mut after.brand_slug,
        );
        diff_field(
            row.product_key.as_deref(),
            &product.product_key.to_string(),
            &mut before.product_key,
            &mut after.product_key,
        );

        if after.is_empty() {
            plan.unchanged += 1;
        } else {
            plan.entries.push(RollbackEntry {
                id: row.id.clone(),
                before,
                after,
            });
        }
    }

    plan
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub patched: usize,
    /// Ids whose patch failed, sorted.
    pub failed: Vec<String>,
}

/// Send the `after` patch of every entry, at most `concurrency` at a time.
///
/// A failed patch is logged and counted; it does not stop the others.
#[instrument(level = "info", skip_all, fields(entries = entries.len(), concurrency = concurrency))]
pub async fn apply_plan<S: CatalogStore>(
    store: &S,
    entries: &[RollbackEntry],
    concurrency: usize,
) -> ApplyOutcome {
    let results: Vec<(String, Result<(), StoreError>)> = stream::iter(entries)
        .map(|entry| async move {
            let result = store.patch_row(&entry.id, &entry.after).await;
            (entry.id.clone(), result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut outcome = ApplyOutcome::default();
    for (id, result) in results {
        match result {
            Ok(()) => outcome.patched += 1,
            Err(e) => {
                error!(%id, error = %e, "Patch failed");
                outcome.failed.push(id);
            }
        }
    }
    outcome.failed.sort();
    info!(
        patched = outcome.patched,
        failed = outcome.failed.len(),
        "Patches applied"
    );
    outcome
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub table: String,
    pub page_size: usize,
    pub concurrency: usize,
    pub rollback_dir: PathBuf,
    pub apply: bool,
    pub upload_bucket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub fetched: usize,
    pub planned: usize,
    pub unchanged: usize,
    pub rejected: usize,
    /// Plan file (dry run) or rollback file (apply). `None` when nothing
    /// needed patching during an apply.
    pub file: Option<PathBuf>,
    pub applied: Option<ApplyOutcome>,
}

fn log_preview(entries: &[RollbackEntry]) {
    for entry in entries.iter().take(PREVIEW_LIMIT) {
        info!(id = %entry.id, before = ?entry.before, after = ?entry.after, "Planned patch");
    }
    if entries.len() > PREVIEW_LIMIT {
        info!(more = entries.len() - PREVIEW_LIMIT, "More planned patches in the plan file");
    }
}

/// Repair split brands and canonical columns across the whole catalog.
#[instrument(level = "info", skip_all, fields(table = %sync.table, apply = sync.apply))]
pub async fn sync_brands<S: CatalogStore + ObjectStore>(
    store: &S,
    map: &BrandMap,
    opts: &CanonicalOptions,
    sync: &SyncOptions,
) -> Result<SyncOutcome, Box<dyn Error>> {
    // A rollback file must be writable before anything remote happens.
    ensure_writable_dir(&sync.rollback_dir).await?;

    let rows = fetch_all(store, sync.page_size).await?;
    let plan = plan_sync(&rows, map, opts);
    info!(
        fetched = rows.len(),
        planned = plan.entries.len(),
        unchanged = plan.unchanged,
        rejected = plan.rejected.len(),
        "Sync plan built"
    );

    let mut outcome = SyncOutcome {
        fetched: rows.len(),
        planned: plan.entries.len(),
        unchanged: plan.unchanged,
        rejected: plan.rejected.len(),
        file: None,
        applied: None,
    };
    let file = RollbackFile::new(&sync.table, plan.entries);

    if !sync.apply {
        let path = sync
            .rollback_dir
            .join(format!("plan_{}_{}.json", sync.table, utc_stamp(file.created_at)));
        write_json(&file, &path).await?;
        log_preview(&file.entries);
        info!(plan = %path.display(), "Dry run; pass --apply to write these patches");
        outcome.file = Some(path);
        return Ok(outcome);
    }

    if file.entries.is_empty() {
        info!("Catalog already canonical; nothing to patch");
        return Ok(outcome);
    }

    let path = write_rollback(&sync.rollback_dir, &file).await?;
    if let Some(bucket) = &sync.upload_bucket {
        let bytes = tokio::fs::read(&path).await?;
        let object_path = format!("rollbacks/{}", file.file_name());
        store
            .put_object(bucket, &object_path, bytes, "application/json")
            .await?;
        info!(%bucket, path = %object_path, "Uploaded rollback file");
    }
    outcome.file = Some(path);
    outcome.applied = Some(apply_plan(store, &file.entries, sync.concurrency).await);
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// rollback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackOutcome {
    pub restorable: usize,
    pub applied: Option<ApplyOutcome>,
}

/// Put back the `before` values recorded in a rollback file.
#[instrument(level = "info", skip_all, fields(path = %path.display(), table = %table, apply = apply))]
pub async fn rollback<S: CatalogStore>(
    store: &S,
    path: &Path,
    table: &str,
    apply: bool,
    concurrency: usize,
) -> Result<RollbackOutcome, Box<dyn Error>> {
    let file = read_rollback(path).await?;
    if file.table != table {
        return Err(format!(
            "rollback file was written for table {:?}, not {:?}",
            file.table, table
        )
        .into());
    }

    let restore = file.restore_patches();
    let skipped = file.entries.len() - restore.len();
    if skipped > 0 {
        warn!(skipped, "Entries without previous values cannot be restored");
    }

    if !apply {
        log_preview(&restore);
        info!(restorable = restore.len(), "Dry run; pass --apply to restore");
        return Ok(RollbackOutcome {
            restorable: restore.len(),
            applied: None,
        });
    }

    let applied = apply_plan(store, &restore, concurrency).await;
    Ok(RollbackOutcome {
        restorable: restore.len(),
        applied: Some(applied),
    })
}

// ---------------------------------------------------------------------------
// brands check
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrandStats {
    pub brands: usize,
    pub aliases: usize,
    pub max_alias_tokens: usize,
}

/// Load the brand map (built-in plus `user_file`) and report its size.
pub fn brands_check(user_file: Option<&Path>) -> Result<BrandStats, BrandMapError> {
    let map = BrandMap::load(user_file)?;
    Ok(BrandStats {
        brands: map.len(),
        aliases: map.alias_count(),
        max_alias_tokens: map.max_alias_tokens(),
    })
}
