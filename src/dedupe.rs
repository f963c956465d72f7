//! Catalog deduplication by product key.
//!
//! Rows are canonicalized, grouped by [`ProductKey`], and each group keeps a
//! single *keeper*: the most complete row, preferring trusted sources, then
//! the row seen first. Rows that cannot be canonicalized are reported rather
//! than dropped silently.

use crate::brands::BrandMap;
use crate::canonical::{CanonicalOptions, CanonicalProduct, canonicalize};
use crate::models::CatalogRow;
use crate::sources::Source;
use itertools::Itertools;
use serde::Serialize;
use std::cmp::Reverse;
use tracing::{info, instrument, warn};

/// One product key and the rows that share it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupeGroup {
    pub product_key: String,
    pub keeper_id: String,
    pub duplicate_ids: Vec<String>,
    pub sources: Vec<Source>,
    #[serde(skip)]
    pub keeper_index: usize,
    #[serde(skip)]
    pub first_index: usize,
    #[serde(skip)]
    pub product: CanonicalProduct,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejected {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupeReport {
    pub input_rows: usize,
    pub unique_keys: usize,
    pub duplicate_rows: usize,
    pub groups: Vec<DedupeGroup>,
    pub rejected: Vec<Rejected>,
}

impl DedupeReport {
    /// Groups that actually collapsed more than one row.
    pub fn collapsed(&self) -> impl Iterator<Item = &DedupeGroup> {
        self.groups.iter().filter(|g| !g.duplicate_ids.is_empty())
    }
}

/// Ordering key for keeper selection; the smallest value wins.
fn keeper_rank(row: &CatalogRow, index: usize) -> (Reverse<usize>, u8, usize) {
    let priority = row.source.map(|s| s.priority()).unwrap_or(u8::MAX);
    (Reverse(row.populated_fields()), priority, index)
}

/// Group `rows` by product key.
///
/// Groups come back in the order their key was first seen, so the report is
/// stable for a given input.
#[instrument(level = "info", skip_all, fields(rows = rows.len()))]
pub fn dedupe(rows: &[CatalogRow], map: &BrandMap, opts: &CanonicalOptions) -> DedupeReport {
    let mut rejected = Vec::new();
    let mut keyed: Vec<(usize, CanonicalProduct)> = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        match canonicalize(&row.brand, &row.product_name, row.form.as_deref(), map, opts) {
            Ok(product) => keyed.push((index, product)),
            Err(e) => {
                warn!(id = %row.id, error = %e, "Row rejected");
                rejected.push(Rejected {
                    id: row.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let by_key = keyed
        .into_iter()
        .into_group_map_by(|(_, product)| product.product_key.clone());

    let mut groups: Vec<DedupeGroup> = by_key
        .into_iter()
        .filter_map(|(key, members)| {
            let (keeper_index, product) = members
                .iter()
                .min_by_key(|(index, _)| keeper_rank(&rows[*index], *index))
                .cloned()?;
            let mut member_indexes: Vec<usize> = members.iter().map(|(i, _)| *i).collect();
            member_indexes.sort_unstable();

            let duplicate_ids = member_indexes
                .iter()
                .filter(|i| **i != keeper_index)
                .map(|i| rows[*i].id.clone())
                .collect();
            let sources = member_indexes
                .iter()
                .filter_map(|i| rows[*i].source)
                .unique()
                .collect();

            Some(DedupeGroup {
                product_key: key.to_string(),
                keeper_id: rows[keeper_index].id.clone(),
                duplicate_ids,
                sources,
                keeper_index,
                first_index: member_indexes[0],
                product,
            })
        })
        .collect();

    groups.sort_by_key(|g| g.first_index);

    let unique_keys = groups.len();
    let duplicate_rows = groups.iter().map(|g| g.duplicate_ids.len()).sum();
    info!(
        input = rows.len(),
        unique_keys,
        duplicate_rows,
        rejected = rejected.len(),
        "Deduplication complete"
    );

    DedupeReport {
        input_rows: rows.len(),
        unique_keys,
        duplicate_rows,
        groups,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, brand: &str, name: &str, source: Source) -> CatalogRow {
        CatalogRow {
            source: Some(source),
            ..CatalogRow::new(id, brand, name)
        }
    }

    fn run(rows: &[CatalogRow]) -> DedupeReport {
        dedupe(rows, &BrandMap::builtin().unwrap(), &CanonicalOptions::default())
    }

    #[test]
    fn test_split_and_sized_variants_collapse() {
        let rows = vec![
            row("z1", "Royal", "Canin Maxi Adult Dry 15kg", Source::Zooplus),
            row("a1", "Royal Canin", "Maxi Adult Dry 4kg", Source::Aadf),
            row("c1", "ROYAL CANIN", "Maxi Adult Dry Dog Food", Source::Chewy),
            row("z2", "Acana", "Wild Prairie", Source::Zooplus),
        ];
        let report = run(&rows);

        assert_eq!(report.input_rows, 4);
        assert_eq!(report.unique_keys, 2);
        assert_eq!(report.duplicate_rows, 2);
        assert!(report.rejected.is_empty());

        let first = &report.groups[0];
        assert_eq!(first.product_key, "royal-canin|maxi-adult|dry");
        // All rows are equally complete; AADF is the most trusted source.
        assert_eq!(first.keeper_id, "a1");
        assert_eq!(first.duplicate_ids, vec!["z1".to_string(), "c1".to_string()]);
        assert_eq!(first.sources, vec![Source::Zooplus, Source::Aadf, Source::Chewy]);
        assert_eq!(report.collapsed().count(), 1);
    }

    #[test]
    fn test_most_complete_row_wins() {
        let mut detailed = row("c1", "Acana", "Classics Red", Source::Chewy);
        detailed.url = Some("https://chewy.example/acana".to_string());
        detailed.ingredients = Some("Beef, lamb".to_string());
        let rows = vec![row("m1", "Acana", "Classics Red", Source::Manual), detailed];

        let report = run(&rows);
        assert_eq!(report.groups[0].keeper_id, "c1");
        assert_eq!(report.groups[0].duplicate_ids, vec!["m1".to_string()]);
    }

    #[test]
    fn test_earliest_row_breaks_ties() {
        let rows = vec![
            row("1", "Acana", "Classics Red", Source::Zooplus),
            row("2", "Acana", "Classics Red", Source::Zooplus),
        ];
        let report = run(&rows);
        assert_eq!(report.groups[0].keeper_id, "1");
    }

    #[test]
    fn test_forms_keep_products_apart() {
        let rows = vec![
            row("1", "Lily's Kitchen", "Chicken Casserole Dry", Source::Zooplus),
            row("2", "Lily's Kitchen", "Chicken Casserole Tins", Source::Zooplus),
        ];
        let report = run(&rows);
        assert_eq!(report.unique_keys, 2);
        assert_eq!(report.duplicate_rows, 0);
    }

    #[test]
    fn test_rejected_rows_do_not_abort() {
        let rows = vec![
            row("bad", "", "Adult", Source::Manual),
            row("ok", "Acana", "Classics", Source::Manual),
        ];
        let report = run(&rows);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].id, "bad");
        assert_eq!(report.unique_keys, 1);
    }

    #[test]
    fn test_groups_follow_first_seen_order() {
        let rows = vec![
            row("1", "Orijen", "Original", Source::Zooplus),
            row("2", "Acana", "Classics", Source::Zooplus),
            row("3", "Orijen", "Original", Source::Manual),
        ];
        let report = run(&rows);
        let keys: Vec<&str> = report.groups.iter().map(|g| g.product_key.as_str()).collect();
        assert_eq!(keys, vec!["orijen|original|unknown", "acana|classics|unknown"]);
        assert_eq!(report.groups[0].keeper_id, "3");
    }

    #[test]
    fn test_report_serializes_without_internal_fields() {
        let rows = vec![row("1", "Orijen", "Original", Source::Zooplus)];
        let json = serde_json::to_value(run(&rows)).unwrap();
        let group = &json["groups"][0];
        assert_eq!(group["keeper_id"], "1");
        assert!(group.get("keeper_index").is_none());
        assert!(group.get("product").is_none());
    }
}
