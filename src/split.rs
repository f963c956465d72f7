//! Brand split detection.
//!
//! A *brand split* happens when a multi-word brand is recorded partly in the
//! `brand` field and partly at the start of the product name:
//!
//! | brand    | product_name               | repaired brand       | repaired name |
//! |----------|----------------------------|----------------------|---------------|
//! | Royal    | Canin Maxi Adult           | Royal Canin          | Maxi Adult    |
//! | Lily's   | Kitchen Woofloaf           | Lily's Kitchen       | Woofloaf      |
//! | Hill's   | Science Plan Adult Lamb    | Hill's Science Plan  | Adult Lamb    |
//! | Royal    | Royal Canin Mini Puppy     | Royal Canin          | Mini Puppy    |
//!
//! Detection works on folded words: the brand words followed by the name
//! words are matched against the brand map, and the longest known brand that
//! reaches past the brand field wins.

use crate::brands::BrandMap;
use crate::models::CatalogRow;
use crate::utils::{collapse_ws, tokens};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Which shape of split was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitKind {
    /// The brand field is not a brand on its own ("Royal" + "Canin ...").
    Truncated,
    /// The brand field is a known brand, but a longer product line continues
    /// into the name ("Hill's" + "Science Plan ...").
    SubBrand,
    /// The name repeats the full brand and the brand field holds only its
    /// start ("Royal" + "Royal Canin ...", "Hill's" + "Hill's Science Plan ...").
    Repeated,
}

/// A repaired brand/name pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub brand: String,
    pub name: String,
    pub kind: SplitKind,
}

/// A split found on a catalog row, with the values before and after repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitFix {
    pub id: String,
    pub old_brand: String,
    pub old_name: String,
    pub new_brand: String,
    pub new_name: String,
    pub kind: SplitKind,
}

/// Check one brand/name pair for a brand split.
///
/// Returns `None` when the brand is already complete, when nothing in the
/// map matches, or when the matched words cannot be mapped back onto whole
/// words of the raw name (e.g. the match would end inside `"Canin-Adult"`).
pub fn detect_split(brand: &str, name: &str, map: &BrandMap) -> Option<Split> {
    let brand_words = tokens(brand);
    if brand_words.is_empty() {
        return None;
    }
    let name_words = tokens(name);
    if name_words.is_empty() {
        return None;
    }

    // A split must move the row to a different canonical brand.
    let own = map.resolve(brand).map(|m| m.canonical);
    let brand_known = own.is_some();

    // Brand words followed by the start of the name.
    let mut combined = brand_words.clone();
    combined.extend(name_words.iter().cloned());
    if let Some((canonical, consumed)) = map.longest_prefix(&combined) {
        if consumed > brand_words.len() && own.as_deref() != Some(canonical.as_str()) {
            let taken = consumed - brand_words.len();
            let kind = if brand_known {
                SplitKind::SubBrand
            } else {
                SplitKind::Truncated
            };
            return rest_of_name(name, taken).map(|rest| Split {
                brand: canonical,
                name: rest,
                kind,
            });
        }
    }

    // The name carries the full brand and the brand field holds its start.
    if let Some((canonical, consumed)) = map.longest_prefix(&name_words) {
        let canonical_words = BrandMap::canonical_tokens(&canonical);
        let echoed = &name_words[..consumed];
        if consumed > brand_words.len()
            && own.as_deref() != Some(canonical.as_str())
            && (canonical_words.starts_with(&brand_words) || echoed.starts_with(&brand_words))
        {
            return rest_of_name(name, consumed).map(|rest| Split {
                brand: canonical,
                name: rest,
                kind: SplitKind::Repeated,
            });
        }
    }

    None
}

/// Drop the raw words of `name` that fold to its first `taken` tokens, keeping
/// the original spelling of everything after them.
fn rest_of_name(name: &str, taken: usize) -> Option<String> {
    let collapsed = collapse_ws(name);
    let raw_words: Vec<&str> = collapsed.split(' ').filter(|w| !w.is_empty()).collect();

    let mut seen = 0usize;
    for (i, word) in raw_words.iter().enumerate() {
        if seen == taken {
            return Some(raw_words[i..].join(" "));
        }
        seen += tokens(word).len();
        if seen > taken {
            debug!(name, taken, "Split boundary falls inside a word");
            return None;
        }
    }
    (seen == taken).then(String::new)
}

/// Scan catalog rows for brand splits.
#[instrument(level = "info", skip_all, fields(rows = rows.len()))]
pub fn scan(rows: &[CatalogRow], map: &BrandMap) -> Vec<SplitFix> {
    let fixes: Vec<SplitFix> = rows
        .iter()
        .filter_map(|row| {
            detect_split(&row.brand, &row.product_name, map).map(|split| SplitFix {
                id: row.id.clone(),
                old_brand: row.brand.clone(),
                old_name: row.product_name.clone(),
                new_brand: split.brand,
                new_name: split.name,
                kind: split.kind,
            })
        })
        .collect();
    info!(found = fixes.len(), "Brand split scan complete");
    fixes
}
