//! The canonical brand map.
//!
//! A [`BrandMap`] maps every known spelling of a brand to one authoritative
//! display name. Lookups are keyed on [`fold`]ed text, so the map only needs
//! aliases that differ in *words*, not in casing or punctuation.
//!
//! The map is assembled from two layers:
//!
//! 1. the built-in table compiled into the binary (`data/brands.yaml`)
//! 2. an optional user YAML file with the same shape, whose entries win over
//!    the built-in ones
//!
//! ```yaml
//! brands:
//!   - canonical: Royal Canin
//!     aliases: [Royal Canin SAS]
//! ```

use crate::utils::{fold, tokens};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const BUILTIN_BRANDS: &str = include_str!("../data/brands.yaml");

/// Folded keys shorter than this never take part in fuzzy matching.
const MIN_FUZZY_LEN: usize = 4;

/// One brand and the spellings that should resolve to it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrandEntry {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BrandFile {
    brands: Vec<BrandEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum BrandMapError {
    #[error("failed to read brand map {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid brand map YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("brand map entry {index} has an empty canonical name")]
    EmptyCanonical { index: usize },
    #[error("alias {alias:?} maps to both {first:?} and {second:?}")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },
}

/// How a raw brand string was matched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "via", rename_all = "lowercase")]
pub enum MatchVia {
    Exact,
    Fuzzy { score: f64 },
}

/// Result of resolving a raw brand string.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandMatch {
    pub canonical: String,
    pub via: MatchVia,
}

/// Lookup table from folded brand variants to canonical display names.
#[derive(Debug, Clone, Default)]
pub struct BrandMap {
    by_key: HashMap<String, String>,
    canonicals: Vec<String>,
    max_alias_tokens: usize,
}

impl BrandMap {
    /// Build a map from entries, rejecting aliases claimed by two brands.
    pub fn from_entries(entries: Vec<BrandEntry>) -> Result<Self, BrandMapError> {
        let mut map = BrandMap::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let canonical = entry.canonical.trim().to_string();
            if fold(&canonical).is_empty() {
                return Err(BrandMapError::EmptyCanonical { index });
            }

            for variant in std::iter::once(&canonical).chain(entry.aliases.iter()) {
                let key = fold(variant);
                if key.is_empty() {
                    continue;
                }
                if let Some(first) = map.by_key.get(&key) {
                    if *first != canonical {
                        return Err(BrandMapError::DuplicateAlias {
                            alias: variant.clone(),
                            first: first.clone(),
                            second: canonical.clone(),
                        });
                    }
                    continue;
                }
                map.insert_key(key, &canonical);
            }

            if !map.canonicals.contains(&canonical) {
                map.canonicals.push(canonical);
            }
        }
        Ok(map)
    }

    /// Parse a YAML document with a top-level `brands:` list.
    pub fn from_yaml(yaml: &str) -> Result<Self, BrandMapError> {
        let file: BrandFile = serde_yaml::from_str(yaml)?;
        Self::from_entries(file.brands)
    }

    /// The table compiled into the binary.
    pub fn builtin() -> Result<Self, BrandMapError> {
        Self::from_yaml(BUILTIN_BRANDS)
    }

    /// Load the built-in table, then layer an optional user file over it.
    #[instrument(level = "info", skip_all, fields(user_file = ?user_file))]
    pub fn load(user_file: Option<&Path>) -> Result<Self, BrandMapError> {
        let mut map = Self::builtin()?;
        if let Some(path) = user_file {
            let yaml = std::fs::read_to_string(path).map_err(|source| BrandMapError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let user = Self::from_yaml(&yaml)?;
            info!(brands = user.len(), "Merging user brand map");
            map.merge(user);
        }
        info!(
            brands = map.len(),
            aliases = map.alias_count(),
            "Brand map loaded"
        );
        Ok(map)
    }

    /// Layer `other` over `self`. Aliases present in both now point at the
    /// canonical name from `other`.
    pub fn merge(&mut self, other: BrandMap) {
        for (key, canonical) in other.by_key {
            if let Some(previous) = self.by_key.get(&key) {
                if *previous != canonical {
                    debug!(%key, %previous, %canonical, "User brand map overrides alias");
                }
            }
            self.insert_key(key, &canonical);
        }
        for canonical in other.canonicals {
            if !self.canonicals.contains(&canonical) {
                self.canonicals.push(canonical);
            }
        }
    }

    fn insert_key(&mut self, key: String, canonical: &str) {
        self.max_alias_tokens = self.max_alias_tokens.max(key.split(' ').count());
        self.by_key.insert(key, canonical.to_string());
    }

    /// Number of canonical brands.
    pub fn len(&self) -> usize {
        self.canonicals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonicals.is_empty()
    }

    /// Number of distinct folded keys, canonical names included.
    pub fn alias_count(&self) -> usize {
        self.by_key.len()
    }

    /// Word count of the longest known alias.
    pub fn max_alias_tokens(&self) -> usize {
        self.max_alias_tokens
    }

    /// Exact lookup of a raw brand string.
    pub fn resolve(&self, raw: &str) -> Option<BrandMatch> {
        self.by_key.get(&fold(raw)).map(|canonical| BrandMatch {
            canonical: canonical.clone(),
            via: MatchVia::Exact,
        })
    }

    /// Exact lookup, falling back to Jaro-Winkler similarity against every
    /// alias.
    ///
    /// A fuzzy candidate is accepted only when its score reaches `threshold`
    /// and is strictly higher than the best score of any *other* canonical
    /// brand. Ties between two brands resolve to `None`.
    pub fn resolve_fuzzy(&self, raw: &str, threshold: f64) -> Option<BrandMatch> {
        if let Some(found) = self.resolve(raw) {
            return Some(found);
        }

        let key = fold(raw);
        if key.len() < MIN_FUZZY_LEN {
            return None;
        }

        let mut best_per_brand: HashMap<&str, f64> = HashMap::new();
        for (alias, canonical) in &self.by_key {
            let score = strsim::jaro_winkler(&key, alias);
            let best = best_per_brand.entry(canonical.as_str()).or_insert(0.0);
            if score > *best {
                *best = score;
            }
        }

        let mut ranked: Vec<(&str, f64)> = best_per_brand.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let (canonical, score) = *ranked.first()?;
        let runner_up = ranked.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        if score < threshold || score <= runner_up {
            debug!(raw, score, runner_up, "No confident fuzzy brand match");
            return None;
        }

        debug!(raw, canonical, score, "Fuzzy brand match");
        Some(BrandMatch {
            canonical: canonical.to_string(),
            via: MatchVia::Fuzzy { score },
        })
    }

    /// Find the longest leading run of `words` that is a known brand.
    ///
    /// Returns the canonical name and how many words it consumed.
    pub fn longest_prefix<S: AsRef<str>>(&self, words: &[S]) -> Option<(String, usize)> {
        let limit = self.max_alias_tokens.min(words.len());
        (1..=limit).rev().find_map(|n| {
            let key = words[..n]
                .iter()
                .map(|w| w.as_ref())
                .collect::<Vec<_>>()
                .join(" ");
            self.by_key.get(&key).map(|canonical| (canonical.clone(), n))
        })
    }

    /// The folded words of a canonical brand name.
    pub fn canonical_tokens(canonical: &str) -> Vec<String> {
        tokens(canonical)
    }
}
