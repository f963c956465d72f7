//! Canonical `(brand, brand_slug, product_key)` construction.
//!
//! A product key is `brand_slug|name_slug|form`, e.g.
//! `royal-canin|maxi-adult|dry`. Two catalog rows describe the same product
//! exactly when their keys are equal, regardless of which source they came
//! from, how the brand was spelled, or which pack size was listed.
//!
//! # Steps
//!
//! 1. Repair a brand split ([`crate::split`])
//! 2. Resolve the brand through the [`BrandMap`] (exact, then fuzzy when
//!    enabled)
//! 3. Detect the form ([`crate::forms`])
//! 4. Build the name slug: strip a repeated brand prefix, pack sizes and
//!    weights, generic form words and filler words

use crate::brands::{BrandMap, MatchVia};
use crate::forms::{self, Form, STRIP_PHRASES};
use crate::split::{SplitKind, detect_split};
use crate::utils::{collapse_ws, fold, slugify, tokens};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use unidecode::unidecode;

/// Weights and multipacks: `12kg`, `2 x 400g`, `6x85 g`, `1.5 lb`, `400g x 2`.
static WEIGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:\d+\s*x\s*)?\d+(?:[.,]\d+)?\s*(?:kgs?|g|gr|grams?|lbs?|pounds?|oz|ml|l|ltr|litres?|liters?)\b(?:\s*x\s*\d+\b)?",
    )
    .unwrap()
});

/// Counted packs: `24 pack`, `12pk`, `6 count`.
static PACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+\s*(?:pack|pk|count|ct|pcs)\b").unwrap());

/// Words that say nothing about which product this is.
const FILLER_PHRASES: &[&[&str]] = &[
    &["dog", "food"],
    &["for", "dogs"],
    &["for", "dog"],
    &["dogs"],
    &["dog"],
    &["food"],
];

#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalOptions {
    /// Jaro-Winkler threshold for fuzzy brand matching; `None` disables it.
    pub fuzzy_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonicalError {
    #[error("brand is empty")]
    EmptyBrand,
    #[error("product name {0:?} has nothing left to identify it")]
    EmptyName(String),
}

/// The derived identity of a catalog product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalProduct {
    /// Display brand (canonical name when the brand map knows it).
    pub brand: String,
    /// Display product name, after any split repair.
    pub name: String,
    pub brand_slug: String,
    pub name_slug: String,
    pub form: Form,
    pub product_key: ProductKey,
    /// How the brand was matched; `None` for brands the map does not know.
    pub matched: Option<MatchVia>,
    /// Set when the brand/name pair had to be repaired.
    pub split: Option<SplitKind>,
}

/// `brand_slug|name_slug|form`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductKey {
    brand_slug: String,
    name_slug: String,
    form: Form,
}

impl ProductKey {
    pub fn new(brand_slug: String, name_slug: String, form: Form) -> Self {
        Self {
            brand_slug,
            name_slug,
            form,
        }
    }

    pub fn brand_slug(&self) -> &str {
        &self.brand_slug
    }

    pub fn name_slug(&self) -> &str {
        &self.name_slug
    }

    pub fn form(&self) -> Form {
        self.form
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.brand_slug, self.name_slug, self.form)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid product key {0:?}: expected brand_slug|name_slug|form")]
pub struct ProductKeyParseError(pub String);

impl FromStr for ProductKey {
    type Err = ProductKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProductKeyParseError(s.to_string());
        let parts: Vec<&str> = s.split('|').collect();
        let [brand_slug, name_slug, form] = parts.as_slice() else {
            return Err(invalid());
        };
        if brand_slug.is_empty() || name_slug.is_empty() {
            return Err(invalid());
        }
        let form = form.parse::<Form>().map_err(|_| invalid())?;
        Ok(Self::new(brand_slug.to_string(), name_slug.to_string(), form))
    }
}

impl Serialize for ProductKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProductKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Remove every occurrence of the given phrases, longest phrase first at
/// each position.
fn remove_phrases(words: Vec<String>, phrases: &[&[&str]]) -> Vec<String> {
    let mut sorted: Vec<&[&str]> = phrases.to_vec();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.len()));

    let mut out = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let hit = sorted.iter().find(|phrase| {
            !phrase.is_empty()
                && words.len() - i >= phrase.len()
                && words[i..i + phrase.len()].iter().zip(phrase.iter()).all(|(w, p)| w == p)
        });
        match hit {
            Some(phrase) => i += phrase.len(),
            None => {
                out.push(words[i].clone());
                i += 1;
            }
        }
    }
    out
}

/// Build the name slug for a product of `brand`.
pub fn name_slug(name: &str, brand: &str) -> Result<String, CanonicalError> {
    let lowered = unidecode(&collapse_ws(name)).to_lowercase();
    let without_weights = WEIGHT_RE.replace_all(&lowered, " ");
    let without_packs = PACK_RE.replace_all(&without_weights, " ");

    let mut words = tokens(&without_packs);
    let brand_words = tokens(brand);
    if !brand_words.is_empty() && words.starts_with(&brand_words) {
        words.drain(..brand_words.len());
    }
    let words = remove_phrases(words, STRIP_PHRASES);
    let words = remove_phrases(words, FILLER_PHRASES);

    let slug = words.join("-");
    if !slug.is_empty() {
        return Ok(slug);
    }

    // Everything was stripped ("Dry Dog Food 12kg"); fall back to the
    // plain slug so the row still gets a stable key.
    let fallback = slugify(name);
    if fallback.is_empty() {
        Err(CanonicalError::EmptyName(name.to_string()))
    } else {
        Ok(fallback)
    }
}

/// Canonicalize a raw brand and product name.
///
/// `form_hint` is the source's own form column, if it has one.
pub fn canonicalize(
    raw_brand: &str,
    raw_name: &str,
    form_hint: Option<&str>,
    map: &BrandMap,
    opts: &CanonicalOptions,
) -> Result<CanonicalProduct, CanonicalError> {
    let raw_brand = collapse_ws(raw_brand);
    if fold(&raw_brand).is_empty() {
        return Err(CanonicalError::EmptyBrand);
    }

    let (brand_in, name, split) = match detect_split(&raw_brand, raw_name, map) {
        Some(found) => (found.brand, found.name, Some(found.kind)),
        None => (raw_brand, collapse_ws(raw_name), None),
    };

    let matched = match opts.fuzzy_threshold {
        Some(threshold) => map.resolve_fuzzy(&brand_in, threshold),
        None => map.resolve(&brand_in),
    };
    let (brand, matched) = match matched {
        Some(m) => (m.canonical, Some(m.via)),
        None => (brand_in, None),
    };

    let brand_slug = slugify(&brand);
    let form = forms::detect_form(&name, form_hint);
    let name_slug = name_slug(&name, &brand)?;
    let product_key = ProductKey::new(brand_slug.clone(), name_slug.clone(), form);

    Ok(CanonicalProduct {
        brand,
        name,
        brand_slug,
        name_slug,
        form,
        product_key,
        matched,
        split,
    })
}
