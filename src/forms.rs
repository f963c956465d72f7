//! Product form detection (dry, wet, raw, ...).
//!
//! The form is the third component of a product key, so "Adult Chicken" sold
//! as kibble and as a pouch stay separate products while the form words
//! themselves are removed from the name slug.

use crate::utils::tokens;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Form {
    Dry,
    Wet,
    Raw,
    FreezeDried,
    Treat,
    Supplement,
    Unknown,
}

impl Form {
    pub fn as_str(&self) -> &'static str {
        match self {
            Form::Dry => "dry",
            Form::Wet => "wet",
            Form::Raw => "raw",
            Form::FreezeDried => "freeze-dried",
            Form::Treat => "treat",
            Form::Supplement => "supplement",
            Form::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised product form {0:?}")]
pub struct FormParseError(pub String);

impl FromStr for Form {
    type Err = FormParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match tokens(s).join(" ").as_str() {
            "dry" | "kibble" | "dry food" | "complete dry" => Ok(Form::Dry),
            "wet" | "wet food" | "canned" | "can" | "tin" | "pouch" | "tray" => Ok(Form::Wet),
            "raw" | "frozen" | "frozen raw" | "barf" => Ok(Form::Raw),
            "freeze dried" | "freezedried" => Ok(Form::FreezeDried),
            "treat" | "treats" | "snack" | "snacks" | "chew" | "chews" => Ok(Form::Treat),
            "supplement" | "supplements" => Ok(Form::Supplement),
            "unknown" => Ok(Form::Unknown),
            _ => Err(FormParseError(s.to_string())),
        }
    }
}

/// Keyword rules, checked in order. The first rule with a phrase present in
/// the folded name decides the form.
const DETECT_RULES: &[(Form, &[&[&str]])] = &[
    (Form::FreezeDried, &[&["freeze", "dried"], &["freezedried"]]),
    (Form::Raw, &[&["raw"], &["barf"], &["frozen"]]),
    (
        Form::Treat,
        &[
            &["treat"],
            &["treats"],
            &["chew"],
            &["chews"],
            &["jerky"],
            &["dental", "sticks"],
            &["biscuits"],
            &["snack"],
            &["snacks"],
        ],
    ),
    (
        Form::Supplement,
        &[&["supplement"], &["supplements"], &["tablets"], &["capsules"]],
    ),
    (
        Form::Wet,
        &[
            &["wet"],
            &["can"],
            &["cans"],
            &["canned"],
            &["tin"],
            &["tins"],
            &["pouch"],
            &["pouches"],
            &["tray"],
            &["trays"],
            &["pate"],
            &["loaf"],
            &["in", "gravy"],
            &["in", "jelly"],
        ],
    ),
    (Form::Dry, &[&["dry"], &["kibble"], &["kibbles"], &["croquettes"]]),
];

/// Generic form words that carry no product identity and are removed from
/// name slugs. Descriptive words such as "pate" or "jerky" are kept.
pub(crate) const STRIP_PHRASES: &[&[&str]] = &[
    &["freeze", "dried"],
    &["freezedried"],
    &["wet"],
    &["dry"],
    &["raw"],
    &["kibble"],
    &["kibbles"],
    &["can"],
    &["cans"],
    &["canned"],
    &["tin"],
    &["tins"],
    &["pouch"],
    &["pouches"],
    &["tray"],
    &["trays"],
];

/// True when `phrase` occurs as a contiguous run of words in `words`.
pub(crate) fn contains_phrase(words: &[String], phrase: &[&str]) -> bool {
    !phrase.is_empty()
        && words
            .windows(phrase.len())
            .any(|window| window.iter().zip(phrase).all(|(w, p)| w == p))
}

/// Decide the form of a product.
///
/// An explicit `hint` (a form column in the source data) wins when it parses
/// to a known form; otherwise keyword rules over the product name apply.
pub fn detect_form(name: &str, hint: Option<&str>) -> Form {
    if let Some(form) = hint
        .and_then(|h| h.parse::<Form>().ok())
        .filter(|f| *f != Form::Unknown)
    {
        return form;
    }

    let words = tokens(name);
    DETECT_RULES
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|p| contains_phrase(&words, p)))
        .map(|(form, _)| *form)
        .unwrap_or(Form::Unknown)
}
