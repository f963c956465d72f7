//! String normalization primitives and small file system helpers.
//!
//! Every comparison the catalog makes between brand strings or product names
//! goes through [`fold`], so two spellings that fold to the same text are
//! treated as the same thing:
//!
//! - `"Hill's Science Plan"` and `"HILLS  science-plan"` both fold to
//!   `"hills science plan"`
//! - `"Pooch & Mutt"` folds to `"pooch and mutt"`
//! - `"Édition Spéciale"` folds to `"edition speciale"`

use chrono::{DateTime, Utc};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};
use unidecode::unidecode;

/// Trim, drop zero-width/BOM characters and collapse internal whitespace.
///
/// This keeps the original casing and punctuation, so it is what display
/// values (brand names, product names) pass through before being stored.
pub fn collapse_ws(s: &str) -> String {
    let cleaned = s.replace(['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}'], "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold a string into its comparison form.
///
/// The text is transliterated to ASCII and lowercased. `&` becomes `and`,
/// apostrophes disappear, and every other non-alphanumeric character becomes
/// a word break. Runs of whitespace collapse to a single space.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(fold("Lily's Kitchen"), "lilys kitchen");
/// assert_eq!(fold("Arden Grange-Adult"), "arden grange adult");
/// ```
pub fn fold(s: &str) -> String {
    let ascii = unidecode(&collapse_ws(s)).to_lowercase();
    let mut out = String::with_capacity(ascii.len());
    for ch in ascii.chars() {
        match ch {
            '\'' | '`' => {}
            '&' => out.push_str(" and "),
            c if c.is_ascii_alphanumeric() => out.push(c),
            _ => out.push(' '),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The words of [`fold`]ed text.
pub fn tokens(s: &str) -> Vec<String> {
    fold(s).split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect()
}

/// Convert text into a lowercase, hyphenated slug.
///
/// Slugs never start or end with a hyphen and never contain two in a row.
/// Text with no alphanumeric content produces an empty slug.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Royal Canin"), "royal-canin");
/// assert_eq!(slugify("  Pooch & Mutt! "), "pooch-and-mutt");
/// ```
pub fn slugify(s: &str) -> String {
    fold(s).replace(' ', "-")
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary no later than `max` bytes and
/// get an ellipsis plus the number of bytes dropped.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Compact UTC timestamp used in generated file names (`20250506T203000Z`).
pub fn utc_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a scratch file.
/// Jobs call this before doing any remote work so that a rollback file can
/// always be written.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let check_path = path.join("..__write_check__");
    stdfs::File::create(&check_path)?;
    let _ = stdfs::remove_file(&check_path);
    info!("Output directory is writable");
    Ok(())
}
