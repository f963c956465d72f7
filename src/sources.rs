//! Data sources and their CSV export layouts.
//!
//! Each scraper writes its own CSV shape. This module maps those shapes onto
//! [`CatalogRow`] so that every downstream job sees one row type.
//!
//! | Source    | Kind     | Id column       | Name column       |
//! |-----------|----------|-----------------|-------------------|
//! | zooplus   | products | `product_id`    | `product_name`    |
//! | aadf      | products | `food_id`       | `food_name`       |
//! | chewy     | products | `part_number`   | `name`            |
//! | manual    | products | `id`            | `product_name`    |
//! | akc       | breeds   |                 |                   |
//! | wikipedia | breeds   |                 |                   |
//!
//! Breed sources are tracked for provenance only; they have no product layout.

use crate::models::CatalogRow;
use crate::utils::collapse_ws;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Zooplus,
    Aadf,
    Chewy,
    Akc,
    Wikipedia,
    Manual,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Zooplus => "zooplus",
            Source::Aadf => "aadf",
            Source::Chewy => "chewy",
            Source::Akc => "akc",
            Source::Wikipedia => "wikipedia",
            Source::Manual => "manual",
        }
    }

    /// Lower values are more trusted when choosing between duplicate rows.
    pub fn priority(&self) -> u8 {
        match self {
            Source::Manual => 0,
            Source::Aadf => 1,
            Source::Zooplus => 2,
            Source::Chewy => 3,
            Source::Akc => 4,
            Source::Wikipedia => 5,
        }
    }

    /// Column aliases of the source's product export, if it has one.
    pub fn layout(&self) -> Option<Layout> {
        match self {
            Source::Zooplus => Some(Layout {
                id: &["product_id", "id", "sku"],
                brand: &["brand", "manufacturer"],
                name: &["product_name", "name", "title"],
                form: &["food_type", "form"],
                url: &["url", "product_url"],
                image_url: &["image_url", "image"],
                ingredients: &["composition", "ingredients"],
            }),
            Source::Aadf => Some(Layout {
                id: &["food_id", "id"],
                brand: &["brand", "brand_name"],
                name: &["food_name", "name"],
                form: &["type", "food_type", "form"],
                url: &["url", "link"],
                image_url: &["image_url"],
                ingredients: &["ingredients", "composition"],
            }),
            Source::Chewy => Some(Layout {
                id: &["part_number", "sku", "id"],
                brand: &["brand"],
                name: &["name", "title", "product_name"],
                form: &["food_form", "form"],
                url: &["url"],
                image_url: &["image_url", "image"],
                ingredients: &["ingredients"],
            }),
            Source::Manual => Some(Layout {
                id: &["id"],
                brand: &["brand"],
                name: &["product_name", "name"],
                form: &["form"],
                url: &["url"],
                image_url: &["image_url"],
                ingredients: &["ingredients"],
            }),
            Source::Akc | Source::Wikipedia => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Source as ValueEnum>::from_str(s.trim(), true)
            .map_err(|_| SourceError::UnknownSource(s.to_string()))
    }
}

/// Header aliases for one source's product CSV. The first alias present in
/// the header row is used.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub id: &'static [&'static str],
    pub brand: &'static [&'static str],
    pub name: &'static [&'static str],
    pub form: &'static [&'static str],
    pub url: &'static [&'static str],
    pub image_url: &'static [&'static str],
    pub ingredients: &'static [&'static str],
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("unknown source {0:?}")]
    UnknownSource(String),
    #[error("{0} is a breed source and has no product CSV layout")]
    NotAProductSource(Source),
    #[error("{origin} CSV is missing a {column} column (tried {tried:?})")]
    MissingColumn {
        origin: Source,
        column: &'static str,
        tried: &'static [&'static str],
    },
    #[error("invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
}

struct Columns {
    id: Option<usize>,
    brand: usize,
    name: usize,
    form: Option<usize>,
    url: Option<usize>,
    image_url: Option<usize>,
    ingredients: Option<usize>,
}

fn find(headers: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| headers.get(*alias).copied())
}

fn resolve_columns(headers: &csv::StringRecord, source: Source) -> Result<Columns, SourceError> {
    let layout = source
        .layout()
        .ok_or(SourceError::NotAProductSource(source))?;
    let by_name: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (collapse_ws(h).to_ascii_lowercase(), i))
        .collect();

    let required = |column: &'static str, tried: &'static [&'static str]| {
        find(&by_name, tried).ok_or(SourceError::MissingColumn {
            origin: source,
            column,
            tried,
        })
    };

    Ok(Columns {
        id: find(&by_name, layout.id),
        brand: required("brand", layout.brand)?,
        name: required("name", layout.name)?,
        form: find(&by_name, layout.form),
        url: find(&by_name, layout.url),
        image_url: find(&by_name, layout.image_url),
        ingredients: find(&by_name, layout.ingredients),
    })
}

fn cell(record: &csv::StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(collapse_ws)
        .filter(|v| !v.is_empty())
}

/// Read a source CSV export into catalog rows.
///
/// Headers are matched case-insensitively against the source's layout.
/// Rows without an id column get `"{source}-{row number}"`.
#[instrument(level = "info", skip_all, fields(source = %source))]
pub fn read_rows<R: Read>(reader: R, source: Source) -> Result<Vec<CatalogRow>, SourceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let columns = resolve_columns(csv_reader.headers()?, source)?;
    if columns.id.is_none() {
        warn!("No id column found; generating row ids");
    }

    let mut rows = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record?;
        let id = cell(&record, columns.id).unwrap_or_else(|| format!("{}-{}", source, line + 1));
        rows.push(CatalogRow {
            id,
            brand: cell(&record, Some(columns.brand)).unwrap_or_default(),
            product_name: cell(&record, Some(columns.name)).unwrap_or_default(),
            form: cell(&record, columns.form),
            url: cell(&record, columns.url),
            image_url: cell(&record, columns.image_url),
            ingredients: cell(&record, columns.ingredients),
            source: Some(source),
            brand_slug: None,
            product_key: None,
        });
    }

    debug!(rows = rows.len(), "Parsed source rows");
    info!(count = rows.len(), "Read source CSV");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_source_names() {
        assert_eq!("Zooplus".parse::<Source>().unwrap(), Source::Zooplus);
        assert_eq!(" aadf ".parse::<Source>().unwrap(), Source::Aadf);
        assert!(matches!(
            "petsathome".parse::<Source>(),
            Err(SourceError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_priority_order() {
        let mut sources = vec![Source::Wikipedia, Source::Chewy, Source::Manual, Source::Aadf];
        sources.sort_by_key(Source::priority);
        assert_eq!(
            sources,
            vec![Source::Manual, Source::Aadf, Source::Chewy, Source::Wikipedia]
        );
    }

    #[test]
    fn test_read_zooplus_layout() {
        let csv = "Product_ID,Brand,Product_Name,Food_Type,URL\n\
                   zp-1,Royal,Canin Maxi Adult 15kg,dry,https://zooplus.example/1\n\
                   zp-2, Acana ,Wild Prairie,,\n";
        let rows = read_rows(Cursor::new(csv), Source::Zooplus).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "zp-1");
        assert_eq!(rows[0].brand, "Royal");
        assert_eq!(rows[0].product_name, "Canin Maxi Adult 15kg");
        assert_eq!(rows[0].form.as_deref(), Some("dry"));
        assert_eq!(rows[0].source, Some(Source::Zooplus));
        assert_eq!(rows[1].brand, "Acana");
        assert_eq!(rows[1].form, None);
        assert_eq!(rows[1].url, None);
    }

    #[test]
    fn test_read_aadf_generates_ids_when_missing() {
        let csv = "brand,food_name,type\nBurns,Original Chicken & Brown Rice,Dry\n";
        let rows = read_rows(Cursor::new(csv), Source::Aadf).unwrap();
        assert_eq!(rows[0].id, "aadf-1");
        assert_eq!(rows[0].product_name, "Original Chicken & Brown Rice");
    }

    #[test]
    fn test_header_only_file_yields_no_rows() {
        let rows = read_rows(Cursor::new("part_number,brand,name\n"), Source::Chewy).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_missing_required_column() {
        let err = read_rows(Cursor::new("id,brand\n1,Acana\n"), Source::Manual).unwrap_err();
        match err {
            SourceError::MissingColumn { column, .. } => assert_eq!(column, "name"),
            other => panic!("expected missing column error, got {other:?}"),
        }
    }

    #[test]
    fn test_breed_sources_have_no_layout() {
        let err = read_rows(Cursor::new("breed,group\n"), Source::Akc).unwrap_err();
        assert!(matches!(err, SourceError::NotAProductSource(Source::Akc)));
    }
}
