//! CSV output for the file-based jobs.
//!
//! Headers are always written, even when no record follows, so an empty
//! run still produces a file downstream tools can read.

use crate::canonical::CanonicalProduct;
use crate::forms::Form;
use crate::models::CatalogRow;
use crate::sources::Source;
use crate::split::SplitKind;
use serde::Serialize;
use std::io::Write;

pub const CANONICAL_HEADERS: [&str; 13] = [
    "id",
    "source",
    "brand",
    "product_name",
    "form",
    "brand_slug",
    "name_slug",
    "product_key",
    "brand_match",
    "split",
    "url",
    "image_url",
    "ingredients",
];

pub const ROW_HEADERS: [&str; 10] = [
    "id",
    "source",
    "brand",
    "product_name",
    "form",
    "url",
    "image_url",
    "ingredients",
    "brand_slug",
    "product_key",
];

/// A catalog row with its canonical columns, in [`CANONICAL_HEADERS`] order.
#[derive(Debug, Serialize)]
struct CanonicalRecord<'a> {
    id: &'a str,
    source: Option<Source>,
    brand: &'a str,
    product_name: &'a str,
    form: Form,
    brand_slug: &'a str,
    name_slug: &'a str,
    product_key: String,
    brand_match: &'static str,
    split: Option<SplitKind>,
    url: Option<&'a str>,
    image_url: Option<&'a str>,
    ingredients: Option<&'a str>,
}

impl<'a> CanonicalRecord<'a> {
    fn new(row: &'a CatalogRow, product: &'a CanonicalProduct) -> Self {
        use crate::brands::MatchVia;
        Self {
            id: &row.id,
            source: row.source,
            brand: &product.brand,
            product_name: &product.name,
            form: product.form,
            brand_slug: &product.brand_slug,
            name_slug: &product.name_slug,
            product_key: product.product_key.to_string(),
            brand_match: match product.matched {
                Some(MatchVia::Exact) => "exact",
                Some(MatchVia::Fuzzy { .. }) => "fuzzy",
                None => "",
            },
            split: product.split,
            url: row.url.as_deref(),
            image_url: row.image_url.as_deref(),
            ingredients: row.ingredients.as_deref(),
        }
    }
}

/// A plain catalog row, in [`ROW_HEADERS`] order.
#[derive(Debug, Serialize)]
struct RowRecord<'a> {
    id: &'a str,
    source: Option<Source>,
    brand: &'a str,
    product_name: &'a str,
    form: Option<&'a str>,
    url: Option<&'a str>,
    image_url: Option<&'a str>,
    ingredients: Option<&'a str>,
    brand_slug: Option<&'a str>,
    product_key: Option<&'a str>,
}

impl<'a> From<&'a CatalogRow> for RowRecord<'a> {
    fn from(row: &'a CatalogRow) -> Self {
        Self {
            id: &row.id,
            source: row.source,
            brand: &row.brand,
            product_name: &row.product_name,
            form: row.form.as_deref(),
            url: row.url.as_deref(),
            image_url: row.image_url.as_deref(),
            ingredients: row.ingredients.as_deref(),
            brand_slug: row.brand_slug.as_deref(),
            product_key: row.product_key.as_deref(),
        }
    }
}

fn writer<W: Write>(out: W, headers: &[&str]) -> Result<csv::Writer<W>, csv::Error> {
    let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    w.write_record(headers)?;
    Ok(w)
}

/// Write canonicalized rows. Returns the number of records written.
pub fn write_canonical<'a, W, I>(out: W, records: I) -> Result<usize, csv::Error>
where
    W: Write,
    I: IntoIterator<Item = (&'a CatalogRow, &'a CanonicalProduct)>,
{
    let mut w = writer(out, &CANONICAL_HEADERS)?;
    let mut written = 0;
    for (row, product) in records {
        w.serialize(CanonicalRecord::new(row, product))?;
        written += 1;
    }
    w.flush()?;
    Ok(written)
}

/// Write plain catalog rows. Returns the number of records written.
pub fn write_rows<'a, W, I>(out: W, rows: I) -> Result<usize, csv::Error>
where
    W: Write,
    I: IntoIterator<Item = &'a CatalogRow>,
{
    let mut w = writer(out, &ROW_HEADERS)?;
    let mut written = 0;
    for row in rows {
        w.serialize(RowRecord::from(row))?;
        written += 1;
    }
    w.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brands::BrandMap;
    use crate::canonical::{CanonicalOptions, canonicalize};

    #[test]
    fn test_canonical_csv_columns() {
        let map = BrandMap::builtin().unwrap();
        let mut row = CatalogRow::new("zp-1", "Royal", "Canin Maxi Adult 15kg");
        row.source = Some(Source::Zooplus);
        row.url = Some("https://zooplus.example/1".to_string());
        let product = canonicalize(
            &row.brand,
            &row.product_name,
            Some("dry"),
            &map,
            &CanonicalOptions::default(),
        )
        .unwrap();

        let mut buf = Vec::new();
        let n = write_canonical(&mut buf, [(&row, &product)]).unwrap();
        assert_eq!(n, 1);

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), CANONICAL_HEADERS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "zp-1,zooplus,Royal Canin,Maxi Adult 15kg,dry,royal-canin,maxi-adult,\
             royal-canin|maxi-adult|dry,exact,truncated,https://zooplus.example/1,,"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_empty_output_still_has_headers() {
        let mut buf = Vec::new();
        let n = write_rows(&mut buf, std::iter::empty()).unwrap();
        assert_eq!(n, 0);
        assert_eq!(String::from_utf8(buf).unwrap(), format!("{}\n", ROW_HEADERS.join(",")));
    }

    #[test]
    fn test_rows_quote_commas() {
        let mut row = CatalogRow::new("1", "Burns", "Original Chicken, Brown Rice");
        row.brand_slug = Some("burns".to_string());
        let mut buf = Vec::new();
        write_rows(&mut buf, [&row]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"Original Chicken, Brown Rice\""));
        assert!(text.lines().nth(1).unwrap().ends_with(",burns,"));
    }
}
