//! Data models shared by the catalog jobs.
//!
//! - [`CatalogRow`]: one product row, as read from a source CSV or from the
//!   catalog REST API
//! - [`RowPatch`]: a partial update of the canonical columns of a row
//!
//! The REST API returns `id` as either an integer or a UUID string depending
//! on the table, so it is always carried as a string here.

use crate::sources::Source;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single catalog product row.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct CatalogRow {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_source",
        skip_serializing_if = "Option::is_none"
    )]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_key: Option<String>,
}

impl CatalogRow {
    pub fn new(id: &str, brand: &str, product_name: &str) -> Self {
        Self {
            id: id.to_string(),
            brand: brand.to_string(),
            product_name: product_name.to_string(),
            ..Default::default()
        }
    }

    /// How many optional descriptive fields carry a non-blank value.
    ///
    /// Used to pick the most complete row when duplicates collapse.
    pub fn populated_fields(&self) -> usize {
        [&self.form, &self.url, &self.image_url, &self.ingredients]
            .into_iter()
            .filter(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
            .count()
    }
}

/// Partial update of the canonical columns of a catalog row.
///
/// Absent fields are left untouched by the REST API, so they are never
/// serialized.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct RowPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_key: Option<String>,
}

impl RowPatch {
    pub fn is_empty(&self) -> bool {
        self.brand.is_none()
            && self.product_name.is_none()
            && self.brand_slug.is_none()
            && self.product_key.is_none()
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or integer id, got {other}"
        ))),
    }
}

/// Unknown or missing source labels deserialize to `None` instead of failing
/// the whole page.
fn lenient_source<'de, D>(deserializer: D) -> Result<Option<Source>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accepts_integer_and_string_ids() {
        let row: CatalogRow =
            serde_json::from_str(r#"{"id": 42, "brand": "Acana", "product_name": "Wild Prairie"}"#)
                .unwrap();
        assert_eq!(row.id, "42");

        let row: CatalogRow = serde_json::from_str(
            r#"{"id": "5f0c-uuid", "brand": "Acana", "product_name": "Wild Prairie"}"#,
        )
        .unwrap();
        assert_eq!(row.id, "5f0c-uuid");

        let err = serde_json::from_str::<CatalogRow>(r#"{"id": [1], "brand": "x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_row_tolerates_nulls_and_unknown_sources() {
        let row: CatalogRow = serde_json::from_str(
            r#"{"id": 1, "brand": "Acana", "product_name": "Classics", "form": null,
                "source": "petsathome", "extra_column": true}"#,
        )
        .unwrap();
        assert_eq!(row.form, None);
        assert_eq!(row.source, None);

        let row: CatalogRow =
            serde_json::from_str(r#"{"id": 1, "brand": "Acana", "source": "zooplus"}"#).unwrap();
        assert_eq!(row.source, Some(Source::Zooplus));
        assert_eq!(row.product_name, "");
    }

    #[test]
    fn test_populated_fields_ignores_blanks() {
        let mut row = CatalogRow::new("1", "Acana", "Classics");
        assert_eq!(row.populated_fields(), 0);
        row.url = Some("https://example.com".to_string());
        row.form = Some("  ".to_string());
        row.ingredients = Some("Chicken".to_string());
        assert_eq!(row.populated_fields(), 2);
    }

    #[test]
    fn test_row_patch_skips_absent_fields() {
        let patch = RowPatch {
            brand: Some("Royal Canin".to_string()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        assert_eq!(
            serde_json::to_string(&patch).unwrap(),
            r#"{"brand":"Royal Canin"}"#
        );
        assert!(RowPatch::default().is_empty());
    }
}
