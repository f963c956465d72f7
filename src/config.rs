//! Runtime settings.
//!
//! Settings are layered, each layer overriding the one before:
//!
//! 1. built-in defaults
//! 2. an optional YAML file given with `--config`
//! 3. command-line flags (and their `CATALOG_*` environment fallbacks)
//!
//! ```yaml
//! rest_url: https://abc.supabase.co
//! table: products
//! page_size: 1000
//! concurrency: 8
//! fuzzy_threshold: 0.92
//! brand_map: data/extra_brands.yaml
//! rollback_dir: rollbacks
//! ```
//!
//! The API key is never read from the file.

use crate::cli::GlobalArgs;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_TABLE: &str = "products";
pub const DEFAULT_PAGE_SIZE: usize = 1000;
/// Server-side row cap of a PostgREST response (`max-rows`). A larger page
/// would come back short and end paging early.
pub const MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_ROLLBACK_DIR: &str = "rollbacks";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("fuzzy_threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("page_size must be at most {}, got {}", MAX_PAGE_SIZE, .0)]
    PageTooLarge(usize),
    #[error("missing {0}; set it in the config file, on the command line, or in the environment")]
    Missing(&'static str),
}

/// Contents of the YAML config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub rest_url: Option<String>,
    pub table: Option<String>,
    pub page_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub fuzzy_threshold: Option<f64>,
    pub brand_map: Option<PathBuf>,
    pub rollback_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is a valid, empty config.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }
}

/// Fully resolved settings for one run.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub rest_url: Option<String>,
    pub api_key: Option<String>,
    pub table: String,
    pub page_size: usize,
    pub concurrency: usize,
    pub fuzzy_threshold: Option<f64>,
    pub brand_map: Option<PathBuf>,
    pub rollback_dir: PathBuf,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("rest_url", &self.rest_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("table", &self.table)
            .field("page_size", &self.page_size)
            .field("concurrency", &self.concurrency)
            .field("fuzzy_threshold", &self.fuzzy_threshold)
            .field("brand_map", &self.brand_map)
            .field("rollback_dir", &self.rollback_dir)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rest_url: None,
            api_key: None,
            table: DEFAULT_TABLE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            fuzzy_threshold: None,
            brand_map: None,
            rollback_dir: PathBuf::from(DEFAULT_ROLLBACK_DIR),
        }
    }
}

impl Settings {
    /// Read the config file named by `args` (if any) and layer `args` on top.
    pub fn resolve(args: &GlobalArgs) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => {
                let file = FileConfig::load_from_path(path)?;
                info!(path = %path.display(), "Loaded config file");
                file
            }
            None => FileConfig::default(),
        };
        Self::layered(file, args)
    }

    /// Combine defaults, `file` and `args`, then validate.
    pub fn layered(file: FileConfig, args: &GlobalArgs) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let settings = Settings {
            rest_url: args.rest_url.clone().or(file.rest_url),
            api_key: args.api_key.clone(),
            table: args.table.clone().or(file.table).unwrap_or(defaults.table),
            page_size: file.page_size.unwrap_or(defaults.page_size),
            concurrency: file.concurrency.unwrap_or(defaults.concurrency),
            fuzzy_threshold: args.fuzzy_threshold.or(file.fuzzy_threshold),
            brand_map: args.brand_map.clone().or(file.brand_map),
            rollback_dir: file.rollback_dir.unwrap_or(defaults.rollback_dir),
        };
        settings.validate()?;
        debug!(?settings, "Resolved settings");
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.fuzzy_threshold {
            if !(t > 0.0 && t <= 1.0) {
                return Err(ConfigError::InvalidThreshold(t));
            }
        }
        if self.page_size == 0 {
            return Err(ConfigError::Zero("page_size"));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::PageTooLarge(self.page_size));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Zero("concurrency"));
        }
        if self.table.trim().is_empty() {
            return Err(ConfigError::Missing("table"));
        }
        Ok(())
    }

    /// REST URL and API key, required by jobs that talk to the catalog.
    pub fn remote(&self) -> Result<(&str, &str), ConfigError> {
        let url = self
            .rest_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::Missing("rest_url (CATALOG_REST_URL)"))?;
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("api key (CATALOG_API_KEY)"))?;
        Ok((url, key))
    }
}
