//! Client configuration
//!
//! Loaded from `~/.storymap/config.toml` (or an explicit path) with
//! environment overrides for credentials. Every field has a default so a
//! partial file is valid.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::tree::{FieldMapping, IdFormat};

pub const DEFAULT_BASE_URL: &str = "https://open.larksuite.com/open-apis";

/// Largest page the list-records endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 500;

/// Upper bound for either retry delay
pub const MAX_RETRY_DELAY_SECS: f64 = 3600.0;

/// Upper bound for `requests_per_minute`
pub const MAX_REQUESTS_PER_MINUTE: usize = 60_000;

const ENV_APP_ID: &str = "STORYMAP_APP_ID";
const ENV_APP_SECRET: &str = "STORYMAP_APP_SECRET";
const ENV_BASE_URL: &str = "STORYMAP_BASE_URL";

/// How continuation tokens relate to page position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTokenMode {
    /// Tokens are opaque cursors; page N+1 needs page N's token
    #[default]
    Opaque,
    /// Tokens are record offsets, so any page can be requested independently
    Offset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub app_id: String,
    #[serde(skip_serializing)]
    pub app_secret: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_secs: f64,
    pub retry_max_delay_secs: f64,
    pub auth_retries: u32,
    pub token_refresh_buffer_secs: u64,
    pub rate_limit_enabled: bool,
    pub requests_per_minute: usize,
    pub max_page_size: u32,
    pub pagination_workers: usize,
    pub concurrent_pagination: bool,
    pub page_token_mode: PageTokenMode,
    pub batch: BatchConfig,
    pub tree: TreeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_secs: 1.0,
            retry_max_delay_secs: 60.0,
            auth_retries: 3,
            token_refresh_buffer_secs: 300,
            rate_limit_enabled: true,
            requests_per_minute: 100,
            max_page_size: MAX_PAGE_SIZE,
            pagination_workers: 4,
            concurrent_pagination: false,
            page_token_mode: PageTokenMode::Opaque,
            batch: BatchConfig::default(),
            tree: TreeConfig::default(),
        }
    }
}

/// Sizing limits for bulk writes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_payload_bytes: usize,
    pub sample_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            max_payload_bytes: 1_000_000,
            sample_size: 20,
        }
    }
}

/// Which identifier format the tree builder accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdFormatKind {
    #[default]
    Any,
    PrefixNumeric,
    Regex,
}

/// Field mapping for a source schema, as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub id_field: String,
    pub parent_fields: Vec<String>,
    pub payload_fields: Vec<String>,
    pub label_field: Option<String>,
    pub id_format: IdFormatKind,
    pub id_prefix: Option<String>,
    pub id_pattern: Option<String>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        let mapping = FieldMapping::default();
        Self {
            id_field: mapping.id_field,
            parent_fields: mapping.parent_fields,
            payload_fields: mapping.payload_fields,
            label_field: mapping.label_field,
            id_format: IdFormatKind::Any,
            id_prefix: None,
            id_pattern: None,
        }
    }
}

impl TreeConfig {
    /// Resolve into the mapping the tree builder consumes
    pub fn field_mapping(&self) -> Result<FieldMapping> {
        let id_format = match self.id_format {
            IdFormatKind::Any => IdFormat::Any,
            IdFormatKind::PrefixNumeric => {
                let prefix = self
                    .id_prefix
                    .clone()
                    .context("tree.id_prefix is required when id_format = \"prefix_numeric\"")?;
                IdFormat::PrefixNumeric { prefix }
            }
            IdFormatKind::Regex => {
                let pattern = self
                    .id_pattern
                    .as_deref()
                    .context("tree.id_pattern is required when id_format = \"regex\"")?;
                IdFormat::pattern(pattern)
                    .with_context(|| format!("invalid tree.id_pattern: {pattern}"))?
            }
        };

        Ok(FieldMapping {
            id_field: self.id_field.clone(),
            parent_fields: self.parent_fields.clone(),
            payload_fields: self.payload_fields.clone(),
            label_field: self.label_field.clone(),
            id_format,
        })
    }
}

impl ClientConfig {
    /// Default config file location (`~/.storymap/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".storymap").join("config.toml"))
    }

    /// Load from an explicit path, the default location, or fall back to defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(app_id) = std::env::var(ENV_APP_ID) {
            self.app_id = app_id;
        }
        if let Ok(secret) = std::env::var(ENV_APP_SECRET) {
            self.app_secret = secret;
        }
        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            self.base_url = base_url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_enabled
            && !(1..=MAX_REQUESTS_PER_MINUTE).contains(&self.requests_per_minute)
        {
            bail!("requests_per_minute must be between 1 and {MAX_REQUESTS_PER_MINUTE}");
        }
        if self.pagination_workers == 0 {
            bail!("pagination_workers must be greater than zero");
        }
        if self.max_page_size == 0 || self.max_page_size > MAX_PAGE_SIZE {
            bail!("max_page_size must be between 1 and {MAX_PAGE_SIZE}");
        }
        for (name, value) in [
            ("retry_base_delay_secs", self.retry_base_delay_secs),
            ("retry_max_delay_secs", self.retry_max_delay_secs),
        ] {
            if !(0.0..=MAX_RETRY_DELAY_SECS).contains(&value) {
                bail!("{name} must be a number of seconds between 0 and {MAX_RETRY_DELAY_SECS}");
            }
        }
        if self.retry_base_delay_secs > self.retry_max_delay_secs {
            bail!("retry_base_delay_secs must not exceed retry_max_delay_secs");
        }
        if self.batch.max_batch_size == 0 {
            bail!("batch.max_batch_size must be greater than zero");
        }
        Ok(())
    }

    /// Credentials are only needed for commands that talk to the API
    pub fn require_credentials(&self) -> Result<()> {
        if self.app_id.is_empty() || self.app_secret.is_empty() {
            bail!(
                "app_id and app_secret must be set in the config file or via {ENV_APP_ID}/{ENV_APP_SECRET}"
            );
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.token_refresh_buffer_secs)
    }

    pub fn base_delay(&self) -> Duration {
        delay_secs(self.retry_base_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        delay_secs(self.retry_max_delay_secs)
    }
}

/// Out-of-range values clamp instead of panicking; `validate` reports them
fn delay_secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.min(MAX_RETRY_DELAY_SECS)).unwrap_or(Duration::ZERO)
}
