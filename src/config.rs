//! Runtime settings loaded from an optional YAML file.
//!
//! Every key has a default, so running without a settings file targets the
//! public upstream endpoints and keeps the snapshot and rendered tables in the
//! working directory.
//!
//! ```yaml
//! interval_hours: 24
//! table_class: "table"
//! discord:
//!   channel_id: "123456789012345678"
//!   token_file: variant_token.txt
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

pub const DEFAULT_CONFIG_URL: &str =
    "https://mendel3.bii.a-star.edu.sg/METHODS/corona/gamma/MUTATIONS/data/config.json";
pub const DEFAULT_COUNTRY_COUNT_URL: &str =
    "https://mendel3.bii.a-star.edu.sg/METHODS/corona/gamma/MUTATIONS/data/countryCount_{code}.json";
pub const DEFAULT_VARIANTS_PAGE_URL: &str = "https://www.ecdc.europa.eu/en/covid-19/variants-concern";
pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Placeholder substituted with a variant code in [`Settings::country_count_url`].
pub const CODE_PLACEHOLDER: &str = "{code}";

/// Largest window the channel history endpoint returns in one page.
pub const MAX_PURGE_WINDOW: usize = 100;

/// Longest accepted scheduler period, one year.
pub const MAX_INTERVAL_HOURS: u64 = 24 * 365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("bot token file {path} could not be read: {source}")]
    TokenUnreadable {
        path: String,
        source: std::io::Error,
    },
    #[error("bot token file {path} is empty")]
    TokenEmpty { path: String },
    #[error("no discord channel_id configured")]
    MissingChannel,
}

/// External renderer used to turn HTML fragments into PNG files.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererSettings {
    pub program: String,
    /// Extra arguments placed before the input/output paths.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            program: "wkhtmltoimage".to_string(),
            args: vec!["--quiet".to_string(), "--width".to_string(), "1200".to_string()],
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscordSettings {
    pub channel_id: Option<String>,
    pub token_file: PathBuf,
    pub api_base: String,
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            channel_id: None,
            token_file: PathBuf::from("variant_token.txt"),
            api_base: DEFAULT_DISCORD_API_BASE.to_string(),
        }
    }
}

/// All runtime settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// JSON config listing the tracked variants.
    pub config_url: String,
    /// Per-variant country count endpoint; must contain `{code}`.
    pub country_count_url: String,
    /// Agency page holding the variant classification tables.
    pub variants_page_url: String,
    /// Substring a table's `class` attribute must contain to be extracted.
    pub table_class: String,
    pub snapshot_path: PathBuf,
    pub image_dir: PathBuf,
    pub crop_images: bool,
    pub interval_hours: u64,
    /// How many recent channel messages are removed before republishing.
    pub purge_window: usize,
    /// Per-request timeout; `None` leaves the transport default in place.
    pub request_timeout_secs: Option<u64>,
    pub renderer: RendererSettings,
    pub discord: DiscordSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_url: DEFAULT_CONFIG_URL.to_string(),
            country_count_url: DEFAULT_COUNTRY_COUNT_URL.to_string(),
            variants_page_url: DEFAULT_VARIANTS_PAGE_URL.to_string(),
            table_class: "table".to_string(),
            snapshot_path: PathBuf::from("variant_snapshot.json"),
            image_dir: PathBuf::from("tables"),
            crop_images: true,
            interval_hours: 24,
            purge_window: MAX_PURGE_WINDOW,
            request_timeout_secs: None,
            renderer: RendererSettings::default(),
            discord: DiscordSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or return the defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => {
                let path_str = path.display().to_string();
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path_str.clone(),
                    source,
                })?;
                let settings = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
                    path: path_str.clone(),
                    source,
                })?;
                info!(path = %path_str, "Loaded settings file");
                settings
            }
            None => {
                info!("No settings file given; using defaults");
                Self::default()
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("config_url", &self.config_url),
            ("variants_page_url", &self.variants_page_url),
            ("discord.api_base", &self.discord.api_base),
        ] {
            Url::parse(value).map_err(|e| ConfigError::Invalid {
                field,
                reason: e.to_string(),
            })?;
        }

        if !self.country_count_url.contains(CODE_PLACEHOLDER) {
            return Err(ConfigError::Invalid {
                field: "country_count_url",
                reason: format!("must contain `{CODE_PLACEHOLDER}`"),
            });
        }
        Url::parse(&self.country_count_url.replace(CODE_PLACEHOLDER, "x")).map_err(|e| {
            ConfigError::Invalid {
                field: "country_count_url",
                reason: e.to_string(),
            }
        })?;

        if self.interval_hours == 0 || self.interval_hours > MAX_INTERVAL_HOURS {
            return Err(ConfigError::Invalid {
                field: "interval_hours",
                reason: format!("must be between 1 and {MAX_INTERVAL_HOURS}"),
            });
        }
        if self.purge_window == 0 || self.purge_window > MAX_PURGE_WINDOW {
            return Err(ConfigError::Invalid {
                field: "purge_window",
                reason: format!("must be between 1 and {MAX_PURGE_WINDOW}"),
            });
        }
        if self.table_class.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "table_class",
                reason: "must not be empty".to_string(),
            });
        }
        if self.renderer.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "renderer.program",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Scheduler period. Saturates rather than overflowing on unvalidated settings.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    pub fn channel_id(&self) -> Result<&str, ConfigError> {
        self.discord
            .channel_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingChannel)
    }
}

/// Read the bot token. A missing or blank file is fatal.
pub fn load_token(path: &Path) -> Result<String, ConfigError> {
    let path_str = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::TokenUnreadable {
        path: path_str.clone(),
        source,
    })?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(ConfigError::TokenEmpty { path: path_str });
    }
    Ok(token.to_string())
}
