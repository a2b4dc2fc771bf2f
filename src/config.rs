//! Runtime configuration.
//!
//! Layers, lowest first: built-in defaults, an optional `nutrisync.toml`,
//! environment variables, command-line flags. The last two arrive together
//! through clap and are passed in as `Overrides`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

use crate::api::{resolve_api_base, DEFAULT_API_PORT};
use crate::filter::SearchScope;
use crate::format::DisplayLocale;

pub const DEFAULT_CONFIG_FILE: &str = "nutrisync.toml";
pub const DEFAULT_LOCALE: &str = "id-ID";
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Schema of `nutrisync.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api_base_url: Option<String>,
    pub web_origin: Option<String>,
    pub api_port: Option<u16>,
    pub locale: Option<String>,
    pub debounce_ms: Option<u64>,
    pub search_scope: Option<SearchScope>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// An explicitly named file must exist. Without one, `nutrisync.toml` in
    /// the working directory is used when present.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            info!(path = %path.display(), "loaded config");
            return Ok(config);
        }

        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            let config = Self::load(&default_path)?;
            info!(path = %default_path.display(), "loaded config");
            return Ok(config);
        }

        debug!("no config file, using defaults");
        Ok(Self::default())
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_base_url: Option<String>,
    pub web_origin: Option<String>,
    pub locale: Option<String>,
    pub search_scope: Option<SearchScope>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_base: String,
    pub locale: DisplayLocale,
    pub debounce: Duration,
    pub search_scope: SearchScope,
    pub request_timeout: Option<Duration>,
}

impl Settings {
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Self {
        let explicit_base = overrides.api_base_url.or(file.api_base_url);
        let web_origin = overrides.web_origin.or(file.web_origin);
        let api_base = resolve_api_base(
            explicit_base.as_deref(),
            web_origin.as_deref(),
            file.api_port.unwrap_or(DEFAULT_API_PORT),
        );

        let locale_tag = overrides
            .locale
            .or(file.locale)
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());

        Self {
            api_base,
            locale: DisplayLocale::from_tag(&locale_tag),
            debounce: Duration::from_millis(file.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
            search_scope: overrides
                .search_scope
                .or(file.search_scope)
                .unwrap_or_default(),
            request_timeout: file.request_timeout_secs.map(Duration::from_secs),
        }
    }
}
