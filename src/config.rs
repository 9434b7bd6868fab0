use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::identifier::{DEFAULT_BASE_URL, DEFAULT_HANDLE_PREFIX};

pub const DEFAULT_CONFIG_FILE: &str = "agrovoc-index.json";
pub const DEFAULT_INPUT: &str = "resultAgrovoc_filled_20181108.xlsx";
pub const DEFAULT_EXPORT_DIR: &str = "export";
pub const DEFAULT_ERROR_LOG: &str = "curl.log";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub handle_prefix: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub export_dir: Option<String>,
    #[serde(default)]
    pub error_log: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub handle_prefix: String,
    pub input: Utf8PathBuf,
    pub export_dir: Utf8PathBuf,
    pub error_log: Utf8PathBuf,
    pub timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file. The default file is optional; an explicitly
    /// named one must exist.
    pub fn resolve(path: Option<&str>) -> Result<Settings, IndexError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IndexError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| IndexError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> Settings {
        Settings {
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            handle_prefix: config
                .handle_prefix
                .unwrap_or_else(|| DEFAULT_HANDLE_PREFIX.to_string()),
            input: Utf8PathBuf::from(config.input.unwrap_or_else(|| DEFAULT_INPUT.to_string())),
            export_dir: Utf8PathBuf::from(
                config
                    .export_dir
                    .unwrap_or_else(|| DEFAULT_EXPORT_DIR.to_string()),
            ),
            error_log: Utf8PathBuf::from(
                config
                    .error_log
                    .unwrap_or_else(|| DEFAULT_ERROR_LOG.to_string()),
            ),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        }
    }
}
