use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawApi, RawConfig};

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "terrarium.yaml";

const DEFAULT_LKVSTORE_PATH: &str = ".lkvstore/lkvstore.db";
const DEFAULT_TOFU_BINARY: &str = "tofu";
const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8055;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind: String,
    pub port: u16,
    /// Bearer token required on API requests. `None` disables auth.
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerrariumConfig {
    /// Directory under which terrarium workspaces and the snapshot live.
    pub root: PathBuf,
    /// Snapshot file of the key-value store, relative to `root` unless absolute.
    pub lkvstore_path: PathBuf,
    pub tofu_binary: String,
    pub log_level: String,
    pub api: ApiConfig,
}

impl Default for TerrariumConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            lkvstore_path: PathBuf::from(DEFAULT_LKVSTORE_PATH),
            tofu_binary: DEFAULT_TOFU_BINARY.into(),
            log_level: DEFAULT_LOG_LEVEL.into(),
            api: ApiConfig {
                bind: DEFAULT_BIND.into(),
                port: DEFAULT_PORT,
                auth_token: None,
            },
        }
    }
}

impl TerrariumConfig {
    /// Absolute-or-root-relative location of the key-value snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(&self.lkvstore_path)
    }
}

/// Load configuration from `path`.
///
/// With `path == None` the default file in the working directory is used if it
/// exists; otherwise built-in defaults are returned. An explicitly named file
/// that does not exist is an error.
pub fn load_config(path: Option<&Path>) -> Result<TerrariumConfig, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    if !required && !path.exists() {
        debug!("no {} found; using default settings", DEFAULT_CONFIG_FILE);
        return Ok(TerrariumConfig::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawConfig = if content.trim().is_empty() {
        RawConfig::default()
    } else {
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })?
    };

    debug!("loaded configuration from {}", path.display());
    convert(raw, &path)
}

fn convert(raw: RawConfig, path: &Path) -> Result<TerrariumConfig, ConfigError> {
    let defaults = TerrariumConfig::default();

    let tofu_binary = raw.tofu_binary.unwrap_or(defaults.tofu_binary);
    if tofu_binary.trim().is_empty() {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            message: "tofu_binary must not be empty".into(),
        });
    }

    let api = convert_api(raw.api.unwrap_or_default(), defaults.api, path)?;

    Ok(TerrariumConfig {
        root: raw.root.map(PathBuf::from).unwrap_or(defaults.root),
        lkvstore_path: raw
            .lkvstore_path
            .map(PathBuf::from)
            .unwrap_or(defaults.lkvstore_path),
        tofu_binary,
        log_level: raw.log_level.unwrap_or(defaults.log_level),
        api,
    })
}

fn convert_api(raw: RawApi, defaults: ApiConfig, path: &Path) -> Result<ApiConfig, ConfigError> {
    let port = raw.port.unwrap_or(defaults.port);
    if port == 0 {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            message: "api.port must be between 1 and 65535".into(),
        });
    }
    Ok(ApiConfig {
        bind: raw.bind.unwrap_or(defaults.bind),
        port,
        auth_token: raw.auth_token.filter(|t| !t.is_empty()),
    })
}
