//! Application configuration.
//!
//! Everything can be set on [`App`](crate::App) directly; a `lithe.toml`
//! read with [`AppConfig::from_file`] is the file-based equivalent:
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 8080
//! routes_root = "api"
//!
//! [cors]
//! origins = ["https://app.example.com"]
//! methods = ["GET", "POST"]
//! max_age = 600
//! ```
//!
//! `cors = true` enables the permissive policy, `cors = false` (the default)
//! disables CORS entirely.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 6969;

/// Environment variable selecting the runtime [`Environment`].
pub const ENV_VAR: &str = "LITHE_ENV";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Development enables the hot-reload watcher; production does not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Reads [`ENV_VAR`]. `production` (any case) selects production,
    /// anything else, including an unset variable, is development.
    pub fn from_env() -> Self {
        env::var(ENV_VAR)
            .map(|v| Self::from_name(&v))
            .unwrap_or_default()
    }

    fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Explicit CORS settings. Unset fields take the permissive defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsOptions {
    pub origins: Option<Vec<String>>,
    pub methods: Option<Vec<String>>,
    pub headers: Option<Vec<String>>,
    pub max_age: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "CorsSetting")]
pub enum CorsPolicy {
    #[default]
    Disabled,
    Permissive,
    Custom(CorsOptions),
}

// On-disk shape of `cors`: a flag or a table.
#[derive(Deserialize)]
#[serde(untagged)]
enum CorsSetting {
    Flag(bool),
    Options(CorsOptions),
}

impl From<CorsSetting> for CorsPolicy {
    fn from(setting: CorsSetting) -> Self {
        match setting {
            CorsSetting::Flag(true) => CorsPolicy::Permissive,
            CorsSetting::Flag(false) => CorsPolicy::Disabled,
            CorsSetting::Options(options) => CorsPolicy::Custom(options),
        }
    }
}

impl From<bool> for CorsPolicy {
    fn from(enabled: bool) -> Self {
        CorsSetting::Flag(enabled).into()
    }
}

impl From<CorsOptions> for CorsPolicy {
    fn from(options: CorsOptions) -> Self {
        CorsPolicy::Custom(options)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub host: String,
    pub port: Option<u16>,
    pub cors: CorsPolicy,
    pub routes_root: PathBuf,
    pub environment: Environment,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: None,
            cors: CorsPolicy::Disabled,
            routes_root: PathBuf::from("api"),
            environment: Environment::from_env(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// The configured port, or [`DEFAULT_PORT`].
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// `host:port` to bind.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port())
    }
}
