//! Application configuration for PriceWatch.
//!
//! User config lives at `~/.pricewatch/pricewatch.toml`.
//! Environment variables override config file values, CLI flags override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PriceWatchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pricewatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pricewatch";

/// Environment variable overriding `[database] path`.
const DB_PATH_ENV: &str = "PRICEWATCH_DB";

/// Environment variable overriding `[server] port`.
const PORT_ENV: &str = "PORT";

// ---------------------------------------------------------------------------
// Config structs (matching pricewatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Web API settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Outbound page fetch policy.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Scheduled refresh settings.
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. A leading `~/` is expanded.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// The database path with `~/` expanded to the home directory.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

fn default_db_path() -> String {
    "~/.pricewatch/pricewatch.db".into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Rows returned by the product list when the client sends no length.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Price history points returned when the client sends no limit.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            page_size: default_page_size(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}
fn default_page_size() -> u32 {
    10
}
fn default_history_limit() -> u32 {
    30
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Total time allowed for one page fetch, body included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Time allowed to establish the TCP/TLS connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum redirects followed per fetch.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Pages larger than this are rejected.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Permit loopback/private targets (local testing only).
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Override the default User-Agent header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_redirects: default_max_redirects(),
            max_body_bytes: default_max_body_bytes(),
            allow_private_hosts: false,
            user_agent: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    20
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_max_redirects() -> usize {
    5
}
fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

/// `[refresh]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Keep refreshing the rest of a batch when one product fails.
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            continue_on_error: true,
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Fetch options (runtime, derived from config)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration consumed by the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
    pub allow_private_hosts: bool,
    pub user_agent: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            connect_timeout: Duration::from_secs(config.fetch.connect_timeout_secs),
            max_redirects: config.fetch.max_redirects,
            max_body_bytes: config.fetch.max_body_bytes,
            allow_private_hosts: config.fetch.allow_private_hosts,
            user_agent: config.fetch.user_agent.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pricewatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PriceWatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pricewatch/pricewatch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk and apply environment overrides.
/// Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PriceWatchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PriceWatchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Apply `PRICEWATCH_DB` and `PORT` overrides using `lookup` to read variables.
pub fn apply_env_overrides(
    config: &mut AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(path) = lookup(DB_PATH_ENV).filter(|v| !v.is_empty()) {
        config.database.path = path;
    }

    if let Some(port) = lookup(PORT_ENV).filter(|v| !v.is_empty()) {
        config.server.port = port
            .parse()
            .map_err(|e| PriceWatchError::config(format!("invalid {PORT_ENV} '{port}': {e}")))?;
    }

    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PriceWatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PriceWatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PriceWatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| PriceWatchError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("pricewatch.db"));
        assert!(toml_str.contains("interval_secs"));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let toml_str = r#"
[server]
port = 9000

[fetch]
timeout_secs = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.page_size, 10);
        assert_eq!(config.fetch.timeout_secs, 5);
        assert_eq!(config.fetch.max_redirects, 5);
        assert!(config.refresh.continue_on_error);
    }

    #[test]
    fn fetch_options_from_app_config() {
        let mut app = AppConfig::default();
        app.fetch.timeout_secs = 7;
        let opts = FetchOptions::from(&app);
        assert_eq!(opts.timeout, Duration::from_secs(7));
        assert_eq!(opts.connect_timeout, Duration::from_secs(10));
        assert!(!opts.allow_private_hosts);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            "PRICEWATCH_DB" => Some("/tmp/pw.db".into()),
            "PORT" => Some("3000".into()),
            _ => None,
        })
        .expect("apply overrides");
        assert_eq!(config.database.path, "/tmp/pw.db");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn invalid_port_override_is_rejected() {
        let mut config = AppConfig::default();
        let result = apply_env_overrides(&mut config, |key| {
            (key == "PORT").then(|| "eighty".to_string())
        });
        assert!(result.unwrap_err().to_string().contains("invalid PORT"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home("/var/lib/pw.db").unwrap(),
            PathBuf::from("/var/lib/pw.db")
        );
        let expanded = expand_home("~/pw.db").unwrap();
        assert!(expanded.ends_with("pw.db"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
