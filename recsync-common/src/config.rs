//! Configuration loading
//!
//! Every value resolves in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: defaults apply and the caller logs it.
//! A TOML file that exists but does not parse is an error.

use crate::record::SchemaVersion;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "RECSYNC_CONFIG";
pub const ENV_HOST: &str = "RECSYNC_HOST";
pub const ENV_PORT: &str = "RECSYNC_PORT";
pub const ENV_LOG_LEVEL: &str = "RECSYNC_LOG_LEVEL";
pub const ENV_SOURCE_MODE: &str = "RECSYNC_SOURCE_MODE";
pub const ENV_DATABASE: &str = "RECSYNC_DATABASE";
pub const ENV_SCHEMA: &str = "RECSYNC_SCHEMA";
pub const ENV_REMOTE_TABLE: &str = "RECSYNC_REMOTE_TABLE";
pub const ENV_REMOTE_MODE: &str = "RECSYNC_REMOTE_MODE";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow any origin, method and header
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Where the latest raw result comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Newest row of a local SQLite table
    #[default]
    LatestRow,
    /// On-demand run of an external producer program
    Producer,
}

impl FromStr for SourceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest_row" | "latest-row" => Ok(SourceMode::LatestRow),
            "producer" => Ok(SourceMode::Producer),
            other => Err(Error::Config(format!(
                "Unknown source mode '{}' (expected latest_row or producer)",
                other
            ))),
        }
    }
}

/// Source reader settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub mode: SourceMode,
    /// Local SQLite file (latest_row mode)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Local table holding producer output
    #[serde(default = "default_source_table")]
    pub table: String,
    /// Monotonic insertion-order column
    #[serde(default = "default_order_column")]
    pub order_column: String,
    /// Producer program (producer mode)
    #[serde(default)]
    pub producer_command: Option<String>,
    #[serde(default)]
    pub producer_args: Vec<String>,
    #[serde(default = "default_source_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::default(),
            database_path: None,
            table: default_source_table(),
            order_column: default_order_column(),
            producer_command: None,
            producer_args: Vec::new(),
            timeout_ms: default_source_timeout_ms(),
        }
    }
}

impl SourceConfig {
    /// Configured database path, or the OS-dependent default
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Active canonical schema
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub version: SchemaVersion,
}

/// How rows land in the remote table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// New row on every run, identical records included
    #[default]
    Append,
    /// Merge on `user_id` conflict
    UpsertByUser,
}

impl FromStr for PersistMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(PersistMode::Append),
            "upsert_by_user" | "upsert" => Ok(PersistMode::UpsertByUser),
            other => Err(Error::Config(format!(
                "Unknown remote mode '{}' (expected append or upsert_by_user)",
                other
            ))),
        }
    }
}

/// Remote store (Supabase REST) settings
#[derive(Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub service_role_key: Option<String>,
    #[serde(default = "default_remote_table")]
    pub table: String,
    #[serde(default)]
    pub mode: PersistMode,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_role_key: None,
            table: default_remote_table(),
            mode: PersistMode::default(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

// Key is a secret; never print it.
impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field(
                "service_role_key",
                &self.service_role_key.as_ref().map(|_| "<redacted>"),
            )
            .field("table", &self.table)
            .field("mode", &self.mode)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Values supplied from the command line or the environment
///
/// `None` means "not supplied at this tier". No `Debug`: it may hold the key.
#[derive(Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub source_mode: Option<SourceMode>,
    pub database_path: Option<PathBuf>,
    pub schema: Option<SchemaVersion>,
    pub remote_url: Option<String>,
    pub remote_key: Option<String>,
    pub remote_table: Option<String>,
    pub remote_mode: Option<PersistMode>,
}

impl Overrides {
    /// Read overrides from the process environment
    ///
    /// Unparseable values are errors rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env_string(ENV_HOST),
            port: env_parse(ENV_PORT, |s| {
                s.parse::<u16>()
                    .map_err(|e| Error::Config(format!("{}: {}", ENV_PORT, e)))
            })?,
            log_level: env_string(ENV_LOG_LEVEL),
            source_mode: env_parse(ENV_SOURCE_MODE, SourceMode::from_str)?,
            database_path: env_string(ENV_DATABASE).map(PathBuf::from),
            schema: env_parse(ENV_SCHEMA, SchemaVersion::from_str)?,
            remote_url: env_string(ENV_SUPABASE_URL),
            remote_key: env_string(ENV_SUPABASE_KEY),
            remote_table: env_string(ENV_REMOTE_TABLE),
            remote_mode: env_parse(ENV_REMOTE_MODE, PersistMode::from_str)?,
        })
    }

    /// Fill gaps in `self` from a lower-priority tier
    pub fn or(self, lower: Overrides) -> Overrides {
        Overrides {
            host: self.host.or(lower.host),
            port: self.port.or(lower.port),
            log_level: self.log_level.or(lower.log_level),
            source_mode: self.source_mode.or(lower.source_mode),
            database_path: self.database_path.or(lower.database_path),
            schema: self.schema.or(lower.schema),
            remote_url: self.remote_url.or(lower.remote_url),
            remote_key: self.remote_key.or(lower.remote_key),
            remote_table: self.remote_table.or(lower.remote_table),
            remote_mode: self.remote_mode.or(lower.remote_mode),
        }
    }
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Load from an explicit path, or the platform default location
    ///
    /// Returns the config and the file it came from. An explicit path must
    /// exist. When no explicit path is given and no default file exists,
    /// built-in defaults are returned with `None`.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        match default_config_path() {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Apply higher-priority overrides on top of file values
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(mode) = overrides.source_mode {
            self.source.mode = mode;
        }
        if let Some(path) = overrides.database_path {
            self.source.database_path = Some(path);
        }
        if let Some(version) = overrides.schema {
            self.schema.version = version;
        }
        if let Some(url) = overrides.remote_url {
            self.remote.url = Some(url);
        }
        if let Some(key) = overrides.remote_key {
            self.remote.service_role_key = Some(key);
        }
        if let Some(table) = overrides.remote_table {
            self.remote.table = table;
        }
        if let Some(mode) = overrides.remote_mode {
            self.remote.mode = mode;
        }
        self
    }

    /// Check the resolved configuration before any component is built
    pub fn validate(&self) -> Result<()> {
        if !is_valid_identifier(&self.source.table) {
            return Err(Error::Config(format!(
                "Invalid source table name: {}",
                self.source.table
            )));
        }
        if !is_valid_identifier(&self.source.order_column) {
            return Err(Error::Config(format!(
                "Invalid source order column: {}",
                self.source.order_column
            )));
        }
        if !is_valid_identifier(&self.remote.table) {
            return Err(Error::Config(format!(
                "Invalid remote table name: {}",
                self.remote.table
            )));
        }
        if self.source.mode == SourceMode::Producer
            && self
                .source
                .producer_command
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(Error::Config(
                "source.mode = \"producer\" requires source.producer_command".to_string(),
            ));
        }
        if self.source.timeout_ms == 0 || self.remote.timeout_ms == 0 {
            return Err(Error::Config("Timeouts must be greater than zero".to_string()));
        }
        match self.remote.url.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
            Some(url) => {
                return Err(Error::Config(format!("Remote URL must be http(s): {}", url)));
            }
            None => {
                return Err(Error::Config(format!(
                    "Remote URL not configured. Set {} or [remote].url",
                    ENV_SUPABASE_URL
                )));
            }
        }
        if self
            .remote
            .service_role_key
            .as_deref()
            .map_or(true, |k| k.trim().is_empty())
        {
            return Err(Error::Config(format!(
                "Remote key not configured. Set {} or [remote].service_role_key",
                ENV_SUPABASE_KEY
            )));
        }
        Ok(())
    }
}

/// SQL identifier check: alphanumeric and underscore only
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() < 100
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// First existing config file among the platform locations
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("recsync").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/recsync/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default location of the local store
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("recsync").join("latest.db"))
        .unwrap_or_else(|| PathBuf::from("./recsync_data/latest.db"))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str, parse: impl Fn(&str) -> Result<T>) -> Result<Option<T>> {
    env_string(name).map(|v| parse(&v)).transpose()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5790
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_source_table() -> String {
    "results".to_string()
}

fn default_order_column() -> String {
    "rowid".to_string()
}

fn default_source_timeout_ms() -> u64 {
    5_000
}

fn default_remote_table() -> String {
    "recommendations".to_string()
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}
