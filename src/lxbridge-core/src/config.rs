use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            bridge: BridgeConfig::default(),
            client: ClientConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    /// File name inside the log directory. Defaults to `lxbridge.log`.
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_name: None,
        }
    }
}

impl LoggingConfig {
    pub fn file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("lxbridge.log")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ValidationError::UnknownLogLevel(other.to_string())),
        }
    }
}

/// Settings for the plugin host side of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Default bound for the module `fetch` primitive, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Longest inbound protocol line accepted before it is discarded.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl BridgeConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Settings for a supervising process that spawns the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            init_timeout_secs: default_init_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Modules a supervising process keeps running.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginsConfig {
    /// Directory of module manifests. Defaults to `plugins` in the data directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Manifest names (file stems) to start at load time.
    #[serde(default)]
    pub enabled: Vec<String>,
}

impl PluginsConfig {
    pub fn dir_or_default(&self, dirs: &AppDirs) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| dirs.plugin_dir().to_path_buf())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("fetch_timeout_ms must be greater than zero")]
    ZeroFetchTimeout,
    #[error("max_line_bytes must be greater than zero")]
    ZeroLineLimit,
    #[error("unknown log level '{0}'")]
    UnknownLogLevel(String),
    #[error("invalid plugin name '{0}'")]
    InvalidPluginName(String),
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.bridge.fetch_timeout_ms == 0 {
            return Err(ValidationError::ZeroFetchTimeout);
        }
        if self.bridge.max_line_bytes == 0 {
            return Err(ValidationError::ZeroLineLimit);
        }
        if let Some(name) = self.plugins.enabled.iter().find(|n| !is_plugin_name(n)) {
            return Err(ValidationError::InvalidPluginName(name.clone()));
        }
        Ok(())
    }
}

/// A bare file stem: no separators, not empty, not a dot path.
pub fn is_plugin_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}

fn default_max_line_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_executable() -> PathBuf {
    PathBuf::from("lxbridge")
}

fn default_init_timeout_secs() -> u64 {
    25
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.file_name(), "lxbridge.log");
        assert_eq!(config.bridge.fetch_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.client.init_timeout(), Duration::from_secs(25));
        assert_eq!(config.client.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn zero_fetch_timeout_rejected() {
        let mut config = Config::default();
        config.bridge.fetch_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::ZeroFetchTimeout)
        ));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "config_version = 1\n[bridge]\nfetch_timeout_ms = 250\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = Config::load_from(file.path()).expect("config should parse");
        assert_eq!(config.bridge.fetch_timeout_ms, 250);
        assert_eq!(config.bridge.max_line_bytes, 8 * 1024 * 1024);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.client.executable, PathBuf::from("lxbridge"));
    }

    #[test]
    fn plugins_section_parses() {
        let config: Config = toml::from_str(
            "config_version = 1\n[plugins]\ndir = \"/srv/lx\"\nenabled = [\"kw\", \"relay\"]\n",
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.plugins.enabled, vec!["kw", "relay"]);

        let dirs = AppDirs::rooted_at("/tmp/lxbridge-test");
        assert_eq!(config.plugins.dir_or_default(&dirs), PathBuf::from("/srv/lx"));
        assert_eq!(
            PluginsConfig::default().dir_or_default(&dirs),
            dirs.plugin_dir().to_path_buf()
        );
    }

    #[test]
    fn path_like_plugin_names_rejected() {
        let mut config = Config::default();
        config.plugins.enabled = vec!["ok".into(), "../escape".into()];
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidPluginName(name)) if name == "../escape"
        ));
        assert!(!is_plugin_name(""));
        assert!(is_plugin_name("kw-music"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = AppDirs::rooted_at(tmp.path());
        let config = Config::load_or_default(&dirs).expect("defaults");
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
