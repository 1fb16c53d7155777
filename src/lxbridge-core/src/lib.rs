pub mod config;
pub mod logging;
pub mod models;
pub mod paths;

pub use config::{
    BridgeConfig, ClientConfig, Config, ConfigError, LogLevel, LoggingConfig, PluginsConfig,
    ValidationError,
};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use paths::{AppDirs, DirsError};

pub const APP_NAME: &str = "lxbridge";
pub const APP_AUTHOR: &str = "lxbridge";
pub const APP_QUALIFIER: &str = "io";
