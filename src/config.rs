//! Configuration module for the chatcast server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Scheduling model for the chat port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Single-threaded readiness loop (epoll/kqueue via mio).
    Mio,
    /// Task-per-connection on tokio with a coordinator-owned registry.
    Tokio,
}

/// Command-line arguments for the chat server
#[derive(Parser, Debug)]
#[command(name = "chatcast")]
#[command(author = "chatcast authors")]
#[command(version = "0.1.0")]
#[command(about = "A scalable TCP chat broadcast server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Scheduling model (mio or tokio)
    #[arg(short, long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Directory holding the static assets for the HTTP fallback path
    #[arg(long)]
    pub wwwroot: Option<PathBuf>,

    /// Port for the debug stats endpoint
    #[arg(long)]
    pub debug_port: Option<u16>,

    /// Log inbound messages instead of broadcasting (diagnostic mode)
    #[arg(long)]
    pub log_only: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Maximum simultaneous connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-connection read buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maximum ready sockets returned per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Scheduling model
    #[serde(default = "default_runtime")]
    pub runtime: RuntimeType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            batch_size: default_batch_size(),
            runtime: default_runtime(),
        }
    }
}

/// HTTP fallback configuration
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    /// Static asset directory
    #[serde(default = "default_wwwroot")]
    pub wwwroot: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            wwwroot: default_wwwroot(),
        }
    }
}

/// Debug endpoint configuration
#[derive(Debug, Deserialize)]
pub struct DebugConfig {
    /// Stats endpoint port; absent disables the endpoint
    #[serde(default = "default_debug_port")]
    pub port: Option<u16>,
    /// Log inbound messages instead of broadcasting
    #[serde(default)]
    pub log_only: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            port: default_debug_port(),
            log_only: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_backlog() -> u32 {
    100
}

fn default_max_connections() -> usize {
    10240
}

fn default_buffer_size() -> usize {
    4096
}

fn default_batch_size() -> usize {
    1024
}

fn default_runtime() -> RuntimeType {
    RuntimeType::Mio
}

fn default_wwwroot() -> PathBuf {
    PathBuf::from("./wwwroot")
}

fn default_debug_port() -> Option<u16> {
    Some(6060)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub runtime: RuntimeType,
    pub wwwroot: PathBuf,
    pub debug_port: Option<u16>,
    pub log_only: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: toml_config.server.backlog,
            max_connections: toml_config.server.max_connections,
            buffer_size: toml_config.server.buffer_size,
            batch_size: toml_config.server.batch_size,
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            wwwroot: cli.wwwroot.unwrap_or(toml_config.http.wwwroot),
            debug_port: cli.debug_port.or(toml_config.debug.port),
            log_only: cli.log_only || toml_config.debug.log_only,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// A localhost config suitable for tests: ephemeral port, no debug
    /// endpoint, small limits.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            backlog: 16,
            max_connections: 32,
            buffer_size: 4096,
            batch_size: 64,
            runtime: RuntimeType::Mio,
            wwwroot: PathBuf::from("./wwwroot"),
            debug_port: None,
            log_only: false,
            log_level: "info".to_string(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.backlog, 100);
        assert_eq!(config.server.runtime, RuntimeType::Mio);
        assert_eq!(config.debug.port, Some(6060));
        assert!(!config.debug.log_only);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9000
            backlog = 256
            max_connections = 500000
            runtime = "tokio"

            [http]
            wwwroot = "/srv/chat/wwwroot"

            [debug]
            port = 7070
            log_only = true

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.backlog, 256);
        assert_eq!(config.server.max_connections, 500000);
        assert_eq!(config.server.runtime, RuntimeType::Tokio);
        assert_eq!(config.http.wwwroot, PathBuf::from("/srv/chat/wwwroot"));
        assert_eq!(config.debug.port, Some(7070));
        assert!(config.debug.log_only);
        assert_eq!(config.logging.level, "debug");
    }
}
