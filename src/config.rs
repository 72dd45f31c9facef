//! Configuration management for arbitrium.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::{SecurityConfig, ServerConfig};
use crate::cli::Args;
use crate::process::IoMode;
use crate::session::{RegistryConfig, SessionSettings};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Shell session defaults.
    pub sessions: SessionsSection,
    /// Session transcripts.
    pub transcript: TranscriptSection,
    /// Security configuration.
    pub security: SecuritySection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            graceful_shutdown: true,
        }
    }
}

/// Shell session section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    /// Shell program; detected per platform when unset.
    pub shell: Option<String>,
    /// Exec timeout when a request gives none.
    pub default_timeout_ms: u64,
    /// Wait between polite termination and kill.
    pub close_grace_ms: u64,
    /// Deadline for a new shell's first round trip.
    pub startup_timeout_ms: u64,
    /// Stream wiring for new shells.
    pub mode: IoMode,
    /// Refresh the working-directory hint after each command.
    pub track_cwd: bool,
    /// Rewrite nested `powershell -Command "..."` quoting.
    pub rewrite_powershell: bool,
    /// Inherited environment variables removed from every shell.
    pub env_remove: Vec<String>,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            shell: None,
            default_timeout_ms: 30_000,
            close_grace_ms: 5_000,
            startup_timeout_ms: 10_000,
            mode: IoMode::Pipe,
            track_cwd: true,
            rewrite_powershell: true,
            env_remove: vec!["CLAUDECODE".to_string()],
        }
    }
}

/// Transcript configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptSection {
    /// Write per-session transcript files.
    pub enabled: bool,
    /// Directory for transcript files.
    pub log_dir: PathBuf,
}

impl Default for TranscriptSection {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Security configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Authentication settings.
    pub auth: AuthSection,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Enable authentication.
    pub enabled: bool,
    /// API keys.
    pub api_keys: Vec<String>,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ARBITRIUM_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("ARBITRIUM_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("ARBITRIUM_PORT", port))?;
        }

        if let Some(key) = lookup("ARBITRIUM_API_KEY") {
            if !key.is_empty() {
                self.security.auth.enabled = true;
                if !self.security.auth.api_keys.contains(&key) {
                    self.security.auth.api_keys.push(key);
                }
            }
        }

        if let Some(shell) = lookup("ARBITRIUM_SHELL").filter(|s| !s.is_empty()) {
            self.sessions.shell = Some(shell);
        }

        if let Some(ms) = lookup("ARBITRIUM_TIMEOUT_MS") {
            self.sessions.default_timeout_ms = ms
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("ARBITRIUM_TIMEOUT_MS", ms))?;
        }

        if let Some(dir) = lookup("ARBITRIUM_LOG_DIR").filter(|s| !s.is_empty()) {
            self.transcript.log_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup("ARBITRIUM_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref key) = args.api_key {
            self.security.auth.enabled = true;
            if !self.security.auth.api_keys.contains(key) {
                self.security.auth.api_keys.push(key.clone());
            }
        }

        if let Some(ref shell) = args.shell {
            self.sessions.shell = Some(shell.clone());
        }

        if let Some(ms) = args.timeout_ms {
            self.sessions.default_timeout_ms = ms;
        }

        if let Some(ref dir) = args.log_dir {
            self.transcript.log_dir = dir.clone();
        }

        if args.no_transcript {
            self.transcript.enabled = false;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env()?;
        config.apply_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Reject values that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "sessions.default_timeout_ms",
                "must be greater than zero".into(),
            ));
        }
        if self.security.auth.enabled && self.security.auth.api_keys.is_empty() {
            return Err(ConfigError::InvalidValue(
                "security.auth.api_keys",
                "authentication is enabled but no API key is configured".into(),
            ));
        }
        Ok(())
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let mut security = SecurityConfig::default();
        if self.security.auth.enabled {
            for key in &self.security.auth.api_keys {
                security = security.with_api_key(key);
            }
        }

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port);
        server_config = server_config.with_security(security);

        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Registry settings derived from the `sessions` section.
    pub fn to_registry_config(&self) -> RegistryConfig {
        let s = &self.sessions;
        RegistryConfig {
            default_shell: s.shell.clone(),
            default_timeout: Duration::from_millis(s.default_timeout_ms),
            default_mode: s.mode,
            env_remove: s.env_remove.clone(),
            session: SessionSettings {
                startup_timeout: Duration::from_millis(s.startup_timeout_ms),
                close_grace: Duration::from_millis(s.close_grace_ms),
                track_cwd: s.track_cwd,
                rewrite_powershell: s.rewrite_powershell,
                ..SessionSettings::default()
            },
        }
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// Environment variable with an unusable value.
    InvalidEnv(&'static str, String),
    /// Setting with an unusable value.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::InvalidEnv(name, value) => write!(f, "invalid value for {}: '{}'", name, value),
            Self::InvalidValue(name, reason) => write!(f, "invalid {}: {}", name, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::ArbitriumError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert!(!config.security.auth.enabled);
        assert_eq!(config.sessions.default_timeout_ms, 30_000);
        assert_eq!(config.sessions.mode, IoMode::Pipe);
        assert!(config.transcript.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "server": {
                "host": "0.0.0.0",
                "port": 8080
            },
            "sessions": {
                "shell": "/bin/bash",
                "mode": "pty",
                "track_cwd": false
            },
            "security": {
                "auth": {
                    "enabled": true,
                    "api_keys": ["key1", "key2"]
                }
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sessions.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.sessions.mode, IoMode::Pty);
        assert!(!config.sessions.track_cwd);
        assert!(config.security.auth.enabled);
        assert_eq!(config.security.auth.api_keys.len(), 2);
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{
            "server": {
                "port": 9000
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1"); // Default
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.sessions.close_grace_ms, 5_000);
    }

    #[test]
    fn test_config_bad_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_apply_env() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("ARBITRIUM_HOST", "0.0.0.0"),
                ("ARBITRIUM_PORT", "4000"),
                ("ARBITRIUM_API_KEY", "env-key"),
                ("ARBITRIUM_SHELL", "/bin/zsh"),
                ("ARBITRIUM_TIMEOUT_MS", "1500"),
                ("ARBITRIUM_LOG_DIR", "/var/log/arbitrium"),
                ("RUST_LOG", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4000);
        assert!(config.security.auth.enabled);
        assert_eq!(config.security.auth.api_keys, vec!["env-key".to_string()]);
        assert_eq!(config.sessions.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.sessions.default_timeout_ms, 1500);
        assert_eq!(config.transcript.log_dir, PathBuf::from("/var/log/arbitrium"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_apply_env_log_level_precedence() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("ARBITRIUM_LOG_LEVEL", "warn"),
                ("RUST_LOG", "trace"),
            ]))
            .unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_apply_env_invalid_port() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(env(&[("ARBITRIUM_PORT", "high")]))
            .unwrap_err();
        assert!(err.to_string().contains("ARBITRIUM_PORT"));
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        let args = Args {
            host: Some("192.168.1.1".parse().unwrap()),
            port: Some(5000),
            api_key: Some("test-key".to_string()),
            shell: Some("/bin/sh".to_string()),
            timeout_ms: Some(2500),
            no_transcript: true,
            ..Args::default()
        };

        config.apply_args(&args);

        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 5000);
        assert!(config.security.auth.enabled);
        assert!(config
            .security
            .auth
            .api_keys
            .contains(&"test-key".to_string()));
        assert_eq!(config.sessions.shell.as_deref(), Some("/bin/sh"));
        assert_eq!(config.sessions.default_timeout_ms, 2500);
        assert!(!config.transcript.enabled);
    }

    #[test]
    fn test_args_without_values_keep_file_settings() {
        let mut config = Config::default();
        config.server.port = 9100;
        config.apply_args(&Args::default());
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn test_validate_rejects_auth_without_keys() {
        let mut config = Config::default();
        config.security.auth.enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(..))
        ));
    }

    #[test]
    fn test_to_server_config() {
        let config = Config::default();
        let server_config = config.to_server_config().unwrap();

        assert_eq!(server_config.host, "127.0.0.1");
        assert_eq!(server_config.port, 3000);
        assert!(!server_config.security.auth_enabled());
    }

    #[test]
    fn test_to_registry_config() {
        let mut config = Config::default();
        config.sessions.default_timeout_ms = 1234;
        config.sessions.close_grace_ms = 250;
        config.sessions.track_cwd = false;

        let registry = config.to_registry_config();
        assert_eq!(registry.default_timeout, Duration::from_millis(1234));
        assert_eq!(registry.session.close_grace, Duration::from_millis(250));
        assert!(!registry.session.track_cwd);
        assert!(registry.env_remove.contains(&"CLAUDECODE".to_string()));
    }

    #[test]
    fn test_invalid_host() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_string();

        let result = config.to_server_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"host\""));
        assert!(json.contains("\"default_timeout_ms\""));
        assert!(json.contains("\"log_dir\""));
    }
}
