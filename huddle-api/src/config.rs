use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use huddle_sfu::{SfuConfig, WorkerSettings};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Largest accepted WebSocket message (bytes)
    pub max_message_size: usize,
    /// Capacity of each connection's outbound frame queue
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 3000,
            max_message_size: 64 * 1024,
            outbound_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Media engine worker and transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    pub listen_ip: IpAddr,
    /// Public address announced to clients (NAT / container deployments)
    pub announced_ip: Option<String>,
    pub request_timeout_ms: u64,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub enable_sctp: bool,
    pub prefer_udp: bool,
    /// Maximum number of concurrent rooms (0 = unlimited)
    pub max_rooms: usize,
    /// Maximum peers per room (0 = unlimited)
    pub max_peers_per_room: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let worker = WorkerSettings::default();
        Self {
            rtc_min_port: worker.rtc_min_port,
            rtc_max_port: worker.rtc_max_port,
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announced_ip: None,
            request_timeout_ms: 10_000,
            enable_udp: true,
            enable_tcp: true,
            enable_sctp: true,
            prefer_udp: true,
            max_rooms: 0,
            max_peers_per_room: 0,
        }
    }
}

/// Presence roster channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Name of the broadcast group every connection belongs to
    pub group: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            group: "MAIN".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // Load config file if provided
        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (HUDDLE_SERVER__HTTP_PORT, etc.).
        // Nested keys use a double underscore since field names contain single ones.
        builder = builder.add_source(
            Environment::with_prefix("HUDDLE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for misconfigurations. Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.max_message_size == 0 {
            errors.push("server.max_message_size must be greater than 0".to_string());
        }
        if self.server.outbound_buffer == 0 {
            errors.push("server.outbound_buffer must be greater than 0".to_string());
        }

        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        let engine = &self.engine;
        if engine.rtc_min_port == 0 {
            errors.push("engine.rtc_min_port must be greater than 0".to_string());
        }
        if engine.rtc_min_port > engine.rtc_max_port {
            errors.push(format!(
                "engine.rtc_min_port ({}) must not exceed engine.rtc_max_port ({})",
                engine.rtc_min_port, engine.rtc_max_port
            ));
        }
        if engine.request_timeout_ms == 0 {
            errors.push("engine.request_timeout_ms must be greater than 0".to_string());
        }
        if !engine.enable_udp && !engine.enable_tcp {
            errors.push("engine: at least one of enable_udp / enable_tcp must be set".to_string());
        }

        if self.presence.group.trim().is_empty() {
            errors.push("presence.group must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            rtc_min_port: self.engine.rtc_min_port,
            rtc_max_port: self.engine.rtc_max_port,
        }
    }

    #[must_use]
    pub fn sfu_config(&self) -> SfuConfig {
        SfuConfig {
            request_timeout_ms: self.engine.request_timeout_ms,
            listen_ip: self.engine.listen_ip,
            announced_ip: self.engine.announced_ip.clone(),
            enable_udp: self.engine.enable_udp,
            enable_tcp: self.engine.enable_tcp,
            enable_sctp: self.engine.enable_sctp,
            prefer_udp: self.engine.prefer_udp,
            max_rooms: self.engine.max_rooms,
            max_peers_per_room: self.engine.max_peers_per_room,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http_address(), "0.0.0.0:3000");
        assert_eq!(config.presence.group, "MAIN");
        assert_eq!(config.worker_settings(), WorkerSettings::default());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.engine.rtc_min_port = 50_000;
        config.engine.rtc_max_port = 40_000;
        config.engine.request_timeout_ms = 0;
        config.logging.format = "xml".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("logging.format"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  host: 127.0.0.1\n  http_port: 4443\nengine:\n  rtc_min_port: 10000\n  rtc_max_port: 10100\n  announced_ip: 203.0.113.7\n  max_peers_per_room: 8\npresence:\n  group: LOBBY"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.http_address(), "127.0.0.1:4443");
        assert_eq!(config.worker_settings().rtc_max_port, 10_100);
        assert_eq!(config.presence.group, "LOBBY");
        // untouched sections keep their defaults
        assert_eq!(config.logging.level, "info");

        let sfu = config.sfu_config();
        assert_eq!(sfu.max_peers_per_room, 8);
        assert_eq!(sfu.announced_ip.as_deref(), Some("203.0.113.7"));
    }
}
