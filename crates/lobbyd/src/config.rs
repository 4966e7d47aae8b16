//! Configuration loading and validation for the lobby daemon.
//!
//! Settings come from a TOML file with three sections: `[server]` for the
//! listener, `[lobbies]` for lobby limits and join codes, and `[logging]`.
//! Missing keys fall back to the runtime defaults.

use lobby_runtime::ServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub lobbies: LobbySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    pub max_connections: usize,
    /// Outbound messages queued per connection before pushes are dropped
    pub outbound_buffer: usize,
}

/// Lobby limits and join code generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    pub max_lobbies: usize,
    pub code_length: usize,
    pub code_alphabet: String,
    /// Seconds without activity before a lobby is ended; 0 disables reaping
    pub idle_timeout_secs: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let runtime = ServerConfig::default();
        Self {
            bind_address: runtime.bind_address.to_string(),
            max_connections: runtime.max_connections,
            outbound_buffer: runtime.outbound_buffer,
        }
    }
}

impl Default for LobbySettings {
    fn default() -> Self {
        let runtime = ServerConfig::default();
        Self {
            max_lobbies: runtime.max_lobbies,
            code_length: runtime.code_length,
            code_alphabet: runtime.code_alphabet,
            idle_timeout_secs: runtime.idle_timeout.map_or(0, |d| d.as_secs()),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written to
    /// `path` and the defaults are returned.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts to the runtime's [`ServerConfig`].
    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            outbound_buffer: self.server.outbound_buffer,
            max_lobbies: self.lobbies.max_lobbies,
            code_length: self.lobbies.code_length,
            code_alphabet: self.lobbies.code_alphabet.clone(),
            idle_timeout: match self.lobbies.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        })
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if self.server.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }

        if self.server.outbound_buffer == 0 {
            return Err("outbound_buffer must be greater than 0".to_string());
        }

        if self.lobbies.max_lobbies == 0 {
            return Err("max_lobbies must be greater than 0".to_string());
        }

        if self.lobbies.code_length < 3 {
            return Err(format!("code_length must be at least 3, got {}", self.lobbies.code_length));
        }

        let alphabet = &self.lobbies.code_alphabet;
        if let Some(c) = alphabet.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(format!("code_alphabet contains invalid character {c:?}"));
        }
        let unique: HashSet<char> = alphabet.chars().map(|c| c.to_ascii_uppercase()).collect();
        if unique.len() < 10 {
            return Err(format!(
                "code_alphabet must contain at least 10 distinct characters, got {}",
                unique.len()
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.outbound_buffer, 256);
        assert_eq!(config.lobbies.max_lobbies, 500);
        assert_eq!(config.lobbies.code_length, 4);
        assert_eq!(config.lobbies.idle_timeout_secs, 3600);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lobbyd.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert!(path.exists());

        // The written file reads back to the same settings.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.lobbies.code_alphabet, config.lobbies.code_alphabet);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:3000"
max_connections = 50

[lobbies]
max_lobbies = 10
code_length = 6
code_alphabet = "0123456789"
idle_timeout_secs = 0

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.server.max_connections, 50);
        // Not in the file, so the default applies.
        assert_eq!(config.server.outbound_buffer, 256);
        assert_eq!(config.lobbies.max_lobbies, 10);
        assert_eq!(config.lobbies.code_length, 6);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: AppConfig = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.lobbies.code_length, 4);
    }

    #[test]
    fn test_to_server_config_conversion() {
        let mut config = AppConfig::default();
        config.server.bind_address = "192.168.1.100:8080".to_string();
        config.lobbies.max_lobbies = 7;
        config.lobbies.idle_timeout_secs = 30;

        let server_config = config.to_server_config().unwrap();
        assert_eq!(server_config.bind_address.to_string(), "192.168.1.100:8080");
        assert_eq!(server_config.max_lobbies, 7);
        assert_eq!(server_config.idle_timeout, Some(Duration::from_secs(30)));

        config.lobbies.idle_timeout_secs = 0;
        assert_eq!(config.to_server_config().unwrap().idle_timeout, None);
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid_address".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().contains("Invalid bind address"));
    }

    #[test]
    fn test_validation_code_settings() {
        let mut config = AppConfig::default();
        config.lobbies.code_length = 2;
        assert!(config.validate().unwrap_err().contains("code_length"));

        config.lobbies.code_length = 4;
        config.lobbies.code_alphabet = "ABCDEFGHI".to_string();
        assert!(config.validate().unwrap_err().contains("distinct"));

        // Case-insensitive duplicates do not count twice.
        config.lobbies.code_alphabet = "ABCDEabcde".to_string();
        assert!(config.validate().unwrap_err().contains("distinct"));

        config.lobbies.code_alphabet = "ABCD-EFGHIJK".to_string();
        assert!(config.validate().unwrap_err().contains("invalid character"));
    }

    #[test]
    fn test_validation_zero_limits() {
        let mut config = AppConfig::default();
        config.server.outbound_buffer = 0;
        assert!(config.validate().unwrap_err().contains("outbound_buffer"));

        let mut config = AppConfig::default();
        config.lobbies.max_lobbies = 0;
        assert!(config.validate().unwrap_err().contains("max_lobbies"));
    }

    #[test]
    fn test_validation_log_levels() {
        for level in VALID_LOG_LEVELS {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Level '{}' should be valid", level);
        }

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }
}
