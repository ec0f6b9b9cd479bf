use serde::{Deserialize, Serialize};
use std::fs;

use anyhow::{Context, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub ratelimit: RateLimitConfig,
}

/// Log file rotation policy. Parsed from the YAML, so an invalid value is
/// rejected at config load.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Never,
    Daily,
    Hourly,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub rotation: Rotation,
    pub use_json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "./logs".to_string(),
            rotation: Rotation::Daily,
            use_json: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PostgresConfig {
    /// Connection URL, e.g. postgres://user@host:5432/wallet
    pub dsn: String,
    /// Filled from POSTGRES_PASSWORD; takes precedence over any password in the DSN.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RedisConfig {
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub rps: u32,
    pub burst: u32,
}

impl AppConfig {
    /// Load config from a YAML file and apply environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let mut config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config yaml")?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables take precedence over YAML config.
    ///
    /// Supported overrides:
    /// - POSTGRES_PASSWORD: store password, applied on top of the DSN
    /// - WALLET_SERVER_PORT: server port (u16)
    /// - WALLET_LOG_LEVEL: log level (trace/debug/info/warn/error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(pw) = std::env::var("POSTGRES_PASSWORD") {
            if !pw.is_empty() {
                tracing::info!(
                    "Config override: postgres password = [REDACTED] (from POSTGRES_PASSWORD)"
                );
                self.postgres.password = Some(pw);
            }
        }
        if let Ok(port) = std::env::var("WALLET_SERVER_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                tracing::info!("Config override: server.port = {} (from WALLET_SERVER_PORT)", p);
                self.server.port = p;
            }
        }
        if let Ok(level) = std::env::var("WALLET_LOG_LEVEL") {
            tracing::info!("Config override: log.level = {} (from WALLET_LOG_LEVEL)", level);
            self.log.level = level;
        }
    }

    /// Validate configuration at startup
    ///
    /// Returns an error if any critical configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Invalid server.port: must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log.level '{}': must be one of {:?}",
                self.log.level,
                valid_levels
            );
        }

        if self.postgres.dsn.is_empty() {
            anyhow::bail!("Invalid postgres.dsn: must not be empty");
        }
        if self.redis.addr.is_empty() {
            anyhow::bail!("Invalid redis.addr: must not be empty");
        }
        if self.kafka.brokers.is_empty() {
            anyhow::bail!("Invalid kafka.brokers: must not be empty");
        }
        if self.kafka.topic.is_empty() {
            anyhow::bail!("Invalid kafka.topic: must not be empty");
        }
        if self.ratelimit.rps == 0 || self.ratelimit.burst == 0 {
            anyhow::bail!("Invalid ratelimit: rps and burst must be > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            log: LogConfig::default(),
            server: ServerConfig { port: 8080 },
            postgres: PostgresConfig {
                dsn: "postgres://wallet@localhost:5432/wallet".to_string(),
                password: None,
            },
            redis: RedisConfig {
                addr: "localhost:6379".to_string(),
                password: String::new(),
                db: 0,
            },
            kafka: KafkaConfig {
                brokers: vec!["localhost:9092".to_string()],
                topic: "wallet-events".to_string(),
            },
            ratelimit: RateLimitConfig { rps: 50, burst: 100 },
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_port() {
        let mut config = valid_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = valid_config();
        config.log.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_brokers() {
        let mut config = valid_config();
        config.kafka.brokers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rotation_parsing() {
        let log: LogConfig =
            serde_yaml::from_str("level: info\ndir: ./logs\nrotation: hourly\nuse_json: true")
                .unwrap();
        assert_eq!(log.rotation, Rotation::Hourly);

        let invalid = serde_yaml::from_str::<LogConfig>(
            "level: info\ndir: ./logs\nrotation: weekly\nuse_json: false",
        );
        assert!(invalid.is_err(), "unknown rotation must fail at load");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  port: 9090
postgres:
  dsn: postgres://wallet@db:5432/wallet
redis:
  addr: cache:6379
kafka:
  brokers: [broker:9092]
  topic: wallet-events
ratelimit:
  rps: 10
  burst: 20
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.redis.db, 0);
        assert_eq!(config.kafka.brokers.len(), 1);
    }
}
