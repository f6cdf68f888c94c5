//! YAML configuration for the ingestion pipeline and the API server.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration. An explicit value passed into component
/// constructors at process start; nothing reads the environment after
/// this is built.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). The
    /// `--log-level` CLI flag takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// ClickHouse connection configuration.
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,

    /// Snapshot ingestion configuration.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// API server configuration.
    #[serde(default)]
    pub server: ServerConfig,
}

/// ClickHouse connection configuration (native TCP protocol).
#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    /// Host:port of the native TCP endpoint.
    #[serde(default = "default_clickhouse_endpoint")]
    pub endpoint: String,

    /// Target database.
    #[serde(default = "default_clickhouse_database")]
    pub database: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

/// Snapshot ingestion configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Path to the snapshot file refreshed by the external fetcher.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    /// Freshness window: maximum snapshot age before ingestion refuses
    /// to run. Default: 15m.
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,
}

/// API server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address. Default: 0.0.0.0:8081.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_clickhouse_endpoint() -> String {
    "localhost:9000".to_string()
}

fn default_clickhouse_database() -> String {
    "echerga".to_string()
}

fn default_snapshot_path() -> String {
    "echerga-snapshot.json".to_string()
}

fn default_max_age() -> Duration {
    Duration::from_secs(900)
}

fn default_server_addr() -> String {
    "0.0.0.0:8081".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            clickhouse: ClickHouseConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            endpoint: default_clickhouse_endpoint(),
            database: default_clickhouse_database(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            max_age: default_max_age(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

impl ClickHouseConfig {
    /// Builds a clickhouse-rs compatible TCP DSN.
    ///
    /// Format: `tcp://[user[:pass]@]host:port/database?options`
    pub fn dsn(&self) -> String {
        let mut dsn = "tcp://".to_string();

        if !self.username.is_empty() {
            dsn.push_str(&self.username);
            if !self.password.is_empty() {
                dsn.push(':');
                dsn.push_str(&self.password);
            }
            dsn.push('@');
        }

        dsn.push_str(&self.endpoint);
        dsn.push('/');
        dsn.push_str(&self.database);
        dsn.push_str("?compression=lz4&pool_min=2&pool_max=5");

        dsn
    }
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.clickhouse.endpoint.is_empty() {
            bail!("clickhouse.endpoint must not be empty");
        }

        if self.clickhouse.database.is_empty() {
            bail!("clickhouse.database must not be empty");
        }

        if self.ingest.max_age.is_zero() {
            bail!("ingest.max_age must be greater than zero");
        }

        if self.ingest.snapshot_path.is_empty() {
            bail!("ingest.snapshot_path must not be empty");
        }

        self.server
            .addr
            .parse::<SocketAddr>()
            .with_context(|| format!("server.addr {:?} is not a socket address", self.server.addr))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.clickhouse.endpoint, "localhost:9000");
        assert_eq!(cfg.clickhouse.database, "echerga");
        assert_eq!(cfg.ingest.max_age, Duration::from_secs(900));
        assert_eq!(cfg.server.addr, "0.0.0.0:8081");
    }

    #[test]
    fn test_parse_yaml_with_humantime_duration() {
        let yaml = r#"
log_level: debug
clickhouse:
  endpoint: "ch.internal:9000"
  database: "border"
  username: "writer"
  password: "secret"
ingest:
  snapshot_path: "/var/lib/echerga/snapshot.json"
  max_age: 5m
server:
  addr: "127.0.0.1:9999"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.ingest.max_age, Duration::from_secs(300));
        assert_eq!(cfg.clickhouse.endpoint, "ch.internal:9000");
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_max_age() {
        let mut cfg = Config::default();
        cfg.ingest.max_age = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_addr() {
        let mut cfg = Config::default();
        cfg.server.addr = "not-an-addr".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_endpoint() {
        let mut cfg = Config::default();
        cfg.clickhouse.endpoint = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_dsn_with_credentials() {
        let cfg = ClickHouseConfig {
            endpoint: "ch:9000".to_string(),
            database: "border".to_string(),
            username: "writer".to_string(),
            password: "s3cret".to_string(),
        };
        assert_eq!(
            cfg.dsn(),
            "tcp://writer:s3cret@ch:9000/border?compression=lz4&pool_min=2&pool_max=5"
        );
    }

    #[test]
    fn test_dsn_without_credentials() {
        let cfg = ClickHouseConfig::default();
        assert_eq!(
            cfg.dsn(),
            "tcp://localhost:9000/echerga?compression=lz4&pool_min=2&pool_max=5"
        );
    }
}
