use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./data/llm-log-store.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 30,
            acquire_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Rows per multi-row INSERT statement
    pub chunk_size: usize,
    /// Whole-batch attempts made by the CLI on transient errors
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Largest accepted `ingest.chunk_size`; request rows bind 21 parameters each
/// and SQLite caps a statement at 32766.
pub const MAX_CHUNK_SIZE: usize = 1000;

/// Load configuration: built-in defaults < config file (optional) < environment
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let defaults = Config::default();

    let config = config::Config::builder()
        .set_default("database.url", defaults.database.url)?
        .set_default("database.max_connections", defaults.database.max_connections)?
        .set_default("database.busy_timeout_secs", defaults.database.busy_timeout_secs)?
        .set_default("database.acquire_timeout_secs", defaults.database.acquire_timeout_secs)?
        .set_default("ingest.chunk_size", defaults.ingest.chunk_size as u64)?
        .set_default("ingest.max_attempts", defaults.ingest.max_attempts)?
        .set_default("ingest.retry_backoff_ms", defaults.ingest.retry_backoff_ms)?
        .set_default("logging.level", defaults.logging.level)?
        .set_default("logging.format", defaults.logging.format)?
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("LLM_LOG_STORE").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.database.url.trim().is_empty() {
        anyhow::bail!("database.url cannot be empty");
    }

    if !cfg.database.url.starts_with("sqlite:") {
        anyhow::bail!(
            "database.url must be a sqlite: URL, got '{}'",
            cfg.database.url
        );
    }

    if cfg.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be at least 1");
    }

    if cfg.ingest.chunk_size == 0 || cfg.ingest.chunk_size > MAX_CHUNK_SIZE {
        anyhow::bail!(
            "ingest.chunk_size must be between 1 and {}, got {}",
            MAX_CHUNK_SIZE,
            cfg.ingest.chunk_size
        );
    }

    if cfg.ingest.max_attempts == 0 {
        anyhow::bail!("ingest.max_attempts must be at least 1");
    }

    match cfg.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("logging.format must be 'text' or 'json', got '{}'", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_config_rejects_non_sqlite_url() {
        let mut cfg = Config::default();
        cfg.database.url = "postgres://localhost/logs".to_string();

        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("sqlite: URL"));
    }

    #[test]
    fn test_validate_config_rejects_chunk_size() {
        let mut cfg = Config::default();
        cfg.ingest.chunk_size = 0;
        assert!(validate_config(&cfg).is_err());

        cfg.ingest.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_rejects_log_format() {
        let mut cfg = Config::default();
        cfg.logging.format = "yaml".to_string();

        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("logging.format"));
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.ingest.chunk_size, 100);
        assert_eq!(cfg.logging.format, "text");
    }

    #[test]
    fn test_load_config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[database]\nurl = \"sqlite:/tmp/logs.db\"\n\n[ingest]\nchunk_size = 50"
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.database.url, "sqlite:/tmp/logs.db");
        assert_eq!(cfg.database.busy_timeout_secs, 30);
        assert_eq!(cfg.ingest.chunk_size, 50);
        assert_eq!(cfg.ingest.max_attempts, 3);
    }
}
