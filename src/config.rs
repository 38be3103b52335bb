use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::workflow::WorkflowPolicy;

/// Main configuration structure for the capstone tracker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CapstoneTrackerConfig {
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Workflow store behavior
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database file path
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON structured logs instead of human-readable lines
    pub json_logs: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Fail mutations on projects with no workflow state instead of ignoring them
    pub strict_missing_state: bool,
}

impl WorkflowConfig {
    pub fn policy(&self) -> WorkflowPolicy {
        WorkflowPolicy {
            strict_missing_state: self.strict_missing_state,
        }
    }
}

impl Default for CapstoneTrackerConfig {
    fn default() -> Self {
        Self {
            database: Some(DatabaseConfig {
                url: ".capstone-tracker/capstone-tracker.db".to_string(),
                max_connections: 5,
                auto_migrate: true,
            }),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
            },
            workflow: WorkflowConfig::default(),
        }
    }
}

impl CapstoneTrackerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (capstone-tracker.toml)
    /// 3. Environment variables (prefixed with CAPSTONE_TRACKER__)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("capstone-tracker.toml"))
    }

    /// Same as [`load`](Self::load) with an explicit configuration file
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("CAPSTONE_TRACKER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_no_file() {
        let dir = TempDir::new().unwrap();
        let config = CapstoneTrackerConfig::load_from(&dir.path().join("missing.toml")).unwrap();

        let database = config.database.expect("default database config");
        assert_eq!(database.max_connections, 5);
        assert!(database.auto_migrate);
        assert!(!config.workflow.strict_missing_state);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capstone-tracker.toml");
        std::fs::write(
            &path,
            r#"
            [workflow]
            strict_missing_state = true

            [observability]
            log_level = "debug"
            json_logs = true
            "#,
        )
        .unwrap();

        let config = CapstoneTrackerConfig::load_from(&path).unwrap();
        assert!(config.workflow.policy().strict_missing_state);
        assert!(config.observability.json_logs);
        assert_eq!(config.observability.log_level, "debug");
        assert!(config.database.is_some());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.toml");

        let mut config = CapstoneTrackerConfig::default();
        config.workflow.strict_missing_state = true;
        config.save_to_file(&path).unwrap();

        let loaded = CapstoneTrackerConfig::load_from(&path).unwrap();
        assert!(loaded.workflow.strict_missing_state);
    }
}
