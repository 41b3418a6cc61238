//! Configuration Loader
//!
//! Environment-aware layered loading built on the `config` crate:
//!
//! 1. built-in defaults (`#[serde(default)]` on every section)
//! 2. `{dir}/sync-core.yaml`
//! 3. `{dir}/sync-core.{environment}.yaml`
//! 4. environment variables, e.g. `SYNC_CORE__LOCK__TTL_SECONDS=600`
//!
//! Missing files are skipped. The merged result is validated before use.

use super::error::{ConfigResult, ConfigurationError};
use super::SyncConfig;
use config::{Config, Environment, File, FileFormat};
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "SYNC_CORE";
pub const BASE_FILE_STEM: &str = "sync-core";

const SENSITIVE_PATTERNS: [&str; 6] = ["password", "secret", "token", "credential", "auth", "url"];

#[derive(Debug)]
pub struct ConfigManager {
    config: SyncConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration from `./config` with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load with an explicit environment, leaving process variables untouched
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading sync configuration"
        );

        let config = Self::load_and_merge(&config_directory, environment)?;
        config.validate()?;

        debug!(
            config = %Self::sanitize_for_logging(&config),
            "Configuration loaded"
        );
        info!(
            environment = %environment,
            lock_ttl_seconds = config.lock.ttl_seconds,
            default_batch_size = config.batch.default_size,
            "⚙️ Sync configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: SyncConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with sensitive fields masked
    pub fn debug_config(&self) -> Value {
        Self::sanitize_for_logging(&self.config)
    }

    /// `SYNC_CORE_ENV`, then `APP_ENV`, defaulting to `development`
    pub fn detect_environment() -> String {
        env::var("SYNC_CORE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn load_and_merge(config_directory: &Path, environment: &str) -> ConfigResult<SyncConfig> {
        if config_directory.exists() && !config_directory.is_dir() {
            return Err(ConfigurationError::file_read_error(
                config_directory.display().to_string(),
                "configuration path is not a directory",
            ));
        }

        let base = config_directory.join(format!("{BASE_FILE_STEM}.yaml"));
        let overlay = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.yaml"));

        let layered = Config::builder()
            .add_source(
                File::from(base.as_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                File::from(overlay.as_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::environment_config_error(environment, e))?;

        layered
            .try_deserialize::<SyncConfig>()
            .map_err(|e| ConfigurationError::parse_error(base.display().to_string(), e))
    }

    fn sanitize_for_logging(config: &SyncConfig) -> Value {
        let mut json = serde_json::to_value(config).unwrap_or(Value::Null);
        Self::sanitize_json_recursive(&mut json);
        json
    }

    fn sanitize_json_recursive(value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = SENSITIVE_PATTERNS
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive && val.is_string() {
                        *val = Value::String("***REDACTED***".to_string());
                    } else {
                        Self::sanitize_json_recursive(val);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(Self::sanitize_json_recursive),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.config(), &SyncConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_overlay_wins_over_base() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sync-core.yaml"),
            "lock:\n  ttl_seconds: 600\nbatch:\n  default_size: 25\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("sync-core.test.yaml"),
            "lock:\n  ttl_seconds: 30\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.config().lock.ttl_seconds, 30);
        assert_eq!(manager.config().batch.default_size, 25);
        assert_eq!(manager.config().lock.acquire_retries, 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sync-core.yaml"),
            "batch:\n  min_size: 100\n  max_size: 10\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_debug_config_redacts_database_url() {
        let mut config = SyncConfig::default();
        config.database.url = Some("postgres://user:pw@localhost/sync".into());
        let manager = ConfigManager::from_config(config, "test").unwrap();

        let dump = manager.debug_config();
        assert_eq!(dump["database"]["url"], "***REDACTED***");
        assert_eq!(dump["lock"]["ttl_seconds"], 7200);
    }
}
