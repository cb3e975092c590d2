//! TOML configuration for the `payroll` binary.
//!
//! ```toml
//! [database]
//! backend = "sqlite"
//! connection_string = "payroll.db"
//!
//! [engine]
//! max_concurrency = 8
//! deduct_contribution_from_withholding = false
//! ```
//!
//! Every section and key is optional; missing values take their defaults.

use std::path::{Path, PathBuf};

use payroll_core::db::DbConfig;
use payroll_core::{EngineConfig, EngineConfigError};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineConfigError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database: DbConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Defaults when `path` is `None`, otherwise the parsed file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    fn from_toml(
        text: &str,
        path: &Path,
    ) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.engine.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(text: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::from_toml(text, Path::new("payroll.toml"))
    }

    #[test]
    fn empty_file_takes_defaults() {
        let config = parse("").unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.database.backend, "sqlite");
        assert_eq!(config.database.connection_string, ":memory:");
        assert_eq!(config.engine.max_concurrency, 8);
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse(
            r#"
            [database]
            connection_string = "payroll.db"

            [engine]
            max_concurrency = 2
            deduct_contribution_from_withholding = true
            "#,
        )
        .unwrap();

        assert_eq!(config.database.backend, "sqlite");
        assert_eq!(config.database.connection_string, "payroll.db");
        assert_eq!(config.engine.max_concurrency, 2);
        assert!(config.engine.deduct_contribution_from_withholding);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = parse("[engine]\nmax_concurrency = 0\n");

        assert!(matches!(
            result,
            Err(ConfigError::Engine(EngineConfigError::ZeroConcurrency))
        ));
    }

    #[test]
    fn unknown_section_is_a_parse_error() {
        let result = parse("[logging]\nlevel = \"debug\"\n");

        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/payroll.toml")));

        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(AppConfig::load(None).unwrap(), AppConfig::default());
    }
}
