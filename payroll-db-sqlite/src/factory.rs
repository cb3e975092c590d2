use std::path::PathBuf;

use async_trait::async_trait;
use payroll_core::db::{DbConfig, PayrollRepository, RepositoryError, RepositoryFactory};
use tracing::info;

use crate::repository::SqliteRepository;

/// Resolve the seeds directory at runtime.
///
/// Resolution order:
/// 1. **`PAYROLL_DB_SQLITE_SEEDS_DIR`** if set.
/// 2. **`./seeds`** if it exists in the current working directory.
/// 3. **`$CARGO_MANIFEST_DIR/seeds`** as a last resort (dev and tests).
fn seeds_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PAYROLL_DB_SQLITE_SEEDS_DIR") {
        return PathBuf::from(dir);
    }
    let cwd_seeds = PathBuf::from("./seeds");
    if cwd_seeds.is_dir() {
        return cwd_seeds;
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("seeds")
}

/// [`RepositoryFactory`] for SQLite.
///
/// ```rust,no_run
/// use payroll_core::db::RepositoryRegistry;
/// use payroll_db_sqlite::SqliteRepositoryFactory;
///
/// let mut registry = RepositoryRegistry::new();
/// registry.register(Box::new(SqliteRepositoryFactory));
/// ```
pub struct SqliteRepositoryFactory;

#[async_trait]
impl RepositoryFactory for SqliteRepositoryFactory {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    /// Open the database named by `config.connection_string` (a bare path,
    /// `:memory:`, or a `sqlite:` URL), migrate it, and apply the seeds.
    ///
    /// Seed files are plain SQL; they must be idempotent since they run on
    /// every open.
    async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn PayrollRepository>, RepositoryError> {
        let repo = SqliteRepository::new(&config.connection_string)
            .await
            .map_err(|e| RepositoryError::Connection(format!("{e:#}")))?;
        repo.run_migrations()
            .await
            .map_err(|e| RepositoryError::Database(format!("{e:#}")))?;

        let seeds = seeds_dir();
        if seeds.is_dir() {
            repo.run_seeds(&seeds)
                .await
                .map_err(|e| RepositoryError::Database(format!("{e:#}")))?;
        }

        info!(database = %config.connection_string, "sqlite repository ready");
        Ok(Box::new(repo))
    }
}
