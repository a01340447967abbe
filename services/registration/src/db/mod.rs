//! Postgres connection pool and schema migrations.
//!
//! Migrations are read from disk at runtime (sqlx macros are off), so the
//! binary needs to find `migrations/`: `FESTREG_MIGRATIONS_DIR` when set,
//! otherwise the first existing candidate of [`MIGRATION_DIRS`].

mod error;

pub use error::DbError;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Relative locations tried when no directory is configured.
pub const MIGRATION_DIRS: [&str; 2] = ["migrations", "services/registration/migrations"];

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a request may wait for a free connection.
    pub acquire_timeout: Duration,
    pub migrations_dir: Option<PathBuf>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/festreg".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            migrations_dir: None,
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl DbConfig {
    /// Reads `DATABASE_URL`, `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS` and
    /// `FESTREG_MIGRATIONS_DIR`, keeping defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: env_u32("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_u32("DB_MIN_CONNECTIONS", defaults.min_connections),
            migrations_dir: std::env::var_os("FESTREG_MIGRATIONS_DIR").map(PathBuf::from),
            ..defaults
        }
    }

    /// Where migrations are loaded from.
    pub fn resolve_migrations_dir(&self) -> Result<PathBuf, DbError> {
        if let Some(dir) = &self.migrations_dir {
            return Ok(dir.clone());
        }
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        MIGRATION_DIRS
            .iter()
            .map(PathBuf::from)
            .chain(std::iter::once(manifest_dir))
            .find(|dir| dir.is_dir())
            .ok_or_else(|| DbError::MigrationDirNotFound {
                tried: MIGRATION_DIRS.join(", "),
            })
    }
}

pub async fn connect(config: &DbConfig) -> Result<PgPool, DbError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to database"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .map_err(DbError::Connect)
}

/// Applies pending migrations from `dir`.
pub async fn migrate(pool: &PgPool, dir: &Path) -> Result<(), DbError> {
    let migrator = Migrator::new(dir.to_path_buf())
        .await
        .map_err(DbError::Migration)?;
    info!(migrations_dir = %dir.display(), count = migrator.iter().count(), "Running database migrations");
    migrator.run(pool).await.map_err(DbError::Migration)?;
    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert!(config.migrations_dir.is_none());
    }

    #[test]
    fn test_configured_migrations_dir_wins() {
        let config = DbConfig {
            migrations_dir: Some(PathBuf::from("/tmp/festreg-migrations")),
            ..DbConfig::default()
        };
        assert_eq!(
            config.resolve_migrations_dir().unwrap(),
            PathBuf::from("/tmp/festreg-migrations")
        );
    }

    #[test]
    fn test_crate_migrations_are_found() {
        let dir = DbConfig::default().resolve_migrations_dir().unwrap();
        assert!(dir.join("0001_init.sql").is_file());
    }
}
