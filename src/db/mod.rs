/// Database layer for the entitlement engine
///
/// Manages the SQLite pool, embedded migrations, the timestamp encoding shared
/// by every table, and the bounded retry wrapper used for lost races.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePool;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> EngineResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    sqlx::sqlite::SqliteJournalMode::Wal
                } else {
                    sqlx::sqlite::SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(Duration::from_secs(5)),
        )
        .await
        .map_err(EngineError::Database)?;

    Ok(pool)
}

/// Run migrations embedded at compile time from ./migrations
pub async fn run_migrations(pool: &SqlitePool) -> EngineResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| EngineError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> EngineResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(EngineError::Database)?;

    Ok(())
}

/// Fixed-width RFC 3339 so that string comparison in SQL is chronological.
pub fn to_db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_db_timestamp(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp {:?}: {}", raw, e)))
}

pub fn parse_optional_timestamp(raw: Option<String>) -> EngineResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_db_timestamp).transpose()
}

/// Re-run `op` from the top while it fails with a retryable error.
///
/// `op` must be a complete transactional unit; the final write step alone is
/// never retried.
pub async fn retry_on_conflict<T, F, Fut>(
    attempts: u32,
    operation: &'static str,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(operation, attempt, error = %err, "retrying after conflict");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(operation, attempts, "conflict persisted, giving up");
                return Err(err);
            }
            result => return result,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::TempDir;

    /// A migrated database in a throwaway directory. Keep the `TempDir` alive
    /// for as long as the pool is in use.
    pub async fn migrated_pool() -> (SqlitePool, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("engine.sqlite"), DatabaseOptions::default())
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        (pool, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        let later = earlier + chrono::Duration::milliseconds(1500);

        let a = to_db_timestamp(earlier);
        let b = to_db_timestamp(later);
        assert_eq!(a, "2026-01-02T03:04:05.000Z");
        assert!(a < b);
        assert_eq!(parse_db_timestamp(&b).unwrap(), later);
    }

    #[tokio::test]
    async fn test_retry_stops_after_bound() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = retry_on_conflict(3, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Conflict("busy".into())) }
        })
        .await;

        assert!(matches!(result, Err(EngineError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_terminal_errors() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = retry_on_conflict(3, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::CodeExhausted) }
        })
        .await;

        assert!(matches!(result, Err(EngineError::CodeExhausted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_migrations_apply() {
        let (pool, _dir) = testing::migrated_pool().await;
        test_connection(&pool).await.unwrap();

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('activation_codes', 'user_activation_codes', 'quota_reservations')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 3);
    }
}
