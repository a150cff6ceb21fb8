/// Live usage counting
///
/// Always counts the resource tables directly; there is no cached tally to drift.
use super::tiers::ResourceKind;
use crate::error::EngineResult;
use sqlx::{Executor, Sqlite, SqlitePool};

#[derive(Clone)]
pub struct UsageCounter {
    db: SqlitePool,
}

impl UsageCounter {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Live, non-deleted rows of `kind` owned by `user_id`
    pub async fn current_usage(&self, user_id: &str, kind: ResourceKind) -> EngineResult<i64> {
        Self::count(&self.db, user_id, kind).await
    }

    /// Same as `current_usage` but on a caller-supplied executor, so it can
    /// run inside an open transaction.
    pub async fn count<'e, E>(executor: E, user_id: &str, kind: ResourceKind) -> EngineResult<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE user_id = ? AND deleted_at IS NULL",
            kind.table()
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(user_id)
            .fetch_one(executor)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::migrated_pool;

    async fn insert(pool: &SqlitePool, table: &str, id: &str, user_id: &str, deleted: bool) {
        sqlx::query(&format!(
            "INSERT INTO {} (id, user_id, name, created_at, deleted_at) VALUES (?, ?, 'x', '2026-01-01T00:00:00.000Z', ?)",
            table
        ))
        .bind(id)
        .bind(user_id)
        .bind(deleted.then(|| "2026-01-02T00:00:00.000Z"))
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_counts_only_live_rows_of_owner() {
        let (pool, _dir) = migrated_pool().await;
        for id in ["alice", "bob"] {
            sqlx::query("INSERT INTO users (id, created_at) VALUES (?, '2026-01-01T00:00:00.000Z')")
                .bind(id)
                .execute(&pool)
                .await
                .unwrap();
        }

        insert(&pool, "qr_codes", "q1", "alice", false).await;
        insert(&pool, "qr_codes", "q2", "alice", true).await;
        insert(&pool, "qr_codes", "q3", "bob", false).await;
        insert(&pool, "slideshows", "s1", "alice", false).await;

        let counter = UsageCounter::new(pool);
        assert_eq!(counter.current_usage("alice", ResourceKind::QrCodes).await.unwrap(), 1);
        assert_eq!(counter.current_usage("alice", ResourceKind::Slideshows).await.unwrap(), 1);
        assert_eq!(counter.current_usage("alice", ResourceKind::Products).await.unwrap(), 0);
        assert_eq!(counter.current_usage("bob", ResourceKind::QrCodes).await.unwrap(), 1);
    }
}
