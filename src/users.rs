/// User records as consumed by the quota engine
use crate::db::{parse_db_timestamp, to_db_timestamp};
use crate::error::{EngineError, EngineResult};
use crate::quota::{QuotaOverrides, TierId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite, SqlitePool};

/// The subset of a user the engine needs: tier and optional overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    #[serde(rename = "subscriptionTier")]
    pub tier: TierId,
    pub overrides: QuotaOverrides,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    fn from_row(row: &SqliteRow) -> EngineResult<Self> {
        let id: String = row.try_get("id")?;
        let raw_tier: String = row.try_get("subscription_tier")?;
        let tier = raw_tier.parse().unwrap_or_else(|_| {
            tracing::warn!(user_id = %id, tier = %raw_tier, "unknown stored tier, treating as free");
            TierId::Free
        });
        let created_at: String = row.try_get("created_at")?;

        Ok(UserRecord {
            id,
            tier,
            overrides: QuotaOverrides {
                max_products: row.try_get("max_products")?,
                max_audio_files: row.try_get("max_audio_files")?,
                max_playlists: row.try_get("max_playlists")?,
                max_qr_codes: row.try_get("max_qr_codes")?,
                max_slideshows: row.try_get("max_slideshows")?,
            },
            created_at: parse_db_timestamp(&created_at)?,
        })
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    db: SqlitePool,
}

impl UserDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: &str) -> EngineResult<UserRecord> {
        Self::fetch(&self.db, user_id).await
    }

    /// Load a user on a caller-supplied executor
    pub async fn fetch<'e, E>(executor: E, user_id: &str) -> EngineResult<UserRecord>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            r#"
            SELECT id, subscription_tier, max_products, max_audio_files, max_playlists,
                   max_qr_codes, max_slideshows, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(executor)
        .await?;

        match row {
            Some(row) => UserRecord::from_row(&row),
            None => Err(EngineError::NotFound(format!("User not found: {}", user_id))),
        }
    }

    /// Create or replace a user's tier and overrides (administrator operation)
    pub async fn upsert(
        &self,
        user_id: &str,
        tier: TierId,
        overrides: QuotaOverrides,
    ) -> EngineResult<UserRecord> {
        if user_id.trim().is_empty() {
            return Err(EngineError::Validation("User id cannot be empty".to_string()));
        }
        overrides.validate()?;

        sqlx::query(
            r#"
            INSERT INTO users (id, subscription_tier, max_products, max_audio_files,
                               max_playlists, max_qr_codes, max_slideshows, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                subscription_tier = excluded.subscription_tier,
                max_products = excluded.max_products,
                max_audio_files = excluded.max_audio_files,
                max_playlists = excluded.max_playlists,
                max_qr_codes = excluded.max_qr_codes,
                max_slideshows = excluded.max_slideshows
            "#,
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(overrides.max_products)
        .bind(overrides.max_audio_files)
        .bind(overrides.max_playlists)
        .bind(overrides.max_qr_codes)
        .bind(overrides.max_slideshows)
        .bind(to_db_timestamp(Utc::now()))
        .execute(&self.db)
        .await?;

        tracing::info!(user_id, tier = %tier, "user quota profile updated");
        self.get(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::migrated_pool;

    #[tokio::test]
    async fn test_upsert_then_get() {
        let (pool, _dir) = migrated_pool().await;
        let users = UserDirectory::new(pool);

        let created = users
            .upsert("u1", TierId::Free, QuotaOverrides::default())
            .await
            .unwrap();
        assert_eq!(created.tier, TierId::Free);

        let overrides = QuotaOverrides {
            max_products: Some(5),
            ..Default::default()
        };
        let updated = users.upsert("u1", TierId::Basic, overrides).await.unwrap();
        assert_eq!(updated.tier, TierId::Basic);
        assert_eq!(updated.overrides.max_products, Some(5));
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let (pool, _dir) = migrated_pool().await;
        let users = UserDirectory::new(pool);
        assert!(matches!(users.get("ghost").await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_stored_tier_reads_as_free() {
        let (pool, _dir) = migrated_pool().await;
        sqlx::query("INSERT INTO users (id, subscription_tier, created_at) VALUES ('legacy', 'gold', '2026-01-01T00:00:00.000Z')")
            .execute(&pool)
            .await
            .unwrap();

        let users = UserDirectory::new(pool);
        assert_eq!(users.get("legacy").await.unwrap().tier, TierId::Free);
    }
}
