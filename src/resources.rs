/// Quota-gated resource rows
///
/// The creation surface for products, media files, playlists, QR codes and
/// slideshows. Every insert goes through a quota reservation; deletes are soft
/// and free quota as soon as they commit.
use crate::config::EngineConfig;
use crate::db::{parse_db_timestamp, retry_on_conflict, to_db_timestamp};
use crate::error::{EngineError, EngineResult};
use crate::quota::{QuotaEnforcer, ResourceKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

const MAX_NAME_LENGTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub user_id: String,
    pub kind: ResourceKind,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    fn from_row(kind: ResourceKind, row: &SqliteRow) -> EngineResult<Self> {
        let created_at: String = row.try_get("created_at")?;
        Ok(Resource {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind,
            name: row.try_get("name")?,
            created_at: parse_db_timestamp(&created_at)?,
        })
    }
}

#[derive(Clone)]
pub struct ResourceStore {
    db: SqlitePool,
    quota: QuotaEnforcer,
    retries: u32,
}

impl ResourceStore {
    pub fn new(db: SqlitePool, quota: QuotaEnforcer, config: &EngineConfig) -> Self {
        Self {
            db,
            quota,
            retries: config.conflict_retries,
        }
    }

    /// Create a row of `kind` for `user_id` if the resolved limit allows it.
    pub async fn create(&self, user_id: &str, kind: ResourceKind, name: &str) -> EngineResult<Resource> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("Name cannot be empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(EngineError::Validation(format!(
                "Name must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }

        retry_on_conflict(self.retries, "create_resource", || {
            self.try_create(user_id, kind, name)
        })
        .await
    }

    async fn try_create(&self, user_id: &str, kind: ResourceKind, name: &str) -> EngineResult<Resource> {
        let mut reservation = self.quota.reserve(user_id, kind).await?;

        let id = Uuid::new_v4().to_string();
        let created_at = to_db_timestamp(Utc::now());
        let sql = format!(
            "INSERT INTO {} (id, user_id, name, created_at) VALUES (?, ?, ?, ?)",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(&id)
            .bind(user_id)
            .bind(name)
            .bind(&created_at)
            .execute(reservation.connection())
            .await?;

        let current = reservation.decision().current + 1;
        let limit = reservation.decision().limit;
        reservation.commit().await?;

        tracing::info!(user_id, resource_kind = %kind, resource_id = %id, current, limit, "resource created");

        Ok(Resource {
            id,
            user_id: user_id.to_string(),
            kind,
            name: name.to_string(),
            created_at: parse_db_timestamp(&created_at)?,
        })
    }

    /// Soft delete. Only the owner's live rows match.
    pub async fn delete(&self, user_id: &str, kind: ResourceKind, id: &str) -> EngineResult<()> {
        let sql = format!(
            "UPDATE {} SET deleted_at = ? WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(to_db_timestamp(Utc::now()))
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("{} not found: {}", kind, id)));
        }

        tracing::info!(user_id, resource_kind = %kind, resource_id = id, "resource deleted");
        Ok(())
    }

    pub async fn list(&self, user_id: &str, kind: ResourceKind) -> EngineResult<Vec<Resource>> {
        let sql = format!(
            "SELECT id, user_id, name, created_at FROM {} WHERE user_id = ? AND deleted_at IS NULL ORDER BY created_at",
            kind.table()
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.db).await?;

        rows.iter().map(|row| Resource::from_row(kind, row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::migrated_pool;
    use crate::quota::{QuotaOverrides, TierId};
    use crate::users::UserDirectory;
    use futures::future::join_all;

    async fn store_with_user(tier: TierId) -> (ResourceStore, tempfile::TempDir) {
        let (pool, dir) = migrated_pool().await;
        UserDirectory::new(pool.clone())
            .upsert("u", tier, QuotaOverrides::default())
            .await
            .unwrap();
        let config = EngineConfig {
            conflict_retries: 10,
            ..EngineConfig::default()
        };
        let store = ResourceStore::new(pool.clone(), QuotaEnforcer::new(pool), &config);
        (store, dir)
    }

    #[tokio::test]
    async fn test_create_until_limit() {
        let (store, _dir) = store_with_user(TierId::Free).await;

        let created = store.create("u", ResourceKind::Playlists, "Road trip").await.unwrap();
        assert_eq!(created.kind, ResourceKind::Playlists);

        let denied = store.create("u", ResourceKind::Playlists, "Another").await;
        match denied {
            Err(EngineError::QuotaExceeded { message, .. }) => {
                assert!(message.contains("playlists limit (1) for the free plan"));
            }
            other => panic!("expected QuotaExceeded, got {:?}", other),
        }
        assert_eq!(store.list("u", ResourceKind::Playlists).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_frees_quota() {
        let (store, _dir) = store_with_user(TierId::Free).await;

        let qr = store.create("u", ResourceKind::QrCodes, "Flyer").await.unwrap();
        assert!(store.create("u", ResourceKind::QrCodes, "Poster").await.is_err());

        store.delete("u", ResourceKind::QrCodes, &qr.id).await.unwrap();
        store.create("u", ResourceKind::QrCodes, "Poster").await.unwrap();

        assert!(matches!(
            store.delete("u", ResourceKind::QrCodes, &qr.id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_scoped_to_owner() {
        let (store, _dir) = store_with_user(TierId::Basic).await;
        let slideshow = store.create("u", ResourceKind::Slideshows, "Gallery").await.unwrap();

        assert!(matches!(
            store.delete("someone-else", ResourceKind::Slideshows, &slideshow.id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_blank_names() {
        let (store, _dir) = store_with_user(TierId::Basic).await;
        assert!(matches!(
            store.create("u", ResourceKind::Products, "   ").await,
            Err(EngineError::Validation(_))
        ));
        let long = "x".repeat(MAX_NAME_LENGTH + 1);
        assert!(matches!(
            store.create("u", ResourceKind::Products, &long).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_two_simultaneous_creates_at_last_slot() {
        let (store, _dir) = store_with_user(TierId::Free).await;

        let (a, b) = tokio::join!(
            store.create("u", ResourceKind::Products, "First"),
            store.create("u", ResourceKind::Products, "Second")
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        assert!(
            matches!(a, Err(EngineError::QuotaExceeded { .. }))
                || matches!(b, Err(EngineError::QuotaExceeded { .. }))
        );
        assert_eq!(store.list("u", ResourceKind::Products).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_exceed_limit() {
        let (store, _dir) = store_with_user(TierId::Basic).await;

        let attempts = (0..20).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create("u", ResourceKind::Products, &format!("product {}", i))
                    .await
            })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(EngineError::QuotaExceeded { .. }))));
        assert_eq!(store.list("u", ResourceKind::Products).await.unwrap().len(), 10);
    }
}
