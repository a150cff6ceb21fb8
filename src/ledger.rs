/// Entitlement ledger
///
/// Durable record of which users hold access to which protected content.
/// Rows are written only by a successful redemption and removed only by an
/// explicit revocation.
use crate::codes::{ActivationCode, ContentType};
use crate::db::{parse_db_timestamp, parse_optional_timestamp, to_db_timestamp};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub id: String,
    pub user_id: String,
    pub code_id: String,
    pub content_id: String,
    pub content_type: ContentType,
    pub added_at: DateTime<Utc>,
    /// Snapshot of the code's expiry at redemption time
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Entitlement {
    fn from_row(row: &SqliteRow) -> EngineResult<Self> {
        let content_type: String = row.try_get("content_type")?;
        let added_at: String = row.try_get("added_at")?;

        Ok(Entitlement {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            code_id: row.try_get("code_id")?,
            content_id: row.try_get("content_id")?,
            content_type: content_type.parse()?,
            added_at: parse_db_timestamp(&added_at)?,
            expires_at: parse_optional_timestamp(row.try_get("expires_at")?)?,
            is_active: row.try_get("is_active")?,
        })
    }

    pub fn grants_access_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |at| now <= at)
    }

    pub fn view_at(self, now: DateTime<Utc>) -> EntitlementView {
        EntitlementView {
            grants_access: self.grants_access_at(now),
            entitlement: self,
        }
    }
}

/// An entitlement with whether it currently unlocks its content
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementView {
    #[serde(flatten)]
    pub entitlement: Entitlement,
    pub grants_access: bool,
}

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, code_id, content_id, content_type, added_at, expires_at, is_active FROM user_activation_codes";

#[derive(Clone)]
pub struct EntitlementLedger {
    db: SqlitePool,
}

impl EntitlementLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert the grant for a redemption. Runs on the redemption's own
    /// transaction so the row and the use-count increment commit together.
    pub(crate) async fn record(
        conn: &mut SqliteConnection,
        user_id: &str,
        code: &ActivationCode,
        now: DateTime<Utc>,
    ) -> EngineResult<Entitlement> {
        let entitlement = Entitlement {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            code_id: code.id.clone(),
            content_id: code.content_id.clone(),
            content_type: code.content_type,
            added_at: now,
            expires_at: code.expires_at,
            is_active: true,
        };

        sqlx::query(
            r#"
            INSERT INTO user_activation_codes
                (id, user_id, code_id, content_id, content_type, added_at, expires_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&entitlement.id)
        .bind(&entitlement.user_id)
        .bind(&entitlement.code_id)
        .bind(&entitlement.content_id)
        .bind(entitlement.content_type.as_str())
        .bind(to_db_timestamp(now))
        .bind(entitlement.expires_at.map(to_db_timestamp))
        .execute(conn)
        .await?;

        Ok(entitlement)
    }

    pub(crate) async fn find_by_user_and_code<'e, E>(
        executor: E,
        user_id: &str,
        code_id: &str,
    ) -> EngineResult<Option<Entitlement>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!("{} WHERE user_id = ? AND code_id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(code_id)
            .fetch_optional(executor)
            .await?;

        row.as_ref().map(Entitlement::from_row).transpose()
    }

    pub async fn get(&self, id: &str) -> EngineResult<Entitlement> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Entitlement not found: {}", id)))?;

        Entitlement::from_row(&row)
    }

    pub async fn list_for_user(&self, user_id: &str) -> EngineResult<Vec<Entitlement>> {
        let sql = format!("{} WHERE user_id = ? ORDER BY added_at DESC", SELECT_COLUMNS);
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.db).await?;

        rows.iter().map(Entitlement::from_row).collect()
    }

    /// "Remove Access". With `owner` set, only that user's own active row
    /// matches; a revoked row stays so the holder cannot redeem around it.
    pub async fn remove(&self, id: &str, owner: Option<&str>) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM user_activation_codes
            WHERE id = ? AND (? IS NULL OR (user_id = ? AND is_active = 1))
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(owner)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return match (self.get(id).await, owner) {
                (Ok(existing), Some(owner)) if existing.user_id == owner => {
                    Err(EngineError::EntitlementRevoked)
                }
                (Err(e), _) if !matches!(e, EngineError::NotFound(_)) => Err(e),
                _ => Err(EngineError::NotFound(format!("Entitlement not found: {}", id))),
            };
        }

        tracing::info!(entitlement_id = id, "entitlement removed");
        Ok(())
    }

    /// Per-user revoke or restore, independent of the code's own flag
    pub async fn set_active(&self, id: &str, is_active: bool) -> EngineResult<Entitlement> {
        let result = sqlx::query("UPDATE user_activation_codes SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("Entitlement not found: {}", id)));
        }

        tracing::info!(entitlement_id = id, is_active, "entitlement toggled");
        self.get(id).await
    }

    pub async fn has_access(
        &self,
        user_id: &str,
        content_type: ContentType,
        content_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let granted: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_activation_codes
                WHERE user_id = ? AND content_type = ? AND content_id = ?
                  AND is_active = 1
                  AND (expires_at IS NULL OR expires_at >= ?)
            )
            "#,
        )
        .bind(user_id)
        .bind(content_type.as_str())
        .bind(content_id)
        .bind(to_db_timestamp(now))
        .fetch_one(&self.db)
        .await?;

        Ok(granted != 0)
    }
}
