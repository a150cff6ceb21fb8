/// Activation code registry: creation, administration and redemption
use super::{generate_code, validate_code, ActivationCode, ActivationCodeView, ContentType};
use crate::config::EngineConfig;
use crate::db::{retry_on_conflict, to_db_timestamp};
use crate::error::{EngineError, EngineResult};
use crate::ledger::{Entitlement, EntitlementLedger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;

const CODE_COLUMNS: &str =
    "id, code, content_id, content_type, max_uses, uses_count, expires_at, is_active, created_by, created_at";

/// Attempts at finding an unused generated code before giving up
const GENERATE_ATTEMPTS: u32 = 5;

/// Request to create a code for one content item
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivationCode {
    /// Creator-chosen code; generated when absent
    #[serde(default)]
    pub code: Option<String>,
    pub content_id: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub max_uses: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial administrator update. For `max_uses` and `expires_at` an explicit
/// `null` clears the field while an absent key leaves it untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdate {
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub max_uses: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Result of a redemption
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub entitlement: Entitlement,
    /// False when the caller already held this grant and no use was consumed
    pub newly_granted: bool,
}

#[derive(Clone)]
pub struct ActivationCodeRegistry {
    db: SqlitePool,
    config: EngineConfig,
}

impl ActivationCodeRegistry {
    pub fn new(db: SqlitePool, config: EngineConfig) -> Self {
        Self { db, config }
    }

    pub async fn create(&self, created_by: &str, req: NewActivationCode) -> EngineResult<ActivationCode> {
        let now = Utc::now();

        if req.content_id.trim().is_empty() {
            return Err(EngineError::Validation("contentId cannot be empty".to_string()));
        }
        if let Some(max_uses) = req.max_uses {
            if max_uses < 1 {
                return Err(EngineError::Validation("maxUses must be at least 1".to_string()));
            }
        }
        if let Some(expires_at) = req.expires_at {
            if expires_at <= now {
                return Err(EngineError::Validation("expiresAt must be in the future".to_string()));
            }
        }
        if let Some(code) = &req.code {
            validate_code(code)?;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let id = Uuid::new_v4().to_string();
            let code = req
                .code
                .clone()
                .unwrap_or_else(|| generate_code(self.config.code_length));

            let inserted = sqlx::query(
                r#"
                INSERT INTO activation_codes
                    (id, code, content_id, content_type, max_uses, uses_count, expires_at, is_active, created_by, created_at)
                VALUES (?, ?, ?, ?, ?, 0, ?, 1, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&code)
            .bind(&req.content_id)
            .bind(req.content_type.as_str())
            .bind(req.max_uses)
            .bind(req.expires_at.map(to_db_timestamp))
            .bind(created_by)
            .bind(to_db_timestamp(now))
            .execute(&self.db)
            .await;

            match inserted {
                Ok(_) => {
                    tracing::info!(
                        code_id = %id,
                        code = %code,
                        content_type = %req.content_type,
                        content_id = %req.content_id,
                        max_uses = ?req.max_uses,
                        "activation code created"
                    );
                    return self.get(&id).await;
                }
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    if req.code.is_some() {
                        return Err(EngineError::Validation(
                            "Activation code is already in use".to_string(),
                        ));
                    }
                    if attempt >= GENERATE_ATTEMPTS {
                        return Err(EngineError::Internal(
                            "Could not generate a unique activation code".to_string(),
                        ));
                    }
                    tracing::debug!(attempt, "generated activation code collided, regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn get(&self, id: &str) -> EngineResult<ActivationCode> {
        let sql = format!("SELECT {} FROM activation_codes WHERE id = ?", CODE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Activation code not found: {}", id)))?;

        ActivationCode::from_row(&row)
    }

    /// Exact, case-sensitive lookup by the shareable code
    pub async fn find_by_code(&self, code: &str) -> EngineResult<ActivationCode> {
        Self::fetch_by_code(&self.db, code)
            .await?
            .ok_or_else(|| EngineError::CodeNotFound(code.to_string()))
    }

    async fn fetch_by_code<'e, E>(executor: E, code: &str) -> EngineResult<Option<ActivationCode>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!("SELECT {} FROM activation_codes WHERE code = ?", CODE_COLUMNS);
        let row = sqlx::query(&sql).bind(code).fetch_optional(executor).await?;
        row.as_ref().map(ActivationCode::from_row).transpose()
    }

    pub async fn list_for_content(
        &self,
        content_type: ContentType,
        content_id: &str,
    ) -> EngineResult<Vec<ActivationCode>> {
        let sql = format!(
            "SELECT {} FROM activation_codes WHERE content_type = ? AND content_id = ? ORDER BY created_at DESC",
            CODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(content_type.as_str())
            .bind(content_id)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(ActivationCode::from_row).collect()
    }

    /// Toggle `is_active`, adjust `max_uses` or `expires_at`.
    ///
    /// Applied as one conditional statement so a concurrent redemption can
    /// never leave `uses_count` above a lowered `max_uses`. Existing
    /// entitlements keep their snapshot.
    pub async fn update(&self, id: &str, update: CodeUpdate) -> EngineResult<ActivationCode> {
        if let Some(Some(max_uses)) = update.max_uses {
            if max_uses < 1 {
                return Err(EngineError::Validation("maxUses must be at least 1".to_string()));
            }
        }

        let updated = retry_on_conflict(self.config.conflict_retries, "update_code", || {
            self.apply_update(id, &update)
        })
        .await?;

        match updated {
            Some(code) => {
                tracing::info!(
                    code_id = %code.id,
                    is_active = code.is_active,
                    max_uses = ?code.max_uses,
                    expires_at = ?code.expires_at,
                    "activation code updated"
                );
                Ok(code)
            }
            None => {
                let existing = self.get(id).await?;
                Err(EngineError::Validation(format!(
                    "maxUses cannot be lower than the {} uses already consumed",
                    existing.uses_count
                )))
            }
        }
    }

    async fn apply_update(&self, id: &str, update: &CodeUpdate) -> EngineResult<Option<ActivationCode>> {
        let max_uses = update.max_uses.flatten();
        let sql = format!(
            r#"
            UPDATE activation_codes SET
                is_active = COALESCE(?, is_active),
                max_uses = CASE WHEN ? THEN ? ELSE max_uses END,
                expires_at = CASE WHEN ? THEN ? ELSE expires_at END
            WHERE id = ? AND (? IS NULL OR uses_count <= ?)
            RETURNING {}
            "#,
            CODE_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(update.is_active)
            .bind(update.max_uses.is_some())
            .bind(max_uses)
            .bind(update.expires_at.is_some())
            .bind(update.expires_at.flatten().map(to_db_timestamp))
            .bind(id)
            .bind(max_uses)
            .bind(max_uses)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(ActivationCode::from_row).transpose()
    }

    /// Redeem `code` for `user_id`, retrying lost races a bounded number of times.
    pub async fn redeem(&self, code: &str, user_id: &str) -> EngineResult<Redemption> {
        if user_id.trim().is_empty() {
            return Err(EngineError::Validation("userId cannot be empty".to_string()));
        }

        retry_on_conflict(self.config.conflict_retries, "redeem", || {
            self.try_redeem(code, user_id)
        })
        .await
    }

    /// One redemption attempt as a single transaction.
    ///
    /// The conditional increment is the first statement, so it takes the write
    /// lock before anything is read and two redeemers of the last use cannot
    /// both succeed. The ledger row is inserted in the same transaction; a
    /// cancelled attempt rolls back both.
    async fn try_redeem(&self, code: &str, user_id: &str) -> EngineResult<Redemption> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let sql = format!(
            r#"
            UPDATE activation_codes
            SET uses_count = uses_count + 1
            WHERE code = ?
              AND is_active = 1
              AND (expires_at IS NULL OR expires_at >= ?)
              AND (max_uses IS NULL OR uses_count < max_uses)
            RETURNING {}
            "#,
            CODE_COLUMNS
        );
        let claimed = sqlx::query(&sql)
            .bind(code)
            .bind(to_db_timestamp(now))
            .fetch_optional(&mut *tx)
            .await?;

        let claimed = match claimed {
            Some(row) => ActivationCode::from_row(&row)?,
            None => {
                let existing = Self::fetch_by_code(&mut *tx, code).await?;
                tx.rollback().await?;
                return Err(Self::refusal(code, existing, now));
            }
        };

        if let Some(existing) =
            EntitlementLedger::find_by_user_and_code(&mut *tx, user_id, &claimed.id).await?
        {
            // Repeat redemption: give the use back by rolling back
            tx.rollback().await?;
            if !existing.is_active {
                tracing::info!(code_id = %claimed.id, user_id, "redemption refused, grant was revoked");
                return Err(EngineError::EntitlementRevoked);
            }
            tracing::debug!(code_id = %claimed.id, user_id, "repeat redemption, returning existing grant");
            return Ok(Redemption {
                entitlement: existing,
                newly_granted: false,
            });
        }

        let entitlement = EntitlementLedger::record(&mut *tx, user_id, &claimed, now).await?;
        tx.commit().await?;

        tracing::info!(
            code_id = %claimed.id,
            user_id,
            uses_count = claimed.uses_count,
            max_uses = ?claimed.max_uses,
            "activation code redeemed"
        );

        Ok(Redemption {
            entitlement,
            newly_granted: true,
        })
    }

    /// Explain why the conditional increment matched nothing.
    fn refusal(code: &str, existing: Option<ActivationCode>, now: DateTime<Utc>) -> EngineError {
        let Some(existing) = existing else {
            return EngineError::CodeNotFound(code.to_string());
        };
        let status = existing.status_at(now);
        tracing::info!(code_id = %existing.id, status = ?status, "redemption refused");
        status.redemption_error().unwrap_or_else(|| {
            // Status changed between the two statements' clocks; run again.
            EngineError::Conflict("activation code changed during redemption".to_string())
        })
    }

    pub fn view(code: ActivationCode) -> ActivationCodeView {
        code.view_at(Utc::now())
    }
}
