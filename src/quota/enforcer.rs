/// Quota admission: read-only checks and the check-and-reserve transaction
use super::resolver::QuotaResolver;
use super::tiers::{ResourceKind, TierId};
use super::usage::UsageCounter;
use crate::db::to_db_timestamp;
use crate::error::{EngineError, EngineResult};
use crate::users::{UserDirectory, UserRecord};
use chrono::Utc;
use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

/// Outcome of a `can_create` evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub resource_kind: ResourceKind,
    pub tier: TierId,
    pub allowed: bool,
    pub limit: i64,
    pub current: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QuotaDecision {
    pub fn evaluate(user: &UserRecord, kind: ResourceKind, current: i64) -> Self {
        let limit = QuotaResolver::resolve(user, kind);
        let allowed = current < limit;
        Self {
            resource_kind: kind,
            tier: user.tier,
            allowed,
            limit,
            current,
            message: (!allowed).then(|| denial_message(kind, user.tier, limit)),
        }
    }

    fn into_error(self) -> EngineError {
        let message = self
            .message
            .unwrap_or_else(|| denial_message(self.resource_kind, self.tier, self.limit));
        EngineError::QuotaExceeded {
            kind: self.resource_kind,
            tier: self.tier,
            limit: self.limit,
            current: self.current,
            message,
        }
    }
}

/// User-facing text shown when a creation is refused
pub fn denial_message(kind: ResourceKind, tier: TierId, limit: i64) -> String {
    format!(
        "You have reached your {} limit ({}) for the {} plan. Upgrade your plan to create more {}.",
        kind.display_name(),
        limit,
        tier,
        kind.display_name()
    )
}

/// Per-user view across every resource kind
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSummary {
    pub user_id: String,
    pub tier: TierId,
    pub can_edit_playlists: bool,
    pub resources: Vec<QuotaDecision>,
}

/// An admitted creation. Holds the open transaction that validated the
/// limit; the resource row must be inserted through `connection()` and then
/// `commit()`ed. Dropping the reservation rolls everything back.
pub struct QuotaReservation {
    tx: Transaction<'static, Sqlite>,
    decision: QuotaDecision,
}

impl QuotaReservation {
    pub fn decision(&self) -> &QuotaDecision {
        &self.decision
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub async fn commit(self) -> EngineResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct QuotaEnforcer {
    db: SqlitePool,
    users: UserDirectory,
    usage: UsageCounter,
}

impl QuotaEnforcer {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            users: UserDirectory::new(db.clone()),
            usage: UsageCounter::new(db.clone()),
            db,
        }
    }

    /// Advisory check. Two callers may both see `allowed`; use `reserve`
    /// when the limit has to hold.
    pub async fn can_create(&self, user_id: &str, kind: ResourceKind) -> EngineResult<QuotaDecision> {
        let user = self.users.get(user_id).await?;
        let current = self.usage.current_usage(user_id, kind).await?;
        Ok(QuotaDecision::evaluate(&user, kind, current))
    }

    pub async fn summary(&self, user_id: &str) -> EngineResult<QuotaSummary> {
        let user = self.users.get(user_id).await?;
        let mut resources = Vec::with_capacity(ResourceKind::ALL.len());
        for kind in ResourceKind::ALL {
            let current = self.usage.current_usage(user_id, kind).await?;
            resources.push(QuotaDecision::evaluate(&user, kind, current));
        }

        Ok(QuotaSummary {
            user_id: user.id.clone(),
            tier: user.tier,
            can_edit_playlists: QuotaResolver::can_edit_playlists(&user),
            resources,
        })
    }

    /// Check-and-reserve.
    ///
    /// The first statement bumps the (user, kind) reservation row, which takes
    /// the store's write lock before anything is read. Every competing
    /// reservation therefore observes the count left by the previous one's
    /// committed insert, and at most `limit` live rows can exist.
    pub async fn reserve(&self, user_id: &str, kind: ResourceKind) -> EngineResult<QuotaReservation> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO quota_reservations (user_id, resource_kind, generation, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (user_id, resource_kind) DO UPDATE SET
                generation = generation + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(to_db_timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?;

        let user = UserDirectory::fetch(&mut *tx, user_id).await?;
        let current = UsageCounter::count(&mut *tx, user_id, kind).await?;
        let decision = QuotaDecision::evaluate(&user, kind, current);

        if !decision.allowed {
            tx.rollback().await?;
            tracing::info!(
                user_id,
                resource_kind = %kind,
                limit = decision.limit,
                current = decision.current,
                "creation denied by quota"
            );
            return Err(decision.into_error());
        }

        tracing::debug!(user_id, resource_kind = %kind, current, limit = decision.limit, "quota reserved");
        Ok(QuotaReservation { tx, decision })
    }
}
