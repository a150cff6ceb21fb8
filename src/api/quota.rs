/// Quota endpoints
use crate::{
    auth::Caller,
    context::AppContext,
    error::EngineResult,
    quota::{QuotaDecision, QuotaSummary, ResourceKind, SubscriptionTier, TierCatalog},
};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/quota", get(quota_summary))
        .route("/quota/:resource_kind/can-create", get(can_create))
        .route("/tiers", get(list_tiers))
}

async fn can_create(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(kind): Path<String>,
) -> EngineResult<Json<QuotaDecision>> {
    let kind: ResourceKind = kind.parse()?;
    Ok(Json(ctx.quota.can_create(&caller.user_id, kind).await?))
}

async fn quota_summary(
    State(ctx): State<AppContext>,
    caller: Caller,
) -> EngineResult<Json<QuotaSummary>> {
    Ok(Json(ctx.quota.summary(&caller.user_id).await?))
}

async fn list_tiers() -> Json<&'static [SubscriptionTier]> {
    Json(TierCatalog::all())
}
