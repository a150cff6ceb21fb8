/// Entitlement endpoints: listing, revocation and access checks
use crate::{
    auth::{AdminCaller, Caller},
    codes::ContentType,
    context::AppContext,
    error::EngineResult,
    ledger::{Entitlement, EntitlementView},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/user-activation-codes", get(list_entitlements))
        .route(
            "/user-activation-codes/:id",
            patch(set_entitlement_active).delete(remove_entitlement),
        )
        .route("/access/:content_type/:content_id", get(check_access))
}

async fn list_entitlements(
    State(ctx): State<AppContext>,
    caller: Caller,
) -> EngineResult<Json<Vec<EntitlementView>>> {
    let now = Utc::now();
    let entitlements = ctx.ledger.list_for_user(&caller.user_id).await?;
    Ok(Json(entitlements.into_iter().map(|e| e.view_at(now)).collect()))
}

/// "Remove Access": holders drop their own active grants, admins drop anyone's
async fn remove_entitlement(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(id): Path<String>,
) -> EngineResult<StatusCode> {
    let owner = (!caller.is_admin).then_some(caller.user_id.as_str());
    ctx.ledger.remove(&id, owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetActiveRequest {
    is_active: bool,
}

async fn set_entitlement_active(
    State(ctx): State<AppContext>,
    AdminCaller(admin): AdminCaller,
    Path(id): Path<String>,
    Json(req): Json<SetActiveRequest>,
) -> EngineResult<Json<Entitlement>> {
    let entitlement = ctx.ledger.set_active(&id, req.is_active).await?;
    tracing::info!(admin = %admin.user_id, entitlement_id = %id, is_active = req.is_active, "admin toggled entitlement");
    Ok(Json(entitlement))
}

async fn check_access(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path((content_type, content_id)): Path<(String, String)>,
) -> EngineResult<Json<Value>> {
    let content_type: ContentType = content_type.parse()?;
    let has_access = ctx
        .ledger
        .has_access(&caller.user_id, content_type, &content_id, Utc::now())
        .await?;
    Ok(Json(json!({ "hasAccess": has_access })))
}
