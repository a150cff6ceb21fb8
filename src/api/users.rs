/// User tier administration
use crate::{
    auth::{AdminCaller, Caller},
    context::AppContext,
    error::EngineResult,
    quota::{QuotaOverrides, TierId},
    users::UserRecord,
};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppContext> {
    Router::new().route("/users/:id", get(get_user).put(put_user))
}

async fn get_user(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(id): Path<String>,
) -> EngineResult<Json<UserRecord>> {
    caller.require_self_or_admin(&id)?;
    Ok(Json(ctx.users.get(&id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutUserRequest {
    subscription_tier: TierId,
    #[serde(default)]
    overrides: QuotaOverrides,
}

async fn put_user(
    State(ctx): State<AppContext>,
    AdminCaller(admin): AdminCaller,
    Path(id): Path<String>,
    Json(req): Json<PutUserRequest>,
) -> EngineResult<Json<UserRecord>> {
    let user = ctx
        .users
        .upsert(&id, req.subscription_tier, req.overrides)
        .await?;
    tracing::info!(admin = %admin.user_id, user_id = %id, tier = %user.tier, "admin set user tier");
    Ok(Json(user))
}
