/// Quota-gated resource endpoints
use crate::{
    auth::Caller,
    context::AppContext,
    error::EngineResult,
    quota::ResourceKind,
    resources::Resource,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/resources/:resource_kind", post(create_resource).get(list_resources))
        .route("/resources/:resource_kind/:id", delete(delete_resource))
}

#[derive(Deserialize)]
struct CreateResourceRequest {
    name: String,
}

async fn create_resource(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(kind): Path<String>,
    Json(req): Json<CreateResourceRequest>,
) -> EngineResult<(StatusCode, Json<Resource>)> {
    let kind: ResourceKind = kind.parse()?;
    let resource = ctx.resources.create(&caller.user_id, kind, &req.name).await?;
    Ok((StatusCode::CREATED, Json(resource)))
}

async fn list_resources(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(kind): Path<String>,
) -> EngineResult<Json<Vec<Resource>>> {
    let kind: ResourceKind = kind.parse()?;
    Ok(Json(ctx.resources.list(&caller.user_id, kind).await?))
}

async fn delete_resource(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path((kind, id)): Path<(String, String)>,
) -> EngineResult<StatusCode> {
    let kind: ResourceKind = kind.parse()?;
    ctx.resources.delete(&caller.user_id, kind, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
