/// Activation code endpoints: creation, administration and redemption
use crate::{
    auth::Caller,
    codes::{ActivationCodeRegistry, ActivationCodeView, CodeUpdate, ContentType, NewActivationCode, Redemption},
    context::AppContext,
    error::{EngineError, EngineResult},
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/activation-codes", post(create_code).get(list_codes))
        .route("/activation-codes/:id", get(get_code).patch(update_code))
        // Same segment as :id; here it carries the shareable code
        .route("/activation-codes/:id/redeem", post(redeem_code))
}

async fn create_code(
    State(ctx): State<AppContext>,
    caller: Caller,
    Json(req): Json<NewActivationCode>,
) -> EngineResult<(StatusCode, Json<ActivationCodeView>)> {
    let code = ctx.codes.create(&caller.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(ActivationCodeRegistry::view(code))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCodesQuery {
    content_type: ContentType,
    content_id: String,
}

async fn list_codes(
    State(ctx): State<AppContext>,
    _caller: Caller,
    Query(query): Query<ListCodesQuery>,
) -> EngineResult<Json<Vec<ActivationCodeView>>> {
    let codes = ctx
        .codes
        .list_for_content(query.content_type, &query.content_id)
        .await?;
    Ok(Json(codes.into_iter().map(ActivationCodeRegistry::view).collect()))
}

async fn get_code(
    State(ctx): State<AppContext>,
    _caller: Caller,
    Path(id): Path<String>,
) -> EngineResult<Json<ActivationCodeView>> {
    let code = ctx.codes.get(&id).await?;
    Ok(Json(ActivationCodeRegistry::view(code)))
}

/// Creator or admin only
async fn update_code(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(id): Path<String>,
    Json(update): Json<CodeUpdate>,
) -> EngineResult<Json<ActivationCodeView>> {
    let existing = ctx.codes.get(&id).await?;
    if !caller.is_admin && existing.created_by != caller.user_id {
        return Err(EngineError::Authorization(
            "Only the code's creator or an administrator can change it".to_string(),
        ));
    }

    let code = ctx.codes.update(&id, update).await?;
    Ok(Json(ActivationCodeRegistry::view(code)))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RedeemRequest {
    user_id: Option<String>,
}

async fn redeem_code(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(code): Path<String>,
    body: Bytes,
) -> EngineResult<(StatusCode, Json<Redemption>)> {
    // An empty body redeems for the caller
    let req: RedeemRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RedeemRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| EngineError::Validation(format!("Invalid request body: {}", e)))?
    };
    let user_id = req.user_id.unwrap_or_else(|| caller.user_id.clone());
    caller.require_self_or_admin(&user_id)?;

    let redemption = ctx.codes.redeem(&code, &user_id).await?;
    let status = if redemption.newly_granted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(redemption)))
}
