use actix_web::{HttpRequest, Responder, get, web};
use chrono::Utc;
use common::{
    error::{AppError, Res},
    http::Success,
};
use uuid::Uuid;

use crate::{AppState, services};

/// Header the gateway in front of this service sets to the caller's id.
pub const USER_ID_HEADER: &str = "X-User-ID";

fn user_id(req: &HttpRequest) -> Res<Uuid> {
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{} header is required", USER_ID_HEADER)))?;
    Uuid::parse_str(raw)
        .map_err(|_| AppError::BadRequest(format!("invalid {} header", USER_ID_HEADER)))
}

#[get("/current")]
pub async fn get_current(state: web::Data<AppState>, req: HttpRequest) -> Res<impl Responder> {
    let user_id = user_id(&req)?;
    let usage = services::usage::current_usage(
        state.store.as_ref(),
        &state.catalog,
        &user_id,
        Utc::now(),
    )
    .await?;
    Success::ok(usage)
}

#[get("/previous")]
pub async fn get_previous(state: web::Data<AppState>, req: HttpRequest) -> Res<impl Responder> {
    let user_id = user_id(&req)?;
    let history =
        services::usage::usage_history(state.store.as_ref(), &state.catalog, &user_id).await?;
    Success::ok(history)
}

#[get("/previous-subscription")]
pub async fn get_previous_subscription(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Res<impl Responder> {
    let user_id = user_id(&req)?;
    let subscriptions =
        services::usage::subscription_history(state.store.as_ref(), &user_id).await?;
    Success::ok(subscriptions)
}
