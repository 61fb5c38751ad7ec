use actix_web::{Responder, get, web};
use common::{
    error::{AppError, Res},
    http::Success,
};

use crate::{AppState, dtos::access::AccessQuery};

/// Checks whether a user may perform a quota-limited action and consumes one
/// unit when allowed.
///
/// # Input
/// - `user_id` (or `userId`): the user's UUID
/// - `access_request`: `schedule_room` or `join_public_room`
///
/// # Output
/// - 200 with the access decision when allowed
/// - 403 with `{"error": reason}` when the quota is exhausted
/// - 400 for a missing or malformed query
#[get("/access")]
pub async fn get_access(
    state: web::Data<AppState>,
    query: web::Query<AccessQuery>,
) -> Res<impl Responder> {
    let (user_id, action) = query.validate()?;
    let decision = state.quota.check_and_consume(user_id, action).await?;
    if !decision.allowed {
        return Err(AppError::QuotaExceeded(
            decision
                .reason
                .unwrap_or_else(|| action.exhausted_reason().to_string()),
        ));
    }
    Success::ok(decision)
}
