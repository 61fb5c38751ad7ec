use actix_web::{Responder, get, post, web};
use common::{error::Res, http::Success, plans::CURRENCY};

use crate::{
    AppState,
    dtos::pay::{InitializeQuery, PlansResponse, SettlementRequest},
    services,
};

/// Creates a gateway order for the plan a user is about to buy. The returned
/// order id is what the checkout widget is opened with.
#[get("/initialize")]
pub async fn get_initialize(
    state: web::Data<AppState>,
    query: web::Query<InitializeQuery>,
) -> Res<impl Responder> {
    let order = services::pay::initialize_payment(
        &state.catalog,
        state.gateway.as_ref(),
        &query.plan_id,
    )
    .await?;
    Success::ok(order)
}

/// Verifies the checkout callback and activates the subscription.
///
/// # Output
/// - 201 with the new subscription
/// - 400 on a signature mismatch or an unknown plan
/// - 409 when the payment was already settled
/// - 500 when settlement failed; the payment is refunded in the background
#[post("/verify")]
pub async fn post_verify(
    state: web::Data<AppState>,
    req: web::Json<SettlementRequest>,
) -> Res<impl Responder> {
    let subscription = services::pay::settle_payment(
        &state.settlement,
        &state.refunds,
        state.notifier.clone(),
        req.into_inner(),
    )
    .await?;
    Success::created(subscription)
}

#[get("/plans")]
pub async fn get_plans(state: web::Data<AppState>) -> Res<impl Responder> {
    Success::ok(PlansResponse {
        plans: state.catalog.all().into_iter().cloned().collect(),
        currency: CURRENCY,
    })
}
