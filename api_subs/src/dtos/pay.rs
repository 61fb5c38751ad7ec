use common::{
    error::{AppError, Res},
    plans::Plan,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct InitializeQuery {
    pub plan_id: String,
}

/// Payment callback forwarded by the client after checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementRequest {
    pub user_id: Uuid,
    /// Slug or id of the plan that was bought.
    pub plan_id: String,
    /// Client side order reference; renewals reuse it.
    pub order_id: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
}

impl SettlementRequest {
    /// Rejects nil or blank identifiers before any lookup.
    pub fn validate(&self) -> Res<()> {
        if self.user_id.is_nil() {
            return Err(AppError::BadRequest("user_id must not be nil".to_string()));
        }
        for (field, value) in [
            ("plan_id", &self.plan_id),
            ("order_id", &self.order_id),
            ("gateway_order_id", &self.gateway_order_id),
            ("gateway_payment_id", &self.gateway_payment_id),
            ("gateway_signature", &self.gateway_signature),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::BadRequest(format!("{} is required", field)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub plans: Vec<Plan>,
    pub currency: &'static str,
}
