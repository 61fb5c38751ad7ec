use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub plan_type: String,
    pub order_id: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    #[serde(skip_serializing)]
    pub gateway_signature: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub purchase_date: DateTime<Utc>,
}
