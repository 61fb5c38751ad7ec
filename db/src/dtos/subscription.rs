use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct SubscriptionCreateRequest {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub plan_type: String,
    pub order_id: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub purchase_date: DateTime<Utc>,
}
