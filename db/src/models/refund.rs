use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Refund {
    pub id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub user_id: Uuid,
    pub gateway_payment_id: String,
    pub gateway_refund_id: String,
    /// Minor units.
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}
