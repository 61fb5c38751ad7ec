use uuid::Uuid;

pub struct RefundCreateRequest {
    pub subscription_id: Option<Uuid>,
    pub user_id: Uuid,
    pub gateway_payment_id: String,
    pub gateway_refund_id: String,
    pub amount: i64,
}
