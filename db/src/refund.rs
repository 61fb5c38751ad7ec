use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};

use crate::{dtos::refund::RefundCreateRequest, models::refund::Refund};

pub async fn get_refund_by_payment_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    gateway_payment_id: &str,
) -> Res<Option<Refund>> {
    sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE gateway_payment_id = $1")
        .bind(gateway_payment_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn insert_refund<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: RefundCreateRequest,
) -> Res<Refund> {
    sqlx::query_as::<_, Refund>(
        r#"
        INSERT INTO refunds (subscription_id, user_id, gateway_payment_id, gateway_refund_id, amount)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(data.subscription_id)
    .bind(data.user_id)
    .bind(data.gateway_payment_id)
    .bind(data.gateway_refund_id)
    .bind(data.amount)
    .fetch_one(executor)
    .await
    .map_err(|e| AppError::from_insert(e, "refund for this payment"))
}
