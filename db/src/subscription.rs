use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{dtos::subscription::SubscriptionCreateRequest, models::subscription::Subscription};

pub async fn get_subscription_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    subscription_id: &Uuid,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
        .bind(subscription_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_subscription_by_payment_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    gateway_payment_id: &str,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE gateway_payment_id = $1")
        .bind(gateway_payment_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

/// Most recent subscription bought for the same `(user, order)` pair.
pub async fn get_subscription_by_user_order<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &Uuid,
    order_id: &str,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        r#"
        SELECT * FROM subscriptions
        WHERE user_id = $1 AND order_id = $2
        ORDER BY valid_until DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(order_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_subscriptions_by_user_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &Uuid,
) -> Res<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY purchase_date DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn insert_subscription<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: SubscriptionCreateRequest,
) -> Res<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (user_id, plan_id, plan_type, order_id, gateway_order_id, gateway_payment_id, gateway_signature, valid_from, valid_until, purchase_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(data.user_id)
    .bind(data.plan_id)
    .bind(data.plan_type)
    .bind(data.order_id)
    .bind(data.gateway_order_id)
    .bind(data.gateway_payment_id)
    .bind(data.gateway_signature)
    .bind(data.valid_from)
    .bind(data.valid_until)
    .bind(data.purchase_date)
    .fetch_one(executor)
    .await
    .map_err(|e| AppError::from_insert(e, "subscription for this payment"))
}
