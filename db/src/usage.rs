use chrono::{DateTime, Utc};
use common::{
    error::{AppError, Res},
    plans::{Limit, QuotaAction},
};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{dtos::usage::UsagePeriodCreateRequest, models::usage::UsagePeriod};

/// Period whose window contains `now`. A subscription-backed period wins over
/// a free one covering the same instant.
pub async fn get_current_usage_period<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &Uuid,
    now: DateTime<Utc>,
) -> Res<Option<UsagePeriod>> {
    sqlx::query_as::<_, UsagePeriod>(
        r#"
        SELECT * FROM usage_periods
        WHERE user_id = $1 AND valid_from <= $2 AND valid_until > $2
        ORDER BY (subscription_id IS NOT NULL) DESC, valid_from DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_latest_usage_period<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &Uuid,
) -> Res<Option<UsagePeriod>> {
    sqlx::query_as::<_, UsagePeriod>(
        "SELECT * FROM usage_periods WHERE user_id = $1 ORDER BY valid_from DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_usage_periods_by_user_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &Uuid,
) -> Res<Vec<UsagePeriod>> {
    sqlx::query_as::<_, UsagePeriod>(
        "SELECT * FROM usage_periods WHERE user_id = $1 ORDER BY valid_from DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn insert_usage_period<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: UsagePeriodCreateRequest,
) -> Res<UsagePeriod> {
    sqlx::query_as::<_, UsagePeriod>(
        r#"
        INSERT INTO usage_periods (user_id, subscription_id, valid_from, valid_until, usage_version, schedule_count, public_join_count)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(data.user_id)
    .bind(data.subscription_id)
    .bind(data.valid_from)
    .bind(data.valid_until)
    .bind(data.counters.version as i16)
    .bind(data.counters.schedule as i32)
    .bind(data.counters.public_join as i32)
    .fetch_one(executor)
    .await
    .map_err(|e| AppError::from_insert(e, "usage period"))
}

/// Serializes usage period creation for one user across every connection
/// until the surrounding transaction ends.
pub async fn lock_user_periods<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &Uuid,
) -> Res<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(user_id.to_string())
        .execute(executor)
        .await
        .map(|_| ())
        .map_err(AppError::from)
}

/// Increments the counter of `action` by one, but only while it is below
/// `limit`. Returns the updated row, or `None` when the guard did not hold.
pub async fn increment_usage<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    period_id: &Uuid,
    action: QuotaAction,
    limit: Limit,
) -> Res<Option<UsagePeriod>> {
    let query = match action {
        QuotaAction::ScheduleRoom => {
            r#"
            UPDATE usage_periods SET schedule_count = schedule_count + 1
            WHERE id = $1 AND ($2::INTEGER IS NULL OR schedule_count < $2)
            RETURNING *
            "#
        }
        QuotaAction::JoinPublicRoom => {
            r#"
            UPDATE usage_periods SET public_join_count = public_join_count + 1
            WHERE id = $1 AND ($2::INTEGER IS NULL OR public_join_count < $2)
            RETURNING *
            "#
        }
    };
    let ceiling: Option<i32> = match limit {
        Limit::Capped(max) => Some(i32::try_from(max).unwrap_or(i32::MAX)),
        Limit::Unlimited => None,
    };

    sqlx::query_as::<_, UsagePeriod>(query)
        .bind(period_id)
        .bind(ceiling)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}
