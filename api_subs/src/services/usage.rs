use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use common::{
    error::Res,
    plans::{PERIOD_DAYS, PlanCatalog},
};
use db::{
    models::{subscription::Subscription, usage::UsageCounters},
    store::Store,
};
use uuid::Uuid;

use crate::dtos::usage::{CurrentUsage, UsageHistoryEntry};

/// Usage of the period in force at `now`. Read only: a user without a period
/// gets a zeroed free view and nothing is written.
pub async fn current_usage(
    store: &dyn Store,
    catalog: &PlanCatalog,
    user_id: &Uuid,
    now: DateTime<Utc>,
) -> Res<CurrentUsage> {
    let Some(period) = store.current_usage_period(user_id, now).await? else {
        return Ok(CurrentUsage {
            period_id: None,
            plan_type: catalog.free().name.clone(),
            valid_from: now,
            valid_until: now + Duration::days(PERIOD_DAYS),
            usage: UsageCounters::zero(),
        });
    };

    let plan_type = match period.subscription_id {
        Some(id) => store
            .subscription_by_id(&id)
            .await?
            .map(|s| catalog.for_plan_type(&s.plan_type).name.clone()),
        None => None,
    }
    .unwrap_or_else(|| catalog.free().name.clone());

    Ok(CurrentUsage {
        period_id: Some(period.id),
        plan_type,
        valid_from: period.valid_from,
        valid_until: period.valid_until,
        usage: period.counters()?,
    })
}

pub async fn usage_history(
    store: &dyn Store,
    catalog: &PlanCatalog,
    user_id: &Uuid,
) -> Res<Vec<UsageHistoryEntry>> {
    let subscriptions = store.subscriptions_by_user(user_id).await?;
    let plan_types: HashMap<Uuid, &str> = subscriptions
        .iter()
        .map(|s| (s.id, catalog.for_plan_type(&s.plan_type).name.as_str()))
        .collect();

    store
        .usage_periods_by_user(user_id)
        .await?
        .into_iter()
        .map(|period| -> Res<UsageHistoryEntry> {
            let plan_type = period
                .subscription_id
                .and_then(|id| plan_types.get(&id).copied())
                .unwrap_or(catalog.free().name.as_str())
                .to_string();
            Ok(UsageHistoryEntry {
                period_id: period.id,
                subscription_id: period.subscription_id,
                plan_type,
                valid_from: period.valid_from,
                valid_until: period.valid_until,
                usage: period.counters()?,
            })
        })
        .collect()
}

pub async fn subscription_history(store: &dyn Store, user_id: &Uuid) -> Res<Vec<Subscription>> {
    store.subscriptions_by_user(user_id).await
}
