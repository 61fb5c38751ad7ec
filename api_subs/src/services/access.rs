use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{
    error::{AppError, Res},
    plans::{PERIOD_DAYS, Plan, PlanCatalog, QuotaAction},
};
use dashmap::DashMap;
use db::{
    dtos::usage::UsagePeriodCreateRequest,
    models::usage::{UsageCounters, UsagePeriod},
    store::Store,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dtos::access::AccessDecision;

/// Decides whether a user may perform a quota-limited action and records the
/// consumption.
///
/// Counter updates rely on the store's atomic conditional increment. Only the
/// first-request bootstrap of a free period takes an in-process lock, keyed
/// by user; the store's guarded insert covers other instances.
pub struct QuotaEngine {
    store: Arc<dyn Store>,
    catalog: Arc<PlanCatalog>,
    bootstrap_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl QuotaEngine {
    pub fn new(store: Arc<dyn Store>, catalog: Arc<PlanCatalog>) -> Self {
        Self {
            store,
            catalog,
            bootstrap_locks: DashMap::new(),
        }
    }

    pub async fn check_and_consume(&self, user_id: Uuid, action: QuotaAction) -> Res<AccessDecision> {
        self.check_and_consume_at(user_id, action, Utc::now()).await
    }

    pub async fn check_and_consume_at(
        &self,
        user_id: Uuid,
        action: QuotaAction,
        now: DateTime<Utc>,
    ) -> Res<AccessDecision> {
        if let Some(period) = self.store.current_usage_period(&user_id, now).await? {
            let plan = self.plan_for(&period).await?;
            return self.consume(period, plan, action).await;
        }

        let lock = self
            .bootstrap_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let decision = {
            let _guard = lock.lock().await;
            self.bootstrap(user_id, action, now).await
        };
        // the map and this call hold the only references when nobody waits
        self.bootstrap_locks
            .remove_if(&user_id, |_, entry| Arc::strong_count(entry) <= 2);
        decision
    }

    /// Plan of a period: the linked subscription's, free otherwise.
    async fn plan_for(&self, period: &UsagePeriod) -> Res<Plan> {
        let Some(subscription_id) = period.subscription_id else {
            return Ok(self.catalog.free().clone());
        };
        match self.store.subscription_by_id(&subscription_id).await? {
            Some(subscription) => Ok(self.catalog.for_plan_type(&subscription.plan_type).clone()),
            None => {
                log::warn!(
                    "Usage period {} references missing subscription {}, applying free plan",
                    period.id,
                    subscription_id
                );
                Ok(self.catalog.free().clone())
            }
        }
    }

    /// Applies `plan`'s limit for `action` to an existing period.
    async fn consume(
        &self,
        period: UsagePeriod,
        plan: Plan,
        action: QuotaAction,
    ) -> Res<AccessDecision> {
        let limit = plan.limits.for_action(action);
        let counters = period.counters()?;

        if !limit.allows(counters.get(action)) {
            return Ok(denied(plan, counters, action, false));
        }

        match self.store.try_consume(&period.id, action, limit).await? {
            Some(updated) => {
                let usage = updated.counters()?;
                log::debug!(
                    "Allowed {} for user {} on {} plan ({} used)",
                    action,
                    period.user_id,
                    plan.slug,
                    usage.get(action)
                );
                Ok(AccessDecision {
                    limit_left: limit.remaining(usage.get(action)),
                    plan,
                    allowed: true,
                    plan_expired: false,
                    reason: None,
                    usage,
                })
            }
            // lost a race for the last unit
            None => Ok(denied(plan, counters, action, false)),
        }
    }

    /// Opens a free period seeded with this request. Runs under the user's
    /// bootstrap lock.
    async fn bootstrap(
        &self,
        user_id: Uuid,
        action: QuotaAction,
        now: DateTime<Utc>,
    ) -> Res<AccessDecision> {
        if let Some(period) = self.store.current_usage_period(&user_id, now).await? {
            let plan = self.plan_for(&period).await?;
            return self.consume(period, plan, action).await;
        }

        let plan_expired = self
            .store
            .latest_usage_period(&user_id)
            .await?
            .is_some_and(|latest| latest.has_elapsed(now));
        let plan = self.catalog.free().clone();
        let limit = plan.limits.for_action(action);

        if !limit.allows(0) {
            return Ok(denied(plan, UsageCounters::zero(), action, plan_expired));
        }

        let opened = self
            .store
            .open_usage_period(
                UsagePeriodCreateRequest {
                    user_id,
                    subscription_id: None,
                    valid_from: now,
                    valid_until: now + Duration::days(PERIOD_DAYS),
                    counters: UsageCounters::seeded(action),
                },
                now,
            )
            .await?;
        let Some(period) = opened else {
            // another instance opened the period first
            return match self.store.current_usage_period(&user_id, now).await? {
                Some(period) => {
                    let plan = self.plan_for(&period).await?;
                    self.consume(period, plan, action).await
                }
                None => Err(AppError::Internal(format!(
                    "usage period for user {} vanished during bootstrap",
                    user_id
                ))),
            };
        };
        let usage = period.counters()?;
        log::info!(
            "Opened free usage period {} for user {} (plan expired: {})",
            period.id,
            user_id,
            plan_expired
        );

        Ok(AccessDecision {
            limit_left: limit.remaining(usage.get(action)),
            plan,
            allowed: true,
            plan_expired,
            reason: None,
            usage,
        })
    }
}

fn denied(plan: Plan, usage: UsageCounters, action: QuotaAction, plan_expired: bool) -> AccessDecision {
    log::debug!("Denied {} on {} plan: quota exhausted", action, plan.slug);
    AccessDecision {
        limit_left: plan.limits.for_action(action).remaining(usage.get(action)),
        plan,
        allowed: false,
        plan_expired,
        reason: Some(action.exhausted_reason().to_string()),
        usage,
    }
}
