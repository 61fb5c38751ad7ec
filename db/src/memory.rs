//! In-process store used by tests and local runs without Postgres.
//!
//! Mirrors the constraints the migrations declare: unique gateway payment ids
//! on subscriptions and refunds, and all-or-nothing settlement transactions.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    error::{AppError, Res},
    plans::{Limit, QuotaAction},
};
use uuid::Uuid;

use crate::{
    dtos::{
        refund::RefundCreateRequest, subscription::SubscriptionCreateRequest,
        usage::UsagePeriodCreateRequest,
    },
    models::{refund::Refund, subscription::Subscription, usage::UsagePeriod},
    store::{RefundStore, SettlementTx, SubscriptionStore, UsageStore},
};

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    InsertSubscription,
    InsertUsagePeriod,
    Commit,
    InsertRefund,
}

#[derive(Default)]
struct State {
    periods: Vec<UsagePeriod>,
    subscriptions: Vec<Subscription>,
    refunds: Vec<Refund>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_point: Arc<Mutex<Option<FailPoint>>>,
}

fn injected(point: FailPoint) -> AppError {
    AppError::Database(sqlx::Error::Protocol(format!("injected failure at {:?}", point)))
}

fn new_period(data: UsagePeriodCreateRequest) -> UsagePeriod {
    UsagePeriod {
        id: Uuid::new_v4(),
        user_id: data.user_id,
        subscription_id: data.subscription_id,
        valid_from: data.valid_from,
        valid_until: data.valid_until,
        usage_version: data.counters.version as i16,
        schedule_count: data.counters.schedule as i32,
        public_join_count: data.counters.public_join as i32,
        created_at: Utc::now(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next operation reaching `point` fail. Cleared once it fires.
    pub fn fail_at(&self, point: FailPoint) {
        *self.lock_fail_point() = Some(point);
    }

    pub fn usage_periods(&self) -> Vec<UsagePeriod> {
        self.lock().periods.clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock().subscriptions.clone()
    }

    pub fn refunds(&self) -> Vec<Refund> {
        self.lock().refunds.clone()
    }

    /// Writes a period directly, bypassing the engines. For seeding fixtures.
    pub fn put_usage_period(&self, period: UsagePeriod) {
        self.lock().periods.push(period);
    }

    pub fn put_subscription(&self, subscription: Subscription) {
        self.lock().subscriptions.push(subscription);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_fail_point(&self) -> MutexGuard<'_, Option<FailPoint>> {
        self.fail_point
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, point: FailPoint) -> Res<()> {
        let mut fail_point = self.lock_fail_point();
        if *fail_point == Some(point) {
            *fail_point = None;
            return Err(injected(point));
        }
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn current_usage_period(
        &self,
        user_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>> {
        let state = self.lock();
        Ok(state
            .periods
            .iter()
            .filter(|p| p.user_id == *user_id && p.is_current(now))
            .max_by_key(|p| (p.subscription_id.is_some(), p.valid_from))
            .cloned())
    }

    async fn latest_usage_period(&self, user_id: &Uuid) -> Res<Option<UsagePeriod>> {
        let state = self.lock();
        Ok(state
            .periods
            .iter()
            .filter(|p| p.user_id == *user_id)
            .max_by_key(|p| p.valid_from)
            .cloned())
    }

    async fn usage_periods_by_user(&self, user_id: &Uuid) -> Res<Vec<UsagePeriod>> {
        let state = self.lock();
        let mut periods: Vec<UsagePeriod> = state
            .periods
            .iter()
            .filter(|p| p.user_id == *user_id)
            .cloned()
            .collect();
        periods.sort_by(|a, b| b.valid_from.cmp(&a.valid_from));
        Ok(periods)
    }

    async fn open_usage_period(
        &self,
        data: UsagePeriodCreateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>> {
        let mut state = self.lock();
        if state
            .periods
            .iter()
            .any(|p| p.user_id == data.user_id && p.is_current(now))
        {
            return Ok(None);
        }
        let period = new_period(data);
        state.periods.push(period.clone());
        Ok(Some(period))
    }

    async fn try_consume(
        &self,
        period_id: &Uuid,
        action: QuotaAction,
        limit: Limit,
    ) -> Res<Option<UsagePeriod>> {
        let mut state = self.lock();
        let Some(period) = state.periods.iter_mut().find(|p| p.id == *period_id) else {
            return Ok(None);
        };
        let counter = match action {
            QuotaAction::ScheduleRoom => &mut period.schedule_count,
            QuotaAction::JoinPublicRoom => &mut period.public_join_count,
        };
        let used = u32::try_from(*counter).unwrap_or(0);
        if !limit.allows(used) {
            return Ok(None);
        }
        *counter += 1;
        Ok(Some(period.clone()))
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn subscription_by_id(&self, subscription_id: &Uuid) -> Res<Option<Subscription>> {
        let state = self.lock();
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.id == *subscription_id)
            .cloned())
    }

    async fn subscription_by_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Res<Option<Subscription>> {
        let state = self.lock();
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.gateway_payment_id == gateway_payment_id)
            .cloned())
    }

    async fn subscriptions_by_user(&self, user_id: &Uuid) -> Res<Vec<Subscription>> {
        let state = self.lock();
        let mut subscriptions: Vec<Subscription> = state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.purchase_date.cmp(&a.purchase_date));
        Ok(subscriptions)
    }

    async fn begin(&self) -> Res<Box<dyn SettlementTx>> {
        self.check(FailPoint::Begin)
            .map_err(|e| AppError::TransactionFailed(e.to_string()))?;
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            subscriptions: Vec::new(),
            periods: Vec::new(),
        }))
    }
}

#[async_trait]
impl RefundStore for MemoryStore {
    async fn refund_by_payment_id(&self, gateway_payment_id: &str) -> Res<Option<Refund>> {
        let state = self.lock();
        Ok(state
            .refunds
            .iter()
            .find(|r| r.gateway_payment_id == gateway_payment_id)
            .cloned())
    }

    async fn insert_refund(&self, data: RefundCreateRequest) -> Res<Refund> {
        self.check(FailPoint::InsertRefund)?;
        let mut state = self.lock();
        if state
            .refunds
            .iter()
            .any(|r| r.gateway_payment_id == data.gateway_payment_id)
        {
            return Err(AppError::Conflict("refund for this payment already exists".to_string()));
        }
        let refund = Refund {
            id: Uuid::new_v4(),
            subscription_id: data.subscription_id,
            user_id: data.user_id,
            gateway_payment_id: data.gateway_payment_id,
            gateway_refund_id: data.gateway_refund_id,
            amount: data.amount,
            created_at: Utc::now(),
        };
        state.refunds.push(refund.clone());
        Ok(refund)
    }
}

/// Buffers writes until commit.
pub struct MemoryTx {
    store: MemoryStore,
    subscriptions: Vec<Subscription>,
    periods: Vec<UsagePeriod>,
}

fn conflict() -> AppError {
    AppError::Conflict("subscription for this payment already exists".to_string())
}

#[async_trait]
impl SettlementTx for MemoryTx {
    async fn subscription_by_user_order(
        &mut self,
        user_id: &Uuid,
        order_id: &str,
    ) -> Res<Option<Subscription>> {
        let state = self.store.lock();
        Ok(state
            .subscriptions
            .iter()
            .chain(self.subscriptions.iter())
            .filter(|s| s.user_id == *user_id && s.order_id == order_id)
            .max_by_key(|s| s.valid_until)
            .cloned())
    }

    async fn insert_subscription(&mut self, data: SubscriptionCreateRequest) -> Res<Subscription> {
        self.store.check(FailPoint::InsertSubscription)?;
        let taken = {
            let state = self.store.lock();
            state
                .subscriptions
                .iter()
                .chain(self.subscriptions.iter())
                .any(|s| s.gateway_payment_id == data.gateway_payment_id)
        };
        if taken {
            return Err(conflict());
        }
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: data.user_id,
            plan_id: data.plan_id,
            plan_type: data.plan_type,
            order_id: data.order_id,
            gateway_order_id: data.gateway_order_id,
            gateway_payment_id: data.gateway_payment_id,
            gateway_signature: data.gateway_signature,
            valid_from: data.valid_from,
            valid_until: data.valid_until,
            purchase_date: data.purchase_date,
        };
        self.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn insert_usage_period(&mut self, data: UsagePeriodCreateRequest) -> Res<UsagePeriod> {
        self.store.check(FailPoint::InsertUsagePeriod)?;
        let period = new_period(data);
        self.periods.push(period.clone());
        Ok(period)
    }

    async fn commit(self: Box<Self>) -> Res<()> {
        self.store
            .check(FailPoint::Commit)
            .map_err(|e| AppError::TransactionFailed(e.to_string()))?;
        let MemoryTx {
            store,
            subscriptions,
            periods,
        } = *self;
        let mut state = store.lock();
        // a racing transaction may have committed the same payment meanwhile
        if subscriptions.iter().any(|staged| {
            state
                .subscriptions
                .iter()
                .any(|s| s.gateway_payment_id == staged.gateway_payment_id)
        }) {
            return Err(conflict());
        }
        state.subscriptions.extend(subscriptions);
        state.periods.extend(periods);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Res<()> {
        Ok(())
    }
}
