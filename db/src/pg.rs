use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    error::{AppError, Res},
    plans::{Limit, QuotaAction},
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    dtos::{
        refund::RefundCreateRequest, subscription::SubscriptionCreateRequest,
        usage::UsagePeriodCreateRequest,
    },
    models::{refund::Refund, subscription::Subscription, usage::UsagePeriod},
    store::{RefundStore, SettlementTx, SubscriptionStore, UsageStore},
};

#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgStore {
    async fn current_usage_period(
        &self,
        user_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>> {
        crate::usage::get_current_usage_period(&*self.pool, user_id, now).await
    }

    async fn latest_usage_period(&self, user_id: &Uuid) -> Res<Option<UsagePeriod>> {
        crate::usage::get_latest_usage_period(&*self.pool, user_id).await
    }

    async fn usage_periods_by_user(&self, user_id: &Uuid) -> Res<Vec<UsagePeriod>> {
        crate::usage::get_usage_periods_by_user_id(&*self.pool, user_id).await
    }

    async fn open_usage_period(
        &self,
        data: UsagePeriodCreateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>> {
        let mut tx = self.pool.begin().await?;
        crate::usage::lock_user_periods(&mut *tx, &data.user_id).await?;
        if crate::usage::get_current_usage_period(&mut *tx, &data.user_id, now)
            .await?
            .is_some()
        {
            tx.commit().await?;
            return Ok(None);
        }
        let period = crate::usage::insert_usage_period(&mut *tx, data).await?;
        tx.commit().await?;
        Ok(Some(period))
    }

    async fn try_consume(
        &self,
        period_id: &Uuid,
        action: QuotaAction,
        limit: Limit,
    ) -> Res<Option<UsagePeriod>> {
        crate::usage::increment_usage(&*self.pool, period_id, action, limit).await
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn subscription_by_id(&self, subscription_id: &Uuid) -> Res<Option<Subscription>> {
        crate::subscription::get_subscription_by_id(&*self.pool, subscription_id).await
    }

    async fn subscription_by_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Res<Option<Subscription>> {
        crate::subscription::get_subscription_by_payment_id(&*self.pool, gateway_payment_id).await
    }

    async fn subscriptions_by_user(&self, user_id: &Uuid) -> Res<Vec<Subscription>> {
        crate::subscription::get_subscriptions_by_user_id(&*self.pool, user_id).await
    }

    async fn begin(&self) -> Res<Box<dyn SettlementTx>> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::TransactionFailed(format!("failed to start a transaction: {}", e))
        })?;
        Ok(Box::new(PgSettlementTx { tx }))
    }
}

#[async_trait]
impl RefundStore for PgStore {
    async fn refund_by_payment_id(&self, gateway_payment_id: &str) -> Res<Option<Refund>> {
        crate::refund::get_refund_by_payment_id(&*self.pool, gateway_payment_id).await
    }

    async fn insert_refund(&self, data: RefundCreateRequest) -> Res<Refund> {
        crate::refund::insert_refund(&*self.pool, data).await
    }
}

pub struct PgSettlementTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SettlementTx for PgSettlementTx {
    async fn subscription_by_user_order(
        &mut self,
        user_id: &Uuid,
        order_id: &str,
    ) -> Res<Option<Subscription>> {
        crate::subscription::get_subscription_by_user_order(&mut *self.tx, user_id, order_id).await
    }

    async fn insert_subscription(&mut self, data: SubscriptionCreateRequest) -> Res<Subscription> {
        crate::subscription::insert_subscription(&mut *self.tx, data).await
    }

    async fn insert_usage_period(&mut self, data: UsagePeriodCreateRequest) -> Res<UsagePeriod> {
        crate::usage::insert_usage_period(&mut *self.tx, data).await
    }

    async fn commit(self: Box<Self>) -> Res<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::TransactionFailed(format!("failed to commit: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> Res<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| AppError::TransactionFailed(format!("failed to roll back: {}", e)))
    }
}
