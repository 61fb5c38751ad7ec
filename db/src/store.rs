//! Storage seams the engines are written against.
//!
//! `PgStore` is the production implementation; `MemoryStore` keeps
//! everything in process and can inject failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{error::Res, plans::{Limit, QuotaAction}};
use uuid::Uuid;

use crate::{
    dtos::{
        refund::RefundCreateRequest, subscription::SubscriptionCreateRequest,
        usage::UsagePeriodCreateRequest,
    },
    models::{refund::Refund, subscription::Subscription, usage::UsagePeriod},
};

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn current_usage_period(
        &self,
        user_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>>;

    async fn latest_usage_period(&self, user_id: &Uuid) -> Res<Option<UsagePeriod>>;

    /// Newest first.
    async fn usage_periods_by_user(&self, user_id: &Uuid) -> Res<Vec<UsagePeriod>>;

    /// Inserts `data` unless the user already has a period containing `now`.
    /// `None` means another writer opened one first.
    async fn open_usage_period(
        &self,
        data: UsagePeriodCreateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>>;

    /// Atomic "increment if below limit". `None` means the counter was already
    /// at the limit and nothing changed.
    async fn try_consume(
        &self,
        period_id: &Uuid,
        action: QuotaAction,
        limit: Limit,
    ) -> Res<Option<UsagePeriod>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscription_by_id(&self, subscription_id: &Uuid) -> Res<Option<Subscription>>;

    async fn subscription_by_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Res<Option<Subscription>>;

    /// Newest first.
    async fn subscriptions_by_user(&self, user_id: &Uuid) -> Res<Vec<Subscription>>;

    /// Opens the transaction a settlement writes through.
    async fn begin(&self) -> Res<Box<dyn SettlementTx>>;
}

#[async_trait]
pub trait RefundStore: Send + Sync {
    async fn refund_by_payment_id(&self, gateway_payment_id: &str) -> Res<Option<Refund>>;

    async fn insert_refund(&self, data: RefundCreateRequest) -> Res<Refund>;
}

/// One atomic unit spanning subscriptions and usage periods. Dropping it
/// without `commit` discards everything written through it.
#[async_trait]
pub trait SettlementTx: Send {
    async fn subscription_by_user_order(
        &mut self,
        user_id: &Uuid,
        order_id: &str,
    ) -> Res<Option<Subscription>>;

    async fn insert_subscription(&mut self, data: SubscriptionCreateRequest) -> Res<Subscription>;

    async fn insert_usage_period(&mut self, data: UsagePeriodCreateRequest) -> Res<UsagePeriod>;

    async fn commit(self: Box<Self>) -> Res<()>;

    async fn rollback(self: Box<Self>) -> Res<()>;
}

pub trait Store: UsageStore + SubscriptionStore + RefundStore {}

impl<T: UsageStore + SubscriptionStore + RefundStore> Store for T {}
