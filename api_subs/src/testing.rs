//! Fixtures shared by the unit tests of this crate.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    error::{AppError, Res},
    plans::{PlanCatalog, PlanIds},
};
use db::models::{
    subscription::Subscription,
    usage::{USAGE_VERSION, UsagePeriod},
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::misc::{
    gateway::{OrderHandle, PaymentGateway, RefundHandle},
    notify::{Notification, Notifier},
};

pub const SECRET: &str = "test_signing_secret";

pub fn catalog() -> Arc<PlanCatalog> {
    Arc::new(PlanCatalog::new(PlanIds {
        free: Uuid::new_v4(),
        basic: Uuid::new_v4(),
        pro: Uuid::new_v4(),
    }))
}

pub fn period(
    user_id: Uuid,
    subscription_id: Option<Uuid>,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
) -> UsagePeriod {
    UsagePeriod {
        id: Uuid::new_v4(),
        user_id,
        subscription_id,
        valid_from,
        valid_until,
        usage_version: USAGE_VERSION,
        schedule_count: 0,
        public_join_count: 0,
        created_at: valid_from,
    }
}

pub fn subscription(
    user_id: Uuid,
    plan_type: &str,
    payment_id: &str,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        user_id,
        plan_id: Uuid::new_v4(),
        plan_type: plan_type.to_string(),
        order_id: "order_1".to_string(),
        gateway_order_id: "order_gw_1".to_string(),
        gateway_payment_id: payment_id.to_string(),
        gateway_signature: String::new(),
        valid_from,
        valid_until,
        purchase_date: valid_from,
    }
}

/// Gateway double counting calls, with optional refund failures and latency.
#[derive(Default)]
pub struct FakeGateway {
    pub orders: Mutex<Vec<(i64, String, String)>>,
    refund_calls: AtomicUsize,
    refund_failures_left: AtomicUsize,
    refund_delay: Option<Duration>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` refund calls fail.
    pub fn failing_refunds(n: usize) -> Self {
        let gateway = Self::default();
        gateway.refund_failures_left.store(n, Ordering::SeqCst);
        gateway
    }

    pub fn slow_refunds(delay: Duration) -> Self {
        Self {
            refund_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, amount: i64, currency: &str, receipt: &str) -> Res<OrderHandle> {
        let mut orders = self.orders.lock().unwrap();
        orders.push((amount, currency.to_string(), receipt.to_string()));
        Ok(OrderHandle {
            id: format!("order_{}", orders.len()),
            amount,
            currency: currency.to_string(),
            receipt: Some(receipt.to_string()),
            status: "created".to_string(),
        })
    }

    async fn refund(&self, payment_id: &str, amount: i64) -> Res<RefundHandle> {
        let call = self.refund_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.refund_delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .refund_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Gateway("gateway unavailable".to_string()));
        }
        Ok(RefundHandle {
            id: format!("rfnd_{}", call),
            payment_id: payment_id.to_string(),
            amount,
            status: "processed".to_string(),
        })
    }
}

/// Forwards every notification into a channel the test can await.
pub struct RecordingNotifier {
    sent: mpsc::UnboundedSender<Notification>,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sent, received) = mpsc::unbounded_channel();
        (Self { sent }, received)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Res<()> {
        self.sent
            .send(notification)
            .map_err(|e| AppError::Internal(e.to_string()))
    }
}
