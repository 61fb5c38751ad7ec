use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{
    error::{AppError, Res},
    plans::{CURRENCY, PERIOD_DAYS, Plan, PlanCatalog},
    signature::verify_payment_signature,
};
use db::{
    dtos::{subscription::SubscriptionCreateRequest, usage::UsagePeriodCreateRequest},
    models::{subscription::Subscription, usage::UsageCounters},
    store::{SettlementTx, Store},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    dtos::pay::SettlementRequest,
    misc::{
        gateway::{OrderHandle, PaymentGateway},
        notify::{Notification, Notifier, notify_detached},
    },
    services::refund::{PendingRefund, RefundQueue},
};

/// Result of a settlement attempt.
#[derive(Debug)]
pub enum SettlementOutcome {
    Settled(Subscription),
    /// Nothing was written and no money has to move.
    Rejected(AppError),
    /// Nothing was written but the captured payment must be refunded.
    RefundPending {
        error: AppError,
        refund: PendingRefund,
    },
    /// The signature did not verify. The refund the payment would be owed is
    /// kept for follow-up but never executed, since no capture is proven.
    Unverified { refund: PendingRefund },
}

/// Window of a new subscription. A renewal always starts when the prior
/// subscription for the same order ends.
pub fn renewal_window(
    prior: Option<&Subscription>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = prior.map_or(now, |prior| prior.valid_until);
    (start, start + Duration::days(PERIOD_DAYS))
}

/// Turns a verified payment into a subscription and its usage period.
pub struct SettlementEngine {
    store: Arc<dyn Store>,
    catalog: Arc<PlanCatalog>,
    signing_secret: String,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn Store>, catalog: Arc<PlanCatalog>, signing_secret: String) -> Self {
        Self {
            store,
            catalog,
            signing_secret,
        }
    }

    pub async fn settle(&self, req: SettlementRequest) -> SettlementOutcome {
        self.settle_at(req, Utc::now()).await
    }

    pub async fn settle_at(&self, req: SettlementRequest, now: DateTime<Utc>) -> SettlementOutcome {
        if let Err(e) = req.validate() {
            return SettlementOutcome::Rejected(e);
        }

        let plan = match self.catalog.purchasable(&req.plan_id) {
            Ok(plan) => plan.clone(),
            Err(e) => return SettlementOutcome::Rejected(e),
        };

        match self
            .store
            .subscription_by_payment_id(&req.gateway_payment_id)
            .await
        {
            Ok(Some(_)) => return already_settled(&req.gateway_payment_id),
            Ok(None) => {}
            Err(e) => return SettlementOutcome::Rejected(e),
        }

        let mut refund = PendingRefund {
            subscription_id: None,
            user_id: req.user_id,
            gateway_payment_id: req.gateway_payment_id.clone(),
            amount: plan.price,
        };

        if !verify_payment_signature(
            &self.signing_secret,
            &req.gateway_order_id,
            &req.gateway_payment_id,
            &req.gateway_signature,
        ) {
            return SettlementOutcome::Unverified { refund };
        }

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => return refund_pending(e, refund),
        };

        let written =
            write_subscription(&mut *tx, &req, &plan, now, &mut refund.subscription_id).await;
        let result = match written {
            Ok(subscription) => tx.commit().await.map(|()| subscription),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    log::error!(
                        "Rollback of settlement for payment {} failed: {}",
                        req.gateway_payment_id,
                        rollback
                    );
                }
                Err(e)
            }
        };

        match result {
            Ok(subscription) => {
                log::info!(
                    "Settled payment {} as {} subscription {} for user {} ({} to {})",
                    subscription.gateway_payment_id,
                    subscription.plan_type,
                    subscription.id,
                    subscription.user_id,
                    subscription.valid_from,
                    subscription.valid_until
                );
                SettlementOutcome::Settled(subscription)
            }
            // a concurrent callback for the same payment won
            Err(AppError::Conflict(_)) => already_settled(&req.gateway_payment_id),
            Err(e @ AppError::TransactionFailed(_)) => refund_pending(e, refund),
            Err(e) => refund_pending(
                AppError::TransactionFailed(format!(
                    "settlement of payment {} failed: {}",
                    req.gateway_payment_id, e
                )),
                refund,
            ),
        }
    }
}

async fn write_subscription(
    tx: &mut dyn SettlementTx,
    req: &SettlementRequest,
    plan: &Plan,
    now: DateTime<Utc>,
    inserted: &mut Option<Uuid>,
) -> Res<Subscription> {
    let prior = tx
        .subscription_by_user_order(&req.user_id, &req.order_id)
        .await?;
    let (valid_from, valid_until) = renewal_window(prior.as_ref(), now);

    let subscription = tx
        .insert_subscription(SubscriptionCreateRequest {
            user_id: req.user_id,
            plan_id: plan.id,
            plan_type: plan.name.clone(),
            order_id: req.order_id.clone(),
            gateway_order_id: req.gateway_order_id.clone(),
            gateway_payment_id: req.gateway_payment_id.clone(),
            gateway_signature: req.gateway_signature.clone(),
            valid_from,
            valid_until,
            purchase_date: now,
        })
        .await?;
    *inserted = Some(subscription.id);

    tx.insert_usage_period(UsagePeriodCreateRequest {
        user_id: req.user_id,
        subscription_id: Some(subscription.id),
        valid_from,
        valid_until,
        counters: UsageCounters::zero(),
    })
    .await?;

    Ok(subscription)
}

fn already_settled(payment_id: &str) -> SettlementOutcome {
    log::info!("Payment {} is already settled", payment_id);
    SettlementOutcome::Rejected(AppError::AlreadySettled(payment_id.to_string()))
}

fn refund_pending(error: AppError, refund: PendingRefund) -> SettlementOutcome {
    SettlementOutcome::RefundPending { error, refund }
}

/// Creates a gateway order for a purchasable plan.
pub async fn initialize_payment(
    catalog: &PlanCatalog,
    gateway: &dyn PaymentGateway,
    plan_id: &str,
) -> Res<OrderHandle> {
    let plan = catalog.purchasable(plan_id)?;
    let receipt = Uuid::new_v4().to_string();
    let order = gateway.create_order(plan.price, CURRENCY, &receipt).await?;
    log::info!(
        "Created order {} for {} plan ({} {})",
        order.id,
        plan.slug,
        order.amount,
        order.currency
    );
    Ok(order)
}

/// Settles a payment, queueing the refund when settlement failed after the
/// capture was verified.
pub async fn settle_payment(
    engine: &SettlementEngine,
    refunds: &RefundQueue,
    notifier: Arc<dyn Notifier>,
    req: SettlementRequest,
) -> Res<Subscription> {
    match engine.settle(req).await {
        SettlementOutcome::Settled(subscription) => {
            notify_detached(notifier, activated(&subscription));
            Ok(subscription)
        }
        SettlementOutcome::Rejected(error) => Err(error),
        SettlementOutcome::RefundPending { error, refund } => {
            log::error!(
                "Settlement of payment {} failed, queueing refund: {}",
                refund.gateway_payment_id,
                error
            );
            refunds.enqueue(refund);
            Err(error)
        }
        SettlementOutcome::Unverified { refund } => {
            log::warn!(
                "Signature mismatch for payment {} of user {}, refund of {} left unexecuted",
                refund.gateway_payment_id,
                refund.user_id,
                refund.amount
            );
            Err(AppError::SignatureMismatch)
        }
    }
}

fn activated(subscription: &Subscription) -> Notification {
    Notification {
        user_id: subscription.user_id,
        title: "Subscription activated".to_string(),
        message: format!(
            "Your {} plan is active until {}",
            subscription.plan_type,
            subscription.valid_until.format("%Y-%m-%d")
        ),
        data: json!({
            "subscription_id": subscription.id,
            "plan_type": subscription.plan_type,
            "valid_from": subscription.valid_from,
            "valid_until": subscription.valid_until,
        }),
        channels: vec!["in_app".to_string(), "email".to_string()],
        template_id: "subscription_activated".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::refund::refund_channel,
        testing::{self, FakeGateway, RecordingNotifier, SECRET},
    };
    use common::signature::payment_signature;
    use db::{
        memory::{FailPoint, MemoryStore},
        store::UsageStore,
    };

    fn engine(store: &MemoryStore) -> SettlementEngine {
        SettlementEngine::new(
            Arc::new(store.clone()),
            testing::catalog(),
            SECRET.to_string(),
        )
    }

    fn request(user_id: Uuid, payment_id: &str) -> SettlementRequest {
        SettlementRequest {
            user_id,
            plan_id: "basic".to_string(),
            order_id: "order_1".to_string(),
            gateway_order_id: "order_gw_1".to_string(),
            gateway_payment_id: payment_id.to_string(),
            gateway_signature: payment_signature(SECRET, "order_gw_1", payment_id),
        }
    }

    #[tokio::test]
    async fn settles_subscription_and_linked_period() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let outcome = engine(&store).settle_at(request(user_id, "pay_1"), now).await;
        let SettlementOutcome::Settled(subscription) = outcome else {
            panic!("expected a settlement, got {:?}", outcome);
        };
        assert_eq!(subscription.plan_type, "Basic");
        assert_eq!(subscription.valid_from, now);
        assert_eq!(subscription.valid_until, now + Duration::days(30));

        let periods = store.usage_periods();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].subscription_id, Some(subscription.id));
        assert_eq!(periods[0].valid_from, subscription.valid_from);
        assert_eq!(periods[0].valid_until, subscription.valid_until);
        assert_eq!(periods[0].counters().unwrap(), UsageCounters::zero());
    }

    #[tokio::test]
    async fn same_payment_settles_once() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let user_id = Uuid::new_v4();

        assert!(matches!(
            engine.settle(request(user_id, "pay_1")).await,
            SettlementOutcome::Settled(_)
        ));
        assert!(matches!(
            engine.settle(request(user_id, "pay_1")).await,
            SettlementOutcome::Rejected(AppError::AlreadySettled(_))
        ));
        assert_eq!(store.subscriptions().len(), 1);
        assert_eq!(store.usage_periods().len(), 1);
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected_without_writes() {
        let store = MemoryStore::new();
        let mut req = request(Uuid::new_v4(), "pay_1");
        req.gateway_signature = payment_signature(SECRET, "order_gw_1", "pay_2");

        let outcome = engine(&store).settle(req).await;
        let SettlementOutcome::Unverified { refund } = outcome else {
            panic!("expected an unverified outcome, got {:?}", outcome);
        };
        assert_eq!(refund.gateway_payment_id, "pay_1");
        assert_eq!(refund.amount, 149_00);
        assert_eq!(refund.subscription_id, None);
        assert!(store.subscriptions().is_empty());
        assert!(store.usage_periods().is_empty());
        assert!(store.refunds().is_empty());
    }

    #[tokio::test]
    async fn unverified_payment_is_not_queued_for_refund() {
        let store = MemoryStore::new();
        let (queue, mut pending) = refund_channel();
        let (notifier, _sent) = RecordingNotifier::new();
        let mut req = request(Uuid::new_v4(), "pay_1");
        req.gateway_signature = "0".repeat(64);

        let result = settle_payment(&engine(&store), &queue, Arc::new(notifier), req).await;
        assert!(matches!(result, Err(AppError::SignatureMismatch)));
        assert!(pending.try_recv().is_err());
    }

    #[tokio::test]
    async fn blank_identifiers_are_rejected_before_any_write() {
        let store = MemoryStore::new();
        let mut req = request(Uuid::nil(), "");
        req.order_id = String::new();
        req.gateway_order_id = String::new();
        req.gateway_signature = payment_signature(SECRET, "", "");

        assert!(matches!(
            engine(&store).settle(req).await,
            SettlementOutcome::Rejected(AppError::BadRequest(_))
        ));
        assert!(store.subscriptions().is_empty());
        assert!(store.usage_periods().is_empty());
    }

    #[tokio::test]
    async fn free_and_unknown_plans_are_rejected() {
        let store = MemoryStore::new();
        for plan_id in ["free", "platinum"] {
            let mut req = request(Uuid::new_v4(), "pay_1");
            req.plan_id = plan_id.to_string();
            assert!(matches!(
                engine(&store).settle(req).await,
                SettlementOutcome::Rejected(AppError::InvalidPlan(_))
            ));
        }
        assert!(store.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn renewal_starts_when_prior_subscription_ends() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let SettlementOutcome::Settled(first) = engine.settle_at(request(user_id, "pay_1"), now).await
        else {
            panic!("first settlement failed");
        };
        let later = now + Duration::days(10);
        let SettlementOutcome::Settled(renewal) =
            engine.settle_at(request(user_id, "pay_2"), later).await
        else {
            panic!("renewal failed");
        };

        assert_eq!(renewal.valid_from, first.valid_until);
        assert_eq!(renewal.valid_until, first.valid_until + Duration::days(30));
        assert_eq!(renewal.purchase_date, later);

        // still inside the first window, the first period stays current
        let current = store
            .current_usage_period(&user_id, later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.subscription_id, Some(first.id));
    }

    #[test]
    fn lapsed_subscription_still_chains_from_its_end() {
        let now = Utc::now();
        let prior_end = now - Duration::days(10);
        let prior = testing::subscription(
            Uuid::new_v4(),
            "Basic",
            "pay_0",
            prior_end - Duration::days(30),
            prior_end,
        );
        assert_eq!(
            renewal_window(Some(&prior), now),
            (prior_end, prior_end + Duration::days(30))
        );
        assert_eq!(renewal_window(None, now), (now, now + Duration::days(30)));
    }

    #[tokio::test]
    async fn renewal_after_lapse_chains_from_prior_end() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let SettlementOutcome::Settled(first) = engine.settle_at(request(user_id, "pay_1"), now).await
        else {
            panic!("first settlement failed");
        };
        let much_later = now + Duration::days(45);
        let SettlementOutcome::Settled(renewal) =
            engine.settle_at(request(user_id, "pay_2"), much_later).await
        else {
            panic!("renewal failed");
        };
        assert_eq!(renewal.valid_from, first.valid_until);
        assert_eq!(renewal.valid_until, first.valid_until + Duration::days(30));
    }

    #[tokio::test]
    async fn failure_after_subscription_insert_rolls_back_and_owes_refund() {
        let store = MemoryStore::new();
        store.fail_at(FailPoint::InsertUsagePeriod);
        let user_id = Uuid::new_v4();

        let outcome = engine(&store).settle(request(user_id, "pay_1")).await;
        let SettlementOutcome::RefundPending { error, refund } = outcome else {
            panic!("expected a pending refund, got {:?}", outcome);
        };
        assert!(matches!(error, AppError::TransactionFailed(_)));
        assert!(refund.subscription_id.is_some());
        assert_eq!(refund.gateway_payment_id, "pay_1");
        assert_eq!(refund.amount, 149_00);
        assert_eq!(refund.user_id, user_id);

        assert!(store.subscriptions().is_empty());
        assert!(store.usage_periods().is_empty());
    }

    #[tokio::test]
    async fn failed_begin_and_commit_owe_refund() {
        for point in [FailPoint::Begin, FailPoint::Commit] {
            let store = MemoryStore::new();
            store.fail_at(point);
            let outcome = engine(&store).settle(request(Uuid::new_v4(), "pay_1")).await;
            assert!(
                matches!(
                    outcome,
                    SettlementOutcome::RefundPending {
                        error: AppError::TransactionFailed(_),
                        ..
                    }
                ),
                "{:?}: {:?}",
                point,
                outcome
            );
            assert!(store.subscriptions().is_empty());
        }
    }

    #[tokio::test]
    async fn settle_payment_notifies_or_queues_refund() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let (queue, mut pending) = refund_channel();
        let (notifier, mut sent) = RecordingNotifier::new();
        let notifier: Arc<dyn Notifier> = Arc::new(notifier);
        let user_id = Uuid::new_v4();

        let subscription = settle_payment(&engine, &queue, notifier.clone(), request(user_id, "pay_1"))
            .await
            .unwrap();
        let notification = sent.recv().await.unwrap();
        assert_eq!(notification.user_id, user_id);
        assert_eq!(notification.data["subscription_id"], json!(subscription.id));

        store.fail_at(FailPoint::InsertSubscription);
        let result = settle_payment(&engine, &queue, notifier, request(user_id, "pay_2")).await;
        assert!(matches!(result, Err(AppError::TransactionFailed(_))));
        let refund = pending.try_recv().unwrap();
        assert_eq!(refund.gateway_payment_id, "pay_2");
        assert_eq!(refund.subscription_id, None);
    }

    #[tokio::test]
    async fn initialize_creates_order_for_plan_price() {
        let gateway = FakeGateway::new();
        let catalog = testing::catalog();

        let order = initialize_payment(&catalog, &gateway, "pro").await.unwrap();
        assert_eq!(order.amount, 399_00);
        assert_eq!(order.currency, "INR");

        assert!(matches!(
            initialize_payment(&catalog, &gateway, "free").await,
            Err(AppError::InvalidPlan(_))
        ));
        let orders = gateway.orders.lock().unwrap();
        assert_eq!(orders.len(), 1);
        assert!(Uuid::parse_str(&orders[0].2).is_ok());
    }
}
