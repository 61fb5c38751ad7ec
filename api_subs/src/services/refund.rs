use std::{sync::Arc, time::Duration};

use common::{
    env_config::RetryPolicy,
    error::{AppError, Res},
};
use db::{
    dtos::refund::RefundCreateRequest,
    models::refund::Refund,
    store::Store,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::misc::gateway::{PaymentGateway, RefundHandle};

/// A captured payment that has to be returned because its settlement failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRefund {
    /// Set when the subscription row was written before the rollback.
    pub subscription_id: Option<Uuid>,
    pub user_id: Uuid,
    pub gateway_payment_id: String,
    /// Minor units.
    pub amount: i64,
}

#[derive(Debug)]
pub enum RefundResult {
    Refunded(Refund),
    AlreadyRefunded,
}

/// Sending half of the refund queue.
#[derive(Clone)]
pub struct RefundQueue {
    sender: mpsc::UnboundedSender<PendingRefund>,
}

impl RefundQueue {
    pub fn enqueue(&self, refund: PendingRefund) {
        if let Err(e) = self.sender.send(refund) {
            log::error!(
                "Refund worker is gone, refund of payment {} ({} minor units, user {}) was not queued",
                e.0.gateway_payment_id,
                e.0.amount,
                e.0.user_id
            );
        }
    }
}

pub fn refund_channel() -> (RefundQueue, mpsc::UnboundedReceiver<PendingRefund>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (RefundQueue { sender }, receiver)
}

/// Issues compensating refunds in the background.
#[derive(Clone)]
pub struct RefundWorker {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RefundWorker {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
            timeout,
        }
    }

    /// One attempt, without retries.
    pub async fn process(&self, refund: &PendingRefund) -> Res<RefundResult> {
        let mut issued = None;
        self.attempt(refund, &mut issued).await
    }

    /// Looks up, refunds, records. `issued` survives across attempts so a
    /// payment is refunded at the gateway once even if recording fails.
    async fn attempt(
        &self,
        refund: &PendingRefund,
        issued: &mut Option<RefundHandle>,
    ) -> Res<RefundResult> {
        if self
            .store
            .refund_by_payment_id(&refund.gateway_payment_id)
            .await?
            .is_some()
        {
            log::info!("Payment {} already refunded", refund.gateway_payment_id);
            return Ok(RefundResult::AlreadyRefunded);
        }

        let handle = match issued.take() {
            Some(handle) => handle,
            None => tokio::time::timeout(
                self.timeout,
                self.gateway.refund(&refund.gateway_payment_id, refund.amount),
            )
            .await
            .map_err(|_| {
                AppError::Gateway(format!(
                    "refund of payment {} timed out after {:?}",
                    refund.gateway_payment_id, self.timeout
                ))
            })??,
        };
        let gateway_refund_id = handle.id.clone();
        *issued = Some(handle);

        let result = self
            .store
            .insert_refund(RefundCreateRequest {
                subscription_id: refund.subscription_id,
                user_id: refund.user_id,
                gateway_payment_id: refund.gateway_payment_id.clone(),
                gateway_refund_id,
                amount: refund.amount,
            })
            .await;

        match result {
            Ok(record) => {
                log::info!(
                    "Refunded payment {} ({} minor units) for user {} as {}",
                    record.gateway_payment_id,
                    record.amount,
                    record.user_id,
                    record.gateway_refund_id
                );
                Ok(RefundResult::Refunded(record))
            }
            Err(AppError::Conflict(_)) => Ok(RefundResult::AlreadyRefunded),
            Err(e) => Err(e),
        }
    }

    pub async fn process_with_retry(&self, refund: &PendingRefund) -> Res<RefundResult> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut issued = None;
        let mut attempt = 1;
        loop {
            match self.attempt(refund, &mut issued).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    log::warn!(
                        "Refund attempt {}/{} for payment {} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        refund.gateway_payment_id,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!(
                        "Giving up refund of payment {} after {} attempts: {}. user={} subscription={:?} amount={} gateway_refund={:?}",
                        refund.gateway_payment_id,
                        attempt,
                        e,
                        refund.user_id,
                        refund.subscription_id,
                        refund.amount,
                        issued.as_ref().map(|h| h.id.as_str())
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Drains the queue until every sender is dropped.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<PendingRefund>) {
        log::info!("Refund worker started");
        while let Some(refund) = receiver.recv().await {
            let worker = self.clone();
            tokio::spawn(async move {
                let _ = worker.process_with_retry(&refund).await;
            });
        }
        log::info!("Refund queue closed, worker stopping");
    }
}
