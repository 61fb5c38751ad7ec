use std::sync::Arc;

use actix_web::web::{self};
use common::plans::PlanCatalog;
use db::store::Store;

use misc::{gateway::PaymentGateway, notify::Notifier};
use services::{access::QuotaEngine, pay::SettlementEngine, refund::RefundQueue};

pub mod routes {
    pub mod access;
    pub mod health;
    pub mod pay;
    pub mod usage;
}

pub mod services {
    pub mod access;
    pub mod pay;
    pub mod refund;
    pub mod usage;
}

pub mod dtos {
    pub mod access;
    pub mod pay;
    pub mod usage;
}

pub mod misc {
    pub mod gateway;
    pub mod notify;
}

#[cfg(test)]
mod testing;

/// Everything the handlers share, registered once as `web::Data`.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub catalog: Arc<PlanCatalog>,
    pub quota: QuotaEngine,
    pub settlement: SettlementEngine,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub refunds: RefundQueue,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<PlanCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        signing_secret: String,
        refunds: RefundQueue,
    ) -> Self {
        Self {
            quota: QuotaEngine::new(store.clone(), catalog.clone()),
            settlement: SettlementEngine::new(store.clone(), catalog.clone(), signing_secret),
            store,
            catalog,
            gateway,
            notifier,
            refunds,
        }
    }
}

pub fn mount_v1() -> actix_web::Scope {
    web::scope("/v1")
        .service(routes::access::get_access)
        .service(mount_pay())
        .service(mount_usage())
}
pub fn mount_pay() -> actix_web::Scope {
    web::scope("/payment")
        .service(routes::pay::get_initialize)
        .service(routes::pay::post_verify)
        .service(routes::pay::get_plans)
}
pub fn mount_usage() -> actix_web::Scope {
    web::scope("/usage")
        .service(routes::usage::get_current)
        .service(routes::usage::get_previous)
        .service(routes::usage::get_previous_subscription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, http::StatusCode, test};
    use common::signature::payment_signature;
    use db::memory::MemoryStore;
    use serde_json::{Value, json};
    use uuid::Uuid;

    use crate::{
        misc::notify::NoopNotifier,
        services::refund::{PendingRefund, refund_channel},
        testing::{self, FakeGateway, SECRET},
    };

    type Pending = tokio::sync::mpsc::UnboundedReceiver<PendingRefund>;

    fn state(store: &MemoryStore) -> (web::Data<AppState>, Pending) {
        let (queue, pending) = refund_channel();
        let state = AppState::new(
            Arc::new(store.clone()),
            testing::catalog(),
            Arc::new(FakeGateway::new()),
            Arc::new(NoopNotifier),
            SECRET.to_string(),
            queue,
        );
        (web::Data::new(state), pending)
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .service(routes::health::get_health)
                    .service(mount_v1()),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn health_answers_ok() {
        let store = MemoryStore::new();
        let (state, _pending) = state(&store);
        let app = app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await, "OK");
    }

    #[actix_web::test]
    async fn access_is_denied_with_403_once_quota_is_used() {
        let store = MemoryStore::new();
        let (state, _pending) = state(&store);
        let app = app!(state);
        let uri = format!("/v1/access?userId={}&access_request=schedule_room", Uuid::new_v4());

        for left in [2, 1, 0] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["allowed"], true);
            assert_eq!(body["limit_left"], left);
            assert_eq!(body["plan"]["slug"], "free");
        }

        let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "error": "room scheduling quota exhausted" }));
        assert_eq!(store.usage_periods()[0].schedule_count, 3);
    }

    #[actix_web::test]
    async fn malformed_access_query_is_400_without_writes() {
        let store = MemoryStore::new();
        let (state, _pending) = state(&store);
        let app = app!(state);

        for uri in [
            "/v1/access?access_request=schedule_room".to_string(),
            format!("/v1/access?user_id={}&access_request=fly", Uuid::new_v4()),
        ] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert!(store.usage_periods().is_empty());
    }

    #[actix_web::test]
    async fn verify_settles_once() {
        let store = MemoryStore::new();
        let (state, _pending) = state(&store);
        let app = app!(state);
        let user_id = Uuid::new_v4();
        let body = json!({
            "user_id": user_id,
            "plan_id": "pro",
            "order_id": "order_1",
            "gateway_order_id": "order_gw_1",
            "gateway_payment_id": "pay_1",
            "gateway_signature": payment_signature(SECRET, "order_gw_1", "pay_1"),
        });

        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/v1/payment/verify").set_json(&body).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["plan_type"], "Pro");
        assert!(created.get("gateway_signature").is_none());

        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/v1/payment/verify").set_json(&body).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(store.subscriptions().len(), 1);

        let uri = format!("/v1/access?user_id={}&access_request=join_public_room", user_id);
        let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        let decision: Value = test::read_body_json(resp).await;
        assert_eq!(decision["plan"]["slug"], "pro");
        assert_eq!(decision["limit_left"], -1);
    }

    #[actix_web::test]
    async fn bad_signature_is_400() {
        let store = MemoryStore::new();
        let (state, _pending) = state(&store);
        let app = app!(state);
        let body = json!({
            "user_id": Uuid::new_v4(),
            "plan_id": "basic",
            "order_id": "order_1",
            "gateway_order_id": "order_gw_1",
            "gateway_payment_id": "pay_1",
            "gateway_signature": "00",
        });

        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/v1/payment/verify").set_json(&body).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(store.subscriptions().is_empty());
    }

    #[actix_web::test]
    async fn plans_and_initialize() {
        let store = MemoryStore::new();
        let (state, _pending) = state(&store);
        let app = app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/v1/payment/plans").to_request()).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["plans"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["currency"], "INR");

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/v1/payment/initialize?plan_id=basic").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let order: Value = test::read_body_json(resp).await;
        assert_eq!(order["amount"], 14900);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/v1/payment/initialize?plan_id=free").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn usage_routes_need_user_header() {
        let store = MemoryStore::new();
        let (state, _pending) = state(&store);
        let app = app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/v1/usage/current").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let user_id = Uuid::new_v4();
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/v1/usage/current")
                .insert_header(("X-User-ID", user_id.to_string()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let usage: Value = test::read_body_json(resp).await;
        assert_eq!(usage["plan_type"], "Free");
        assert_eq!(usage["usage"]["room_schedule_quota"], 0);
        assert!(store.usage_periods().is_empty());

        for uri in ["/v1/usage/previous", "/v1/usage/previous-subscription"] {
            let resp = test::call_service(
                &app,
                test::TestRequest::get()
                    .uri(uri)
                    .insert_header(("X-User-ID", user_id.to_string()))
                    .to_request(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::OK);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body, json!([]));
        }
    }
}
