mod cors;

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use api_subs::{
    AppState,
    misc::{
        gateway::{PaymentGateway, RazorpayGateway},
        notify::{HttpNotifier, NoopNotifier, Notifier},
    },
    services::refund::{RefundWorker, refund_channel},
};
use common::env_config::Config;
use db::{pg::PgStore, store::Store};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // get env vars
    let config = Config::from_env();

    // init logger
    logger::setup(config.log_level, &config.log_file).expect("Failed to set up logger");

    // init db connection
    let pool = db::setup(&config.database_url, config.is_production())
        .await
        .expect("Failed to set up database");
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let catalog = Arc::new(config.plan_catalog());
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        RazorpayGateway::new(config.gateway.clone()).expect("Failed to build gateway client"),
    );
    let notifier: Arc<dyn Notifier> = if config.notification_url.is_empty() {
        log::warn!("NOTIFICATION_URL not set, notifications are disabled");
        Arc::new(NoopNotifier)
    } else {
        Arc::new(HttpNotifier::new(&config.notification_url))
    };

    // background refunds for settlements that failed after capture
    let (refunds, pending) = refund_channel();
    let worker = RefundWorker::new(
        store.clone(),
        gateway.clone(),
        config.refund_retry.clone(),
        config.gateway.timeout,
    );
    tokio::spawn(worker.run(pending));

    let state = web::Data::new(AppState::new(
        store,
        catalog,
        gateway,
        notifier,
        config.gateway.api_secret.clone(),
        refunds,
    ));

    let origin = config.cors_allowed_origin.clone();
    let console_logging_enabled = config.console_logging_enabled;

    log::info!(
        "Starting server on {}:{} ({})",
        config.server_host,
        config.server_port,
        config.environment
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(logger::middleware(console_logging_enabled)) // 2nd
            .wrap(cors::middleware(&origin)) // 1st
            .service(api_subs::routes::health::get_health)
            .service(api_subs::mount_v1())
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .workers(config.num_workers)
    .run()
    .await
}
