pub mod config;
pub mod domain {
    pub mod health;
    pub mod payment;
    pub mod processor;
}
pub mod error;
pub mod gateways;
pub mod http {
    pub mod handlers {
        pub mod admin;
        pub mod ops;
        pub mod payments;
    }
}
pub mod repo;
pub mod service {
    pub mod health_monitor;
    pub mod payment_service;
    pub mod retry_engine;
}

use axum::routing::{get, post, put};
use axum::Router;

#[derive(Clone)]
pub struct AppState {
    pub payment_service: service::payment_service::PaymentService,
    pub health_monitor: service::health_monitor::HealthMonitor,
}

pub fn app(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/admin/processors/timeouts", get(http::handlers::admin::get_timeouts))
        .route(
            "/admin/processors/:processor/timeout",
            put(http::handlers::admin::update_timeout),
        );

    Router::new()
        .route("/payments", post(http::handlers::payments::create_payment))
        .route("/payments-summary", get(http::handlers::payments::payments_summary))
        .route("/purge-payments", post(http::handlers::payments::purge_payments))
        .route("/ops/readiness", get(http::handlers::ops::readiness))
        .route("/ops/liveness", get(http::handlers::ops::liveness))
        .route("/ops/processor-health", get(http::handlers::ops::processor_health))
        .merge(admin_routes)
        .with_state(state)
}
