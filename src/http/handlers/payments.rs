use crate::domain::payment::{CreatePaymentRequest, SummaryRange};
use crate::error::GatewayError;
use crate::AppState;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

pub async fn create_payment(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentRequest>,
) -> impl IntoResponse {
    match state.payment_service.submit(req).await {
        Ok(outcome) => (
            axum::http::StatusCode::ACCEPTED,
            Json(serde_json::json!({"accepted": true, "outcome": outcome})),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn payments_summary(
    State(state): State<AppState>,
    Query(range): Query<SummaryRange>,
) -> impl IntoResponse {
    match state.payment_service.summary(range).await {
        Ok(summary) => (axum::http::StatusCode::OK, Json(summary)).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn purge_payments(State(state): State<AppState>) -> impl IntoResponse {
    match state.payment_service.purge_all().await {
        Ok(()) => (axum::http::StatusCode::OK, Json(serde_json::json!({"purged": true}))).into_response(),
        Err(e) => error_response(&e),
    }
}

pub fn error_response(err: &GatewayError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!("request failed: {}", err);
    }
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}
