use crate::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.payment_service.ping_store().await;
    let queued = state.payment_service.retry_queue.len();

    let status = if store_ok {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "ready": store_ok,
            "store": store_ok,
            "retry_queue_len": queued
        })),
    )
        .into_response()
}

pub async fn liveness() -> impl IntoResponse {
    (axum::http::StatusCode::OK, Json(serde_json::json!({"alive": true}))).into_response()
}

/// In-memory snapshot used for routing, next to the last persisted copy.
pub async fn processor_health(State(state): State<AppState>) -> impl IntoResponse {
    let current = state.health_monitor.get_health();
    match state.health_monitor.persisted().await {
        Ok(persisted) => (
            axum::http::StatusCode::OK,
            Json(serde_json::json!({"current": current, "persisted": persisted})),
        )
            .into_response(),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"current": current, "error": format!("{:#}", e)})),
        )
            .into_response(),
    }
}
