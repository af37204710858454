use crate::gateways::ProcessorTimeouts;
use crate::http::handlers::payments::error_response;
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTimeoutRequest {
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutsView {
    pub default_ms: u64,
    pub fallback_ms: u64,
}

impl From<ProcessorTimeouts> for TimeoutsView {
    fn from(t: ProcessorTimeouts) -> Self {
        Self {
            default_ms: t.default.as_millis() as u64,
            fallback_ms: t.fallback.as_millis() as u64,
        }
    }
}

pub async fn get_timeouts(State(state): State<AppState>) -> impl IntoResponse {
    let view = TimeoutsView::from(state.payment_service.timeouts().await);
    (axum::http::StatusCode::OK, Json(view)).into_response()
}

pub async fn update_timeout(
    State(state): State<AppState>,
    Path(processor): Path<String>,
    Json(req): Json<UpdateTimeoutRequest>,
) -> impl IntoResponse {
    if req.timeout_ms == 0 {
        return (
            axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"error": "timeoutMs must be positive"})),
        )
            .into_response();
    }

    match state
        .payment_service
        .set_timeout(&processor, Duration::from_millis(req.timeout_ms))
        .await
    {
        Ok(timeouts) => (axum::http::StatusCode::OK, Json(TimeoutsView::from(timeouts))).into_response(),
        Err(e) => error_response(&e),
    }
}
