use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// GET /healthz: 200 once the server can authorize requests.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    if state.issuance.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "pod cache not synced")
    }
}
