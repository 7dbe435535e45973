use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use pkg_issuance::{IssueError, RequestMetadata, Status};

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCertificateRequest {
    /// PEM-encoded PKCS#10 request.
    pub csr: String,
    /// Requested lifetime in seconds; zero or absent selects the server maximum.
    #[serde(default, alias = "validityDuration")]
    pub validity_duration: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCertificateResponse {
    /// PEM certificates, leaf first.
    pub cert_chain: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// POST /v1/certificates: issue a workload certificate for a CSR.
pub async fn create_certificate(
    State(state): State<AppState>,
    Extension(metadata): Extension<RequestMetadata>,
    Json(body): Json<CreateCertificateRequest>,
) -> Response {
    match state
        .issuance
        .create_certificate(&metadata, &body.csr, body.validity_duration)
        .await
    {
        Ok(cert_chain) => {
            (StatusCode::OK, Json(CreateCertificateResponse { cert_chain })).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn error_response(err: IssueError) -> Response {
    let status = match err.status() {
        Status::Unauthenticated => StatusCode::UNAUTHORIZED,
        Status::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Status::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
    };
    warn!("Certificate request rejected ({}): {}", status, err);
    (
        status,
        Json(ErrorResponse {
            error: err.client_message(),
        }),
    )
        .into_response()
}
