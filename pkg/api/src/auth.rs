use axum::{
    extract::Request,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use pkg_issuance::RequestMetadata;

/// Bearer token from the `Authorization` header, if well-formed.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Middleware: collect the credentials a request presents into
/// [`RequestMetadata`] for the issuance pipeline. Rejection is left to the
/// pipeline's authenticators so every failure is reported the same way.
pub async fn request_metadata_middleware(mut req: Request, next: Next) -> Response {
    let metadata = RequestMetadata {
        bearer_token: bearer_token(req.headers()),
    };
    if metadata.bearer_token.is_none() {
        debug!("Request to {} carries no bearer token", req.uri().path());
    }
    req.extensions_mut().insert(metadata);
    next.run(req).await
}
