use thiserror::Error;

use pkg_authz::AuthzError;
use pkg_pki::CsrError;

/// Caller-visible outcome category of a failed issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unauthenticated,
    Internal,
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials presented")]
    MissingCredentials,

    #[error("bearer token is not recognised")]
    InvalidToken,

    #[error("caller authenticated without any identity")]
    NoIdentities,
}

/// Why a signing record did not produce a certificate.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("certificate request {name} was denied ({reason}): {message}")]
    Denied {
        name: String,
        reason: String,
        message: String,
    },

    #[error("certificate request {name} failed ({reason}): {message}")]
    Failed {
        name: String,
        reason: String,
        message: String,
    },

    #[error("certificate request {0} was deleted before it was signed")]
    Deleted(String),

    #[error("watch on certificate request {0} closed before it was signed")]
    WatchClosed(String),

    #[error("deadline exceeded waiting for certificate")]
    DeadlineExceeded,

    #[error("signing backend: {0:#}")]
    Backend(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("invalid certificate request: {0}")]
    Validation(#[from] CsrError),

    #[error("caller identities {caller:?} do not match requested identities {requested:?}")]
    IdentityMismatch {
        caller: Vec<String>,
        requested: Vec<String>,
    },

    #[error("node impersonation refused: {0}")]
    Impersonation(#[from] AuthzError),

    #[error(transparent)]
    Signing(#[from] SignError),
}

impl IssueError {
    pub fn status(&self) -> Status {
        match self {
            IssueError::Authentication(_)
            | IssueError::Validation(_)
            | IssueError::IdentityMismatch { .. }
            | IssueError::Impersonation(_) => Status::Unauthenticated,
            IssueError::Signing(SignError::DeadlineExceeded) => Status::DeadlineExceeded,
            IssueError::Signing(_) => Status::Internal,
        }
    }

    /// Message returned to the caller. Authorization failures share one
    /// message; the specific cause is only logged.
    pub fn client_message(&self) -> String {
        match self {
            IssueError::IdentityMismatch { .. } | IssueError::Impersonation(_) => {
                "caller is not authorized to request the identities in this CSR".to_string()
            }
            other => other.to_string(),
        }
    }
}
