//! Certificate issuance: authenticate the caller, validate and authorize the
//! CSR, then drive a signing record on the external authority to completion.

pub mod authenticate;
pub mod backend;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod service;

#[cfg(test)]
mod testing;

pub use authenticate::{Authenticator, RequestMetadata, TokenAuthenticator};
pub use backend::{RecordEvent, RecordStream, SigningBackend};
pub use coordinator::{SignedBundle, SigningCoordinator, SigningRequest};
pub use error::{AuthError, IssueError, SignError, Status};
pub use registry::RegistryBackend;
pub use service::{IssuanceService, IssuanceSettings};
