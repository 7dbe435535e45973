//! Certificate request inspection and the embedded cluster CA.

pub mod ca;
pub mod csr;
pub mod error;
pub mod extensions;
pub mod identity;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use csr::{CsrInfo, validate_request};
pub use error::{CsrError, Violation};
pub use identity::identities_match;
