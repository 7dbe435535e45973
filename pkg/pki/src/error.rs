use std::fmt;
use thiserror::Error;

/// A single reason a certificate request is unacceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// An extension the parser does not recognise.
    UnknownExtension(String),
    /// A recognised extension outside the SAN/KeyUsage/ExtendedKeyUsage allow-list.
    ForbiddenExtension(&'static str),
    /// An allow-listed extension whose value could not be decoded.
    MalformedExtension(String),
    /// A subject alternative name that is not a URI.
    NonUriSan(String),
    /// Key usage bits other than digitalSignature and keyEncipherment.
    KeyUsage(u32),
    /// An extended key usage other than serverAuth and clientAuth.
    ExtendedKeyUsage(String),
    /// The subject carries a common name.
    CommonName(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UnknownExtension(oid) => write!(f, "unknown extension {}", oid),
            Violation::ForbiddenExtension(name) => write!(f, "extension {} is not permitted", name),
            Violation::MalformedExtension(err) => write!(f, "malformed extension: {}", err),
            Violation::NonUriSan(san) => write!(f, "non-URI subject alternative name {}", san),
            Violation::KeyUsage(bits) => write!(f, "key usage bits {:#010x} are not permitted", bits),
            Violation::ExtendedKeyUsage(eku) => write!(f, "extended key usage {} is not permitted", eku),
            Violation::CommonName(cn) => write!(f, "common name '{}' is not permitted", cn),
        }
    }
}

#[derive(Debug, Error)]
pub enum CsrError {
    #[error("failed to decode PEM: {0}")]
    Pem(String),

    #[error("expected a CERTIFICATE REQUEST PEM block, found '{0}'")]
    Label(String),

    #[error("failed to parse certificate request: {0}")]
    Parse(String),

    #[error("certificate request signature is invalid: {0}")]
    Signature(String),

    #[error("certificate request rejected: {}", join_violations(.0))]
    Violations(Vec<Violation>),
}

impl CsrError {
    /// Every violation carried by this error, empty for structural failures.
    pub fn violations(&self) -> &[Violation] {
        match self {
            CsrError::Violations(v) => v,
            _ => &[],
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
