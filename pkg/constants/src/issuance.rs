//! Certificate issuance constants.

/// Annotation carrying the comma-joined identities a record was requested for.
pub const IDENTITIES_ANNOTATION: &str = "meshca.io/identities";

/// Label marking records created by this CA front-end.
pub const MANAGED_BY_LABEL: &str = "meshca.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "meshca";

/// Generate-name prefix for certificate signing records.
pub const REQUEST_NAME_PREFIX: &str = "meshca-";

/// Length of the random suffix appended to [`REQUEST_NAME_PREFIX`].
pub const REQUEST_NAME_SUFFIX_LEN: usize = 8;

/// Namespace records are created in when none is configured.
pub const DEFAULT_REQUEST_NAMESPACE: &str = "istio-system";

/// Default trust domain for SPIFFE identities.
pub const DEFAULT_TRUST_DOMAIN: &str = "cluster.local";

/// Upper bound on certificate lifetime when none is configured (24h).
pub const DEFAULT_MAX_DURATION_SECS: u64 = 24 * 60 * 60;

/// How long a caller may wait for a certificate when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Bound on the detached record cleanup task.
pub const CLEANUP_TIMEOUT_SECS: u64 = 10;

/// Issuer reference defaults, matching the embedded issuer.
pub const DEFAULT_ISSUER_NAME: &str = "meshca";
pub const DEFAULT_ISSUER_KIND: &str = "Issuer";
pub const DEFAULT_ISSUER_GROUP: &str = "cert-manager.io";

/// Reasons written on terminal `Ready=False` conditions.
pub const REASON_DENIED: &str = "Denied";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_ISSUED: &str = "Issued";
