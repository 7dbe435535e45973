use thiserror::Error;

use pkg_types::identity::ServiceAccountRef;
use pkg_types::pod::PodRef;

/// Why a node-impersonation request was refused. Callers see a single
/// outcome; the variants exist for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    #[error("service account {0} is not a trusted node impersonator")]
    UntrustedImpersonator(ServiceAccountRef),

    #[error("invalid requested identity: {0}")]
    InvalidIdentity(String),

    #[error("pod cache has not completed its initial sync")]
    NotSynced,

    #[error("caller pod {0} not found")]
    PodNotFound(PodRef),

    #[error("caller pod {pod} has uid {found} but caller asserted {asserted}; retry with a fresh identity")]
    StalePod {
        pod: PodRef,
        asserted: String,
        found: String,
    },

    #[error("caller pod {pod} runs as {found} but caller asserted {asserted}")]
    ServiceAccountMismatch {
        pod: PodRef,
        asserted: String,
        found: String,
    },

    #[error("caller pod {0} is not scheduled to a node")]
    NotScheduled(PodRef),

    #[error("no pod running as {service_account} on node {node}")]
    NoColocatedPod {
        service_account: ServiceAccountRef,
        node: String,
    },
}
