use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use pkg_types::identity::{KubernetesInfo, ServiceAccountRef, SpiffeIdentity};
use pkg_types::pod::PodRef;

use crate::cache::PodCache;
use crate::error::AuthzError;
use crate::index::SaNode;

/// Decides whether a trusted node-level proxy may obtain a certificate for a
/// workload identity running on its own node.
pub struct NodeAuthorizer {
    cache: Arc<PodCache>,
    trusted: HashSet<ServiceAccountRef>,
}

impl NodeAuthorizer {
    pub fn new(cache: Arc<PodCache>, trusted: impl IntoIterator<Item = ServiceAccountRef>) -> Self {
        Self {
            cache,
            trusted: trusted.into_iter().collect(),
        }
    }

    pub fn has_synced(&self) -> bool {
        self.cache.has_synced()
    }

    /// Authorize `caller` to request `requested_identity`.
    ///
    /// The caller's own pod must be live with the asserted uid and service
    /// account, and at least one pod running as the requested service
    /// account must be scheduled on the caller's node.
    pub fn authorize(
        &self,
        caller: &KubernetesInfo,
        requested_identity: &str,
    ) -> Result<(), AuthzError> {
        let caller_sa = caller.service_account_ref();
        if !self.trusted.contains(&caller_sa) {
            return Err(AuthzError::UntrustedImpersonator(caller_sa));
        }

        let requested: SpiffeIdentity = requested_identity
            .parse()
            .map_err(|e: anyhow::Error| AuthzError::InvalidIdentity(e.to_string()))?;

        if !self.cache.has_synced() {
            return Err(AuthzError::NotSynced);
        }

        let pod_ref = PodRef::new(&caller.pod_namespace, &caller.pod_name);
        let pod = self
            .cache
            .get(&pod_ref)
            .ok_or_else(|| AuthzError::PodNotFound(pod_ref.clone()))?;

        if pod.id != caller.pod_uid {
            return Err(AuthzError::StalePod {
                pod: pod_ref,
                asserted: caller.pod_uid.clone(),
                found: pod.id,
            });
        }

        let found_sa = pod.spec.service_account.clone().unwrap_or_default();
        if found_sa != caller.pod_service_account {
            return Err(AuthzError::ServiceAccountMismatch {
                pod: pod_ref,
                asserted: caller.pod_service_account.clone(),
                found: found_sa,
            });
        }

        let Some(node) = pod.node() else {
            return Err(AuthzError::NotScheduled(pod_ref));
        };

        let key = SaNode::new(requested.service_account_ref(), node);
        if !self.cache.index().contains(&key) {
            return Err(AuthzError::NoColocatedPod {
                service_account: key.service_account,
                node: key.node,
            });
        }

        debug!(
            "{} on node {} may impersonate {}",
            caller_sa, key.node, requested_identity
        );
        Ok(())
    }
}
