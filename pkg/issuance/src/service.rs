use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use pkg_authz::NodeAuthorizer;
use pkg_pki::{CsrInfo, identities_match, validate_request};
use pkg_types::certificate::KeyUsage;
use pkg_types::identity::CallerIdentity;

use crate::authenticate::{Authenticator, RequestMetadata};
use crate::coordinator::{SigningCoordinator, SigningRequest};
use crate::error::{AuthError, IssueError, SignError};

#[derive(Debug, Clone)]
pub struct IssuanceSettings {
    /// Upper bound on issued certificate lifetime.
    pub max_duration: Duration,
    /// How long one request may wait for the signing authority.
    pub request_timeout: Duration,
}

/// Per-request pipeline: authenticate, validate, authorize, sign, respond.
///
/// Nothing is created on the signing backend unless the request passes
/// validation and authorization.
pub struct IssuanceService {
    authenticators: Vec<Arc<dyn Authenticator>>,
    coordinator: SigningCoordinator,
    node_authorizer: Option<Arc<NodeAuthorizer>>,
    settings: IssuanceSettings,
}

impl IssuanceService {
    pub fn new(
        authenticators: Vec<Arc<dyn Authenticator>>,
        coordinator: SigningCoordinator,
        settings: IssuanceSettings,
    ) -> Self {
        Self {
            authenticators,
            coordinator,
            node_authorizer: None,
            settings,
        }
    }

    /// Allow trusted node proxies to request colocated workload identities.
    pub fn with_node_authorizer(mut self, authorizer: Arc<NodeAuthorizer>) -> Self {
        self.node_authorizer = Some(authorizer);
        self
    }

    /// Whether request-time dependencies are ready to serve.
    pub fn is_ready(&self) -> bool {
        self.node_authorizer
            .as_ref()
            .is_none_or(|authz| authz.has_synced())
    }

    /// Lifetime to request for a client asking for `requested_secs`.
    /// Zero or negative selects the maximum.
    pub fn effective_duration(&self, requested_secs: i64) -> Duration {
        let max = self.settings.max_duration;
        match u64::try_from(requested_secs) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs).min(max),
            _ => max,
        }
    }

    /// Issue a certificate for `csr_pem`. Returns the chain as PEM strings,
    /// leaf first.
    pub async fn create_certificate(
        &self,
        metadata: &RequestMetadata,
        csr_pem: &str,
        validity_secs: i64,
    ) -> Result<Vec<String>, IssueError> {
        let caller = self.authenticate(metadata).await?;
        let info = validate_request(csr_pem.as_bytes())?;
        self.authorize(&caller, &info)?;

        let request = SigningRequest {
            identities: caller.identities.join(","),
            csr_pem: csr_pem.as_bytes().to_vec(),
            duration: self.effective_duration(validity_secs),
            usages: KeyUsage::workload(),
        };
        let deadline = Instant::now() + self.settings.request_timeout;
        let bundle = self.coordinator.sign(&request, deadline).await?;

        let mut chain = vec![pem_string(bundle.certificate)?];
        if let Some(ca) = bundle.ca {
            chain.push(pem_string(ca)?);
        }
        info!(
            "Issued certificate for {} (ttl {}s)",
            info.uris.join(","),
            request.duration.as_secs()
        );
        Ok(chain)
    }

    async fn authenticate(&self, metadata: &RequestMetadata) -> Result<CallerIdentity, AuthError> {
        let mut last_err = AuthError::MissingCredentials;
        for authenticator in &self.authenticators {
            match authenticator.authenticate(metadata).await {
                Ok(caller) if caller.identities.is_empty() => {
                    last_err = AuthError::NoIdentities;
                }
                Ok(caller) => return Ok(caller),
                Err(e) => {
                    debug!("{} authenticator: {}", authenticator.name(), e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn authorize(&self, caller: &CallerIdentity, info: &CsrInfo) -> Result<(), IssueError> {
        if identities_match(&caller.identities, &info.uris) {
            return Ok(());
        }

        // A node proxy asking for one identity that is not its own.
        if let ([requested], Some(k8s), Some(authz)) = (
            info.uris.as_slice(),
            caller.kubernetes.as_ref(),
            self.node_authorizer.as_ref(),
        ) {
            return authz.authorize(k8s, requested).map_err(|e| {
                warn!(
                    "Refused {}/{} impersonating {}: {}",
                    k8s.pod_namespace, k8s.pod_name, requested, e
                );
                IssueError::Impersonation(e)
            });
        }

        warn!(
            "Caller {:?} requested identities {:?}",
            caller.identities, info.uris
        );
        Err(IssueError::IdentityMismatch {
            caller: caller.identities.clone(),
            requested: info.uris.clone(),
        })
    }
}

fn pem_string(bytes: Vec<u8>) -> Result<String, SignError> {
    String::from_utf8(bytes)
        .map_err(|e| SignError::Backend(anyhow::anyhow!("certificate is not PEM text: {}", e)))
}
