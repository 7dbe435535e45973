use async_trait::async_trait;
use std::collections::HashMap;

use pkg_types::config::TokenEntry;
use pkg_types::identity::{CallerIdentity, KubernetesInfo, SpiffeIdentity};

use crate::error::AuthError;

/// Transport-level facts an authenticator may use.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub bearer_token: Option<String>,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;

    async fn authenticate(&self, metadata: &RequestMetadata) -> Result<CallerIdentity, AuthError>;
}

/// Authenticates static bearer tokens from the server config. Each token
/// maps to one service account identity, plus pod claims when configured.
pub struct TokenAuthenticator {
    callers: HashMap<String, CallerIdentity>,
}

impl TokenAuthenticator {
    pub fn new(trust_domain: &str, entries: &[TokenEntry]) -> Self {
        let callers = entries
            .iter()
            .map(|entry| {
                let identity =
                    SpiffeIdentity::new(trust_domain, &entry.namespace, &entry.service_account);
                let kubernetes = match (&entry.pod_name, &entry.pod_uid) {
                    (Some(pod_name), Some(pod_uid)) => Some(KubernetesInfo {
                        pod_name: pod_name.clone(),
                        pod_namespace: entry.namespace.clone(),
                        pod_uid: pod_uid.clone(),
                        pod_service_account: entry.service_account.clone(),
                    }),
                    _ => None,
                };
                (
                    entry.token.clone(),
                    CallerIdentity {
                        identities: vec![identity.to_string()],
                        kubernetes,
                    },
                )
            })
            .collect();
        Self { callers }
    }

    pub fn len(&self) -> usize {
        self.callers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    fn name(&self) -> &str {
        "token"
    }

    async fn authenticate(&self, metadata: &RequestMetadata) -> Result<CallerIdentity, AuthError> {
        let token = metadata
            .bearer_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredentials)?;
        self.callers
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
