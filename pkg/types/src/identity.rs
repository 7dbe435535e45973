use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SPIFFE_SCHEME: &str = "spiffe://";

// --- Service accounts ---

/// Namespaced name of a service account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceAccountRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceAccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parses `namespace/name`, the form used in config files.
impl FromStr for ServiceAccountRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => bail!(
                "service account '{}' must have the form <namespace>/<name>",
                s
            ),
        }
    }
}

// --- SPIFFE identities ---

/// A workload identity of the form `spiffe://<trust-domain>/ns/<namespace>/sa/<service-account>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpiffeIdentity {
    pub trust_domain: String,
    pub namespace: String,
    pub service_account: String,
}

impl SpiffeIdentity {
    pub fn new(
        trust_domain: impl Into<String>,
        namespace: impl Into<String>,
        service_account: impl Into<String>,
    ) -> Self {
        Self {
            trust_domain: trust_domain.into(),
            namespace: namespace.into(),
            service_account: service_account.into(),
        }
    }

    pub fn service_account_ref(&self) -> ServiceAccountRef {
        ServiceAccountRef::new(&self.namespace, &self.service_account)
    }
}

impl fmt::Display for SpiffeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}/ns/{}/sa/{}",
            SPIFFE_SCHEME, self.trust_domain, self.namespace, self.service_account
        )
    }
}

impl FromStr for SpiffeIdentity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(path) = s.strip_prefix(SPIFFE_SCHEME) else {
            bail!("identity '{}' is not a spiffe:// URI", s);
        };
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [td, "ns", ns, "sa", sa] if !td.is_empty() && !ns.is_empty() && !sa.is_empty() => {
                Ok(Self::new(*td, *ns, *sa))
            }
            _ => bail!(
                "identity '{}' must have the form spiffe://<trust-domain>/ns/<namespace>/sa/<service-account>",
                s
            ),
        }
    }
}

// --- Authenticated callers ---

/// Pod-level claims about an authenticated caller, used for node impersonation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesInfo {
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_uid: String,
    pub pod_service_account: String,
}

impl KubernetesInfo {
    pub fn service_account_ref(&self) -> ServiceAccountRef {
        ServiceAccountRef::new(&self.pod_namespace, &self.pod_service_account)
    }
}

/// The result of authenticating a caller. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    /// SPIFFE-style URIs the caller proved it holds. Order is irrelevant.
    pub identities: Vec<String>,
    pub kubernetes: Option<KubernetesInfo>,
}
