use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::ServiceAccountRef;

// --- Pod status ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PodStatus {
    #[default]
    Pending,
    Scheduled,
    ContainerCreating,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodStatus::Pending => write!(f, "Pending"),
            PodStatus::Scheduled => write!(f, "Scheduled"),
            PodStatus::ContainerCreating => write!(f, "ContainerCreating"),
            PodStatus::Running => write!(f, "Running"),
            PodStatus::Succeeded => write!(f, "Succeeded"),
            PodStatus::Failed => write!(f, "Failed"),
            PodStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

// --- Pod spec ---

/// The subset of the pod spec the CA cares about. Unknown fields written by
/// other control-plane components are ignored on decode.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PodSpec {
    /// Service account the pod runs as.
    #[serde(default, alias = "serviceAccountName", alias = "service_account_name")]
    pub service_account: Option<String>,
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    /// Unique id of this pod instance (the pod UID).
    pub id: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
    /// The node this pod is assigned to (set by scheduler)
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Pod {
    pub fn pod_ref(&self) -> PodRef {
        PodRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// The service account this pod runs as, if set.
    pub fn service_account_ref(&self) -> Option<ServiceAccountRef> {
        match self.spec.service_account.as_deref() {
            Some(sa) if !sa.is_empty() => Some(ServiceAccountRef::new(&self.namespace, sa)),
            _ => None,
        }
    }

    /// The node this pod is scheduled on, if any.
    pub fn node(&self) -> Option<&str> {
        self.node_name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Namespaced name of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
