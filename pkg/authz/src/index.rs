use dashmap::DashMap;
use std::collections::HashSet;

use pkg_types::identity::ServiceAccountRef;
use pkg_types::pod::{Pod, PodRef};

/// Index key: a service account running on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SaNode {
    pub service_account: ServiceAccountRef,
    pub node: String,
}

impl SaNode {
    pub fn new(service_account: ServiceAccountRef, node: impl Into<String>) -> Self {
        Self {
            service_account,
            node: node.into(),
        }
    }

    /// Key a pod is indexed under. Pods without a service account or a node
    /// are not indexed.
    pub fn for_pod(pod: &Pod) -> Option<Self> {
        let sa = pod.service_account_ref()?;
        let node = pod.node()?;
        Some(Self::new(sa, node))
    }
}

/// Concurrent (service account, node) → pods index.
///
/// An entry exists for a key iff at least one indexed pod maps to it. Point
/// lookups run concurrently with updates; only the owning cache mutates it.
#[derive(Debug, Default)]
pub struct NodeIndex {
    entries: DashMap<SaNode, HashSet<PodRef>>,
    by_pod: DashMap<PodRef, SaNode>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pods indexed under `key`.
    pub fn lookup(&self, key: &SaNode) -> Vec<PodRef> {
        self.entries
            .get(key)
            .map(|pods| pods.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any pod is indexed under `key`.
    pub fn contains(&self, key: &SaNode) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct (service account, node) keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index `pod` under its current key, moving it off any previous key.
    pub(crate) fn upsert(&self, pod: &Pod) {
        let pod_ref = pod.pod_ref();
        let new_key = SaNode::for_pod(pod);
        let old_key = self.by_pod.get(&pod_ref).map(|k| k.clone());

        if old_key == new_key {
            return;
        }
        if let Some(old) = old_key {
            self.detach(&old, &pod_ref);
        }
        match new_key {
            Some(key) => {
                self.entries
                    .entry(key.clone())
                    .or_default()
                    .insert(pod_ref.clone());
                self.by_pod.insert(pod_ref, key);
            }
            None => {
                self.by_pod.remove(&pod_ref);
            }
        }
    }

    /// Drop `pod_ref` from the index.
    pub(crate) fn remove(&self, pod_ref: &PodRef) {
        if let Some((_, key)) = self.by_pod.remove(pod_ref) {
            self.detach(&key, pod_ref);
        }
    }

    fn detach(&self, key: &SaNode, pod_ref: &PodRef) {
        if let Some(mut pods) = self.entries.get_mut(key) {
            pods.remove(pod_ref);
        }
        // The guard above must be released before touching the same shard again.
        self.entries.remove_if(key, |_, pods| pods.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pkg_types::pod::{PodSpec, PodStatus};
    use std::collections::HashMap;

    fn make_pod(ns: &str, name: &str, sa: Option<&str>, node: Option<&str>) -> Pod {
        Pod {
            id: format!("{}-uid", name),
            name: name.to_string(),
            namespace: ns.to_string(),
            spec: PodSpec {
                service_account: sa.map(str::to_string),
            },
            status: PodStatus::Running,
            node_name: node.map(str::to_string),
            labels: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    fn key(ns: &str, sa: &str, node: &str) -> SaNode {
        SaNode::new(ServiceAccountRef::new(ns, sa), node)
    }

    #[test]
    fn indexes_by_service_account_and_node() {
        let index = NodeIndex::new();
        index.upsert(&make_pod("default", "a-1", Some("alpha"), Some("n1")));
        index.upsert(&make_pod("default", "a-2", Some("alpha"), Some("n1")));
        index.upsert(&make_pod("default", "a-3", Some("alpha"), Some("n2")));

        assert_eq!(index.lookup(&key("default", "alpha", "n1")).len(), 2);
        assert_eq!(index.lookup(&key("default", "alpha", "n2")).len(), 1);
        assert!(!index.contains(&key("other", "alpha", "n1")));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn pods_missing_fields_are_not_indexed() {
        let index = NodeIndex::new();
        index.upsert(&make_pod("default", "pending", Some("alpha"), None));
        index.upsert(&make_pod("default", "no-sa", None, Some("n1")));
        assert!(index.is_empty());
    }

    #[test]
    fn entry_disappears_with_last_pod() {
        let index = NodeIndex::new();
        let pod = make_pod("default", "a-1", Some("alpha"), Some("n1"));
        index.upsert(&pod);
        index.remove(&pod.pod_ref());
        assert!(!index.contains(&key("default", "alpha", "n1")));
        assert!(index.is_empty());

        // Removing an unknown pod is a no-op.
        index.remove(&PodRef::new("default", "ghost"));
    }

    #[test]
    fn moving_pod_updates_key() {
        let index = NodeIndex::new();
        index.upsert(&make_pod("default", "a-1", Some("alpha"), None));
        assert!(index.is_empty());

        index.upsert(&make_pod("default", "a-1", Some("alpha"), Some("n1")));
        assert!(index.contains(&key("default", "alpha", "n1")));

        index.upsert(&make_pod("default", "a-1", Some("beta"), Some("n1")));
        assert!(!index.contains(&key("default", "alpha", "n1")));
        assert!(index.contains(&key("default", "beta", "n1")));

        index.upsert(&make_pod("default", "a-1", Some("beta"), None));
        assert!(index.is_empty());
    }
}
