use dashmap::DashMap;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use pkg_types::pod::{Pod, PodRef};

use crate::index::NodeIndex;

/// Read-mostly view of the cluster's pods, kept current by [`PodInformer`]
/// and carrying the [`NodeIndex`] derived from them.
///
/// Lookups are refused (see [`PodCache::has_synced`]) until the initial list
/// has been applied.
///
/// [`PodInformer`]: crate::informer::PodInformer
#[derive(Debug, Default)]
pub struct PodCache {
    pods: DashMap<PodRef, Pod>,
    /// store key → (pod, uid) so deletes, which carry no value, can be resolved
    keys: DashMap<String, (PodRef, String)>,
    index: NodeIndex,
    synced: AtomicBool,
}

impl PodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache populated from a fixed pod list and marked synced.
    pub fn from_pods(pods: impl IntoIterator<Item = Pod>) -> Self {
        let cache = Self::new();
        for pod in pods {
            let key = format!("{}{}/{}", pkg_constants::state::PODS_PREFIX, pod.namespace, pod.id);
            cache.apply_put(&key, pod);
        }
        cache.mark_synced();
        cache
    }

    pub fn get(&self, pod_ref: &PodRef) -> Option<Pod> {
        self.pods.get(pod_ref).map(|p| p.clone())
    }

    pub fn index(&self) -> &NodeIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub(crate) fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    /// Record the pod stored under `key`.
    pub(crate) fn apply_put(&self, key: &str, pod: Pod) {
        let pod_ref = pod.pod_ref();
        if let Some(previous) = self.keys.get(key).map(|e| e.0.clone())
            && previous != pod_ref
        {
            self.forget(key);
        }
        self.keys
            .insert(key.to_string(), (pod_ref.clone(), pod.id.clone()));
        self.index.upsert(&pod);
        self.pods.insert(pod_ref, pod);
    }

    /// Forget the pod stored under `key`. A newer pod that has since taken the
    /// same name under a different key is left alone.
    pub(crate) fn apply_delete(&self, key: &str) {
        self.forget(key);
    }

    /// Replace the cache contents with a fresh listing.
    ///
    /// A listing may hold two keys for the same pod name while the old pod's
    /// record is still being removed; the most recently created pod wins.
    pub(crate) fn replace(&self, entries: Vec<(String, Pod)>) {
        let mut newest: HashMap<PodRef, (String, Pod)> = HashMap::new();
        for (key, pod) in entries {
            match newest.entry(pod.pod_ref()) {
                Entry::Occupied(mut slot) => {
                    if pod.created_at > slot.get().1.created_at {
                        slot.insert((key, pod));
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert((key, pod));
                }
            }
        }

        let live: HashSet<&str> = newest.values().map(|(k, _)| k.as_str()).collect();
        let stale: Vec<String> = self
            .keys
            .iter()
            .filter(|e| !live.contains(e.key().as_str()))
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.forget(&key);
        }
        for (key, pod) in newest.into_values() {
            self.apply_put(&key, pod);
        }
    }

    fn forget(&self, key: &str) {
        let Some((_, (pod_ref, uid))) = self.keys.remove(key) else {
            return;
        };
        if self.pods.remove_if(&pod_ref, |_, p| p.id == uid).is_some() {
            self.index.remove(&pod_ref);
        }
    }
}
