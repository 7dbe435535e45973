use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use pkg_constants::state::PODS_PREFIX;
use pkg_state::client::StateStore;
use pkg_state::watch::{EventType, WatchEvent};
use pkg_types::pod::Pod;

use crate::cache::PodCache;

/// Keeps a [`PodCache`] in step with the pods in the state store.
///
/// The watch is subscribed before the initial list so no write between the
/// two is lost; replaying an event the list already covered is harmless.
pub struct PodInformer {
    store: StateStore,
    cache: Arc<PodCache>,
}

impl PodInformer {
    pub fn new(store: StateStore, cache: Arc<PodCache>) -> Self {
        Self { store, cache }
    }

    /// Run the initial sync, then follow the event log in the background.
    /// The cache reports synced once this returns.
    pub async fn start(self) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let mut event_rx = self.store.event_log.subscribe();
        self.relist().await?;
        self.cache.mark_synced();
        info!(
            "PodInformer synced ({} pods, {} service-account/node pairs)",
            self.cache.len(),
            self.cache.index().len()
        );

        Ok(tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) if event.key.starts_with(PODS_PREFIX) => self.apply(event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("PodInformer lagged by {} events, relisting", skipped);
                        if let Err(e) = self.relist().await {
                            warn!("PodInformer relist error: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("PodInformer stopped");
        }))
    }

    async fn relist(&self) -> anyhow::Result<()> {
        let entries = self.store.list_prefix(PODS_PREFIX).await?;
        let pods = entries
            .into_iter()
            .filter_map(|(key, value)| decode(&key, &value).map(|pod| (key, pod)))
            .collect();
        self.cache.replace(pods);
        Ok(())
    }

    fn apply(&self, event: WatchEvent) {
        match event.event_type {
            EventType::Put => {
                let Some(value) = event.value.as_deref() else {
                    return;
                };
                if let Some(pod) = decode(&event.key, value) {
                    debug!("PodInformer: put {}", pod.pod_ref());
                    self.cache.apply_put(&event.key, pod);
                }
            }
            EventType::Delete => {
                debug!("PodInformer: delete {}", event.key);
                self.cache.apply_delete(&event.key);
            }
        }
    }
}

fn decode(key: &str, value: &[u8]) -> Option<Pod> {
    match serde_json::from_slice(value) {
        Ok(pod) => Some(pod),
        Err(e) => {
            warn!("PodInformer: skipping undecodable pod at {}: {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SaNode;
    use chrono::Utc;
    use pkg_types::identity::ServiceAccountRef;
    use pkg_types::pod::{PodRef, PodSpec, PodStatus};
    use std::collections::HashMap;
    use std::time::Duration;

    fn make_pod(id: &str, name: &str, sa: &str, node: &str) -> Pod {
        Pod {
            id: id.to_string(),
            name: name.to_string(),
            namespace: "default".to_string(),
            spec: PodSpec {
                service_account: Some(sa.to_string()),
            },
            status: PodStatus::Running,
            node_name: Some(node.to_string()),
            labels: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    fn key_for(pod: &Pod) -> String {
        format!("{}{}/{}", PODS_PREFIX, pod.namespace, pod.id)
    }

    async fn put_pod(store: &StateStore, pod: &Pod) {
        store
            .put(&key_for(pod), &serde_json::to_vec(pod).unwrap())
            .await
            .unwrap();
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn syncs_existing_pods_and_follows_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_str().unwrap()).await.unwrap();

        let existing = make_pod("u1", "ztunnel-abc", "ztunnel", "n1");
        put_pod(&store, &existing).await;
        store
            .put(&format!("{}default/junk", PODS_PREFIX), b"not json")
            .await
            .unwrap();

        let cache = Arc::new(PodCache::new());
        let _handle = PodInformer::new(store.clone(), cache.clone())
            .start()
            .await
            .unwrap();

        assert!(cache.has_synced());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&PodRef::new("default", "ztunnel-abc")).is_some());

        let alpha = make_pod("u2", "web-1", "alpha", "n1");
        put_pod(&store, &alpha).await;
        let alpha_n1 = SaNode::new(ServiceAccountRef::new("default", "alpha"), "n1");
        eventually(|| cache.index().contains(&alpha_n1)).await;

        store.delete(&key_for(&alpha)).await.unwrap();
        eventually(|| !cache.index().contains(&alpha_n1)).await;
        assert!(cache.get(&PodRef::new("default", "web-1")).is_none());
    }
}
