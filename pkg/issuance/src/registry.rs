use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use pkg_constants::issuance::REQUEST_NAME_SUFFIX_LEN;
use pkg_state::client::StateStore;
use pkg_state::watch::EventType;
use pkg_types::certificate::CertificateRequest;
use pkg_types::validate::{validate_generate_name, validate_name};

use crate::backend::{RecordEvent, RecordStream, SigningBackend};

/// [`SigningBackend`] over the cluster state store. Records live under
/// `/registry/certificaterequests/{namespace}/{name}`.
#[derive(Clone)]
pub struct RegistryBackend {
    store: StateStore,
}

impl RegistryBackend {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

fn generate_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &suffix[..REQUEST_NAME_SUFFIX_LEN])
}

#[async_trait]
impl SigningBackend for RegistryBackend {
    async fn create(&self, mut record: CertificateRequest) -> Result<CertificateRequest> {
        validate_name(&record.namespace)?;
        if !record.name.is_empty() {
            validate_name(&record.name)?;
            let data = serde_json::to_vec(&record)?;
            if !self.store.create(&record.key(), &data).await? {
                bail!(
                    "certificate request {}/{} already exists",
                    record.namespace,
                    record.name
                );
            }
            return Ok(record);
        }

        let prefix = record
            .generate_name
            .clone()
            .ok_or_else(|| anyhow!("certificate request needs a name or generate_name"))?;
        validate_generate_name(&prefix, REQUEST_NAME_SUFFIX_LEN)?;
        loop {
            record.name = generate_name(&prefix);
            let data = serde_json::to_vec(&record)?;
            if self.store.create(&record.key(), &data).await? {
                return Ok(record);
            }
            debug!("Generated name {} is taken, retrying", record.name);
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CertificateRequest>> {
        match self
            .store
            .get(&CertificateRequest::key_for(namespace, name))
            .await?
        {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn watch(&self, namespace: &str, name: &str) -> Result<RecordStream> {
        let key = CertificateRequest::key_for(namespace, name);
        let rx = self.store.event_log.subscribe();

        let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
            Ok(event) if event.key == key => match event.event_type {
                EventType::Put => {
                    let value = event.value?;
                    match serde_json::from_slice(&value) {
                        Ok(record) => Some(RecordEvent::Applied(record)),
                        Err(e) => {
                            warn!("Undecodable certificate request at {}: {}", key, e);
                            Some(RecordEvent::Resync)
                        }
                    }
                }
                EventType::Delete => Some(RecordEvent::Deleted),
            },
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!("Watch on {} lagged by {} events", key, skipped);
                Some(RecordEvent::Resync)
            }
        });
        Ok(Box::pin(stream))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.store
            .delete(&CertificateRequest::key_for(namespace, name))
            .await
    }
}
