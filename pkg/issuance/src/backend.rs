use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use pkg_types::certificate::CertificateRequest;

/// An observation of a single watched record.
#[derive(Debug, Clone)]
pub enum RecordEvent {
    /// The record was created or changed; carries its current state.
    Applied(CertificateRequest),
    /// The record is gone.
    Deleted,
    /// Events may have been missed; re-read the record.
    Resync,
}

pub type RecordStream = BoxStream<'static, RecordEvent>;

/// The external authority's certificate-request resource API.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Create `record`. If its name is empty the backend derives a unique one
    /// from `generate_name`. Returns the record as stored.
    async fn create(&self, record: CertificateRequest) -> Result<CertificateRequest>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CertificateRequest>>;

    /// Stream changes to exactly one record. Only changes made after this
    /// call returns are guaranteed to be delivered.
    async fn watch(&self, namespace: &str, name: &str) -> Result<RecordStream>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}
