//! In-memory signing backend for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use pkg_types::certificate::CertificateRequest;

use crate::backend::{RecordEvent, RecordStream, SigningBackend};

type Responder = Box<dyn Fn(&mut CertificateRequest) + Send + Sync>;

/// Records every call. Optionally answers each created record in place, so
/// the first read after creation already sees a terminal state.
#[derive(Default)]
pub(crate) struct FakeBackend {
    records: Mutex<HashMap<String, CertificateRequest>>,
    created: Mutex<Vec<CertificateRequest>>,
    deleted: Mutex<Vec<String>>,
    watchers: Mutex<Vec<(String, mpsc::UnboundedSender<RecordEvent>)>>,
    responder: Option<Responder>,
    create_delay: Option<Duration>,
    seq: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn responding(responder: impl Fn(&mut CertificateRequest) + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    /// Store each created record, then wait `delay` before answering.
    pub(crate) fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub(crate) fn created(&self) -> Vec<CertificateRequest> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }

    /// Deliver `event` to watchers of `name`, updating the stored record.
    pub(crate) fn push(&self, name: &str, event: RecordEvent) {
        {
            let mut records = self.records.lock().unwrap();
            match &event {
                RecordEvent::Applied(record) => {
                    records.insert(name.to_string(), record.clone());
                }
                RecordEvent::Deleted => {
                    records.remove(name);
                }
                RecordEvent::Resync => {}
            }
        }
        for (watched, tx) in self.watchers.lock().unwrap().iter() {
            if watched == name {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Overwrite a stored record without notifying watchers.
    pub(crate) fn replace_silently(&self, record: CertificateRequest) {
        self.records
            .lock()
            .unwrap()
            .insert(record.name.clone(), record);
    }

    /// Drop every open watch stream.
    pub(crate) fn close_watches(&self) {
        self.watchers.lock().unwrap().clear();
    }

    /// Wait until a watch is open.
    pub(crate) async fn until_watched(&self) {
        for _ in 0..500 {
            if self.watcher_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("no watch was established");
    }

    /// Wait until a delete has been observed.
    pub(crate) async fn until_deleted(&self) -> Vec<String> {
        for _ in 0..500 {
            let deleted = self.deleted();
            if !deleted.is_empty() {
                return deleted;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("no delete was observed");
    }
}

#[async_trait]
impl SigningBackend for FakeBackend {
    async fn create(&self, mut record: CertificateRequest) -> Result<CertificateRequest> {
        if record.name.is_empty() {
            let n = self.seq.fetch_add(1, Ordering::Relaxed);
            record.name = format!(
                "{}{:08}",
                record.generate_name.as_deref().unwrap_or_default(),
                n
            );
        }
        self.created.lock().unwrap().push(record.clone());

        let mut stored = record.clone();
        if let Some(respond) = &self.responder {
            respond(&mut stored);
        }
        self.records
            .lock()
            .unwrap()
            .insert(stored.name.clone(), stored);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(record)
    }

    async fn get(&self, _namespace: &str, name: &str) -> Result<Option<CertificateRequest>> {
        Ok(self.records.lock().unwrap().get(name).cloned())
    }

    async fn watch(&self, _namespace: &str, name: &str) -> Result<RecordStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().unwrap().push((name.to_string(), tx));
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn delete(&self, _namespace: &str, name: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        self.records.lock().unwrap().remove(name);
        Ok(())
    }
}
