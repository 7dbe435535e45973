//! Drives one signing record on the external authority from creation to a
//! terminal state.
//!
//! The wait is a small state machine over three inputs: a fresh read of the
//! record, an event from the record's watch stream, and the caller's
//! deadline. Whatever the outcome, the record is deleted afterwards unless
//! records are preserved, and that deletion outlives the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pkg_constants::issuance::{
    CLEANUP_TIMEOUT_SECS, IDENTITIES_ANNOTATION, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    REQUEST_NAME_PREFIX,
};
use pkg_types::certificate::{
    CertificateRequest, CertificateRequestSpec, CertificateRequestStatus, IssuerRef, KeyUsage,
    TerminalState,
};

use crate::backend::{RecordEvent, SigningBackend};
use crate::error::SignError;

/// What to ask the authority to sign. Immutable once built.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// Comma-joined identities, recorded on the record for audit.
    pub identities: String,
    pub csr_pem: Vec<u8>,
    pub duration: Duration,
    pub usages: Vec<KeyUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBundle {
    pub certificate: Vec<u8>,
    pub ca: Option<Vec<u8>>,
}

pub struct SigningCoordinator {
    backend: Arc<dyn SigningBackend>,
    namespace: String,
    issuer_ref: IssuerRef,
    preserve_records: bool,
}

enum Input {
    Event(Option<RecordEvent>),
    Deadline,
}

impl SigningCoordinator {
    pub fn new(
        backend: Arc<dyn SigningBackend>,
        namespace: impl Into<String>,
        issuer_ref: IssuerRef,
    ) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            issuer_ref,
            preserve_records: false,
        }
    }

    /// Keep records after they reach a terminal state.
    pub fn preserve_records(mut self, preserve: bool) -> Self {
        self.preserve_records = preserve;
        self
    }

    /// Create a record for `request` and wait until `deadline` for the
    /// authority to sign, deny, or fail it.
    pub async fn sign(
        &self,
        request: &SigningRequest,
        deadline: Instant,
    ) -> Result<SignedBundle, SignError> {
        let record = self.build_record(request);
        let created = self.create(record, deadline).await?;
        info!(
            "Created CertificateRequest {}/{} for {}",
            created.namespace, created.name, request.identities
        );

        // Runs on every exit path, including this future being dropped.
        let _cleanup =
            (!self.preserve_records).then(|| Cleanup::new(self.backend.clone(), &created));

        let result = self
            .await_terminal(&created.namespace, &created.name, deadline)
            .await;
        if let Err(e) = &result {
            warn!("CertificateRequest {}/{}: {}", created.namespace, created.name, e);
        }
        result
    }

    /// Run the backend create on its own task so a record written after the
    /// caller stopped waiting is still handed to cleanup.
    async fn create(
        &self,
        record: CertificateRequest,
        deadline: Instant,
    ) -> Result<CertificateRequest, SignError> {
        let (tx, rx) = oneshot::channel();
        let cleanup_backend = (!self.preserve_records).then(|| self.backend.clone());
        let backend = self.backend.clone();
        let task_cleanup = cleanup_backend.clone();
        tokio::spawn(async move {
            let result = backend.create(record).await;
            if let Err(Ok(created)) = tx.send(result) {
                abandon(task_cleanup, &created);
            }
        });

        let mut pending = PendingCreate {
            rx,
            cleanup_backend,
        };
        match tokio::time::timeout_at(deadline, &mut pending.rx).await {
            Ok(Ok(result)) => result.map_err(SignError::Backend),
            Ok(Err(_)) => Err(SignError::Backend(anyhow::anyhow!(
                "create task ended without a result"
            ))),
            Err(_) => Err(SignError::DeadlineExceeded),
        }
    }

    fn build_record(&self, request: &SigningRequest) -> CertificateRequest {
        CertificateRequest {
            name: String::new(),
            generate_name: Some(REQUEST_NAME_PREFIX.to_string()),
            namespace: self.namespace.clone(),
            labels: HashMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]),
            annotations: HashMap::from([(
                IDENTITIES_ANNOTATION.to_string(),
                request.identities.clone(),
            )]),
            spec: CertificateRequestSpec {
                duration_secs: request.duration.as_secs(),
                request: request.csr_pem.clone(),
                usages: request.usages.clone(),
                issuer_ref: self.issuer_ref.clone(),
                is_ca: false,
            },
            status: CertificateRequestStatus::default(),
            created_at: Utc::now(),
        }
    }

    async fn await_terminal(
        &self,
        namespace: &str,
        name: &str,
        deadline: Instant,
    ) -> Result<SignedBundle, SignError> {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let mut events = tokio::select! {
            watch = self.backend.watch(namespace, name) => watch.map_err(SignError::Backend)?,
            _ = &mut sleep => return Err(SignError::DeadlineExceeded),
        };

        // The record may have settled before the watch was established.
        let mut refetch = true;
        loop {
            if refetch {
                refetch = false;
                let current = tokio::select! {
                    got = self.backend.get(namespace, name) => got.map_err(SignError::Backend)?,
                    _ = &mut sleep => return Err(SignError::DeadlineExceeded),
                };
                let Some(record) = current else {
                    return Err(SignError::Deleted(name.to_string()));
                };
                if let Some(state) = record.terminal_state() {
                    return settle(name, state);
                }
            }

            let input = tokio::select! {
                event = events.next() => Input::Event(event),
                _ = &mut sleep => Input::Deadline,
            };
            match input {
                Input::Deadline => return Err(SignError::DeadlineExceeded),
                Input::Event(None) => return Err(SignError::WatchClosed(name.to_string())),
                Input::Event(Some(RecordEvent::Deleted)) => {
                    return Err(SignError::Deleted(name.to_string()));
                }
                Input::Event(Some(RecordEvent::Resync)) => {
                    debug!("Resyncing CertificateRequest {}/{}", namespace, name);
                    refetch = true;
                }
                Input::Event(Some(RecordEvent::Applied(record))) => {
                    if let Some(state) = record.terminal_state() {
                        return settle(name, state);
                    }
                }
            }
        }
    }
}

fn settle(name: &str, state: TerminalState) -> Result<SignedBundle, SignError> {
    match state {
        TerminalState::Denied { reason, message } => Err(SignError::Denied {
            name: name.to_string(),
            reason,
            message,
        }),
        TerminalState::Failed { reason, message } => Err(SignError::Failed {
            name: name.to_string(),
            reason,
            message,
        }),
        TerminalState::Signed { certificate, ca } => Ok(SignedBundle { certificate, ca }),
    }
}

/// A create whose result has not been taken yet. Whichever side gives up
/// first, the waiting caller or the create task, hands a late record to
/// cleanup.
struct PendingCreate {
    rx: oneshot::Receiver<anyhow::Result<CertificateRequest>>,
    cleanup_backend: Option<Arc<dyn SigningBackend>>,
}

impl Drop for PendingCreate {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(Ok(created)) = self.rx.try_recv() {
            abandon(self.cleanup_backend.take(), &created);
        }
    }
}

/// A record was created after its caller stopped waiting.
fn abandon(cleanup_backend: Option<Arc<dyn SigningBackend>>, created: &CertificateRequest) {
    warn!(
        "CertificateRequest {}/{} was created after its caller gave up",
        created.namespace, created.name
    );
    if let Some(backend) = cleanup_backend {
        drop(Cleanup::new(backend, created));
    }
}

/// Deletes the record when dropped, on a detached task bounded by its own
/// timeout.
struct Cleanup {
    backend: Arc<dyn SigningBackend>,
    namespace: String,
    name: String,
}

impl Cleanup {
    fn new(backend: Arc<dyn SigningBackend>, record: &CertificateRequest) -> Self {
        Self {
            backend,
            namespace: record.namespace.clone(),
            name: record.name.clone(),
        }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let backend = self.backend.clone();
        let namespace = std::mem::take(&mut self.namespace);
        let name = std::mem::take(&mut self.name);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No runtime to delete CertificateRequest {}/{}; leaving it in place",
                namespace, name
            );
            return;
        };
        runtime.spawn(async move {
            let timeout = Duration::from_secs(CLEANUP_TIMEOUT_SECS);
            match tokio::time::timeout(timeout, backend.delete(&namespace, &name)).await {
                Ok(Ok(())) => debug!("Deleted CertificateRequest {}/{}", namespace, name),
                Ok(Err(e)) => warn!(
                    "Failed to delete CertificateRequest {}/{}: {}",
                    namespace, name, e
                ),
                Err(_) => warn!(
                    "Timed out deleting CertificateRequest {}/{}",
                    namespace, name
                ),
            }
        });
    }
}
