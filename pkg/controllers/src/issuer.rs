use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use pkg_constants::issuance::{REASON_DENIED, REASON_FAILED, REASON_ISSUED};
use pkg_constants::state::CERTIFICATE_REQUESTS_PREFIX;
use pkg_pki::ca::ClusterCA;
use pkg_state::client::StateStore;
use pkg_state::watch::EventType;
use pkg_types::certificate::{
    CertificateRequest, Condition, ConditionStatus, ConditionType, IssuerRef,
};

/// In-process signing authority for `CertificateRequest` records that name
/// its issuer. Approves each pending record, then signs it with the cluster
/// CA or denies it if it asks for more than `max_duration`.
pub struct IssuerController {
    store: StateStore,
    ca: Arc<ClusterCA>,
    issuer_ref: IssuerRef,
    max_duration: Duration,
    resync_interval: Duration,
}

impl IssuerController {
    pub fn new(
        store: StateStore,
        ca: Arc<ClusterCA>,
        issuer_ref: IssuerRef,
        max_duration: Duration,
    ) -> Self {
        Self {
            store,
            ca,
            issuer_ref,
            max_duration,
            resync_interval: Duration::from_secs(30),
        }
    }

    /// Start the controller loop as a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "IssuerController started for {} (max duration {}s)",
                self.issuer_ref,
                self.max_duration.as_secs()
            );
            let mut event_rx = self.store.event_log.subscribe();
            let mut interval = tokio::time::interval(self.resync_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.reconcile().await {
                            warn!("IssuerController reconcile error: {}", e);
                        }
                    }
                    result = event_rx.recv() => {
                        match result {
                            Ok(event)
                                if event.event_type == EventType::Put
                                    && event.key.starts_with(CERTIFICATE_REQUESTS_PREFIX) =>
                            {
                                let Some(value) = event.value else { continue };
                                match serde_json::from_slice::<CertificateRequest>(&value) {
                                    Ok(record) => {
                                        if let Err(e) = self.process(record).await {
                                            warn!("IssuerController: {}: {}", event.key, e);
                                        }
                                    }
                                    Err(e) => debug!("IssuerController: skipping {}: {}", event.key, e),
                                }
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(_)) => {
                                if let Err(e) = self.reconcile().await {
                                    warn!("IssuerController reconcile error: {}", e);
                                }
                                interval.reset();
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    /// One pass over every stored record.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let entries = self.store.list_prefix(CERTIFICATE_REQUESTS_PREFIX).await?;
        for (key, value) in entries {
            let record: CertificateRequest = match serde_json::from_slice(&value) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if let Err(e) = self.process(record).await {
                warn!("IssuerController: {}: {}", key, e);
            }
        }
        Ok(())
    }

    async fn process(&self, mut record: CertificateRequest) -> anyhow::Result<()> {
        if record.spec.issuer_ref != self.issuer_ref || record.terminal_state().is_some() {
            return Ok(());
        }

        self.decide(&mut record);

        // A record its owner already cleaned up stays deleted.
        let data = serde_json::to_vec(&record)?;
        if !self.store.update(&record.key(), &data).await? {
            debug!(
                "CertificateRequest {}/{} deleted before it was answered",
                record.namespace, record.name
            );
        }
        Ok(())
    }

    /// Move a pending record to a terminal state.
    fn decide(&self, record: &mut CertificateRequest) {
        let name = format!("{}/{}", record.namespace, record.name);
        record.set_condition(Condition::new(
            ConditionType::Approved,
            ConditionStatus::True,
            "Approved",
            format!("approved by {}", self.issuer_ref.name),
        ));

        if record.spec.duration_secs > self.max_duration.as_secs() {
            let message = format!(
                "requested duration {}s exceeds issuer maximum {}s",
                record.spec.duration_secs,
                self.max_duration.as_secs()
            );
            info!("Denied CertificateRequest {}: {}", name, message);
            record.set_condition(Condition::new(
                ConditionType::Denied,
                ConditionStatus::True,
                REASON_DENIED,
                message.clone(),
            ));
            record.set_condition(Condition::new(
                ConditionType::Ready,
                ConditionStatus::False,
                REASON_DENIED,
                message,
            ));
            record.status.failure_time = Some(Utc::now());
            return;
        }

        match self.sign(record) {
            Ok(certificate) => {
                info!(
                    "Signed CertificateRequest {} ({}s)",
                    name, record.spec.duration_secs
                );
                record.status.certificate = Some(certificate.into_bytes());
                record.status.ca = Some(self.ca.ca_cert_pem().as_bytes().to_vec());
                record.set_condition(Condition::new(
                    ConditionType::Ready,
                    ConditionStatus::True,
                    REASON_ISSUED,
                    "certificate issued",
                ));
            }
            Err(e) => {
                warn!("Failed to sign CertificateRequest {}: {}", name, e);
                record.set_condition(Condition::new(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    REASON_FAILED,
                    e.to_string(),
                ));
                record.status.failure_time = Some(Utc::now());
            }
        }
    }

    fn sign(&self, record: &CertificateRequest) -> anyhow::Result<String> {
        if record.spec.is_ca {
            anyhow::bail!("CA certificates are not issued");
        }
        let csr_pem = std::str::from_utf8(&record.spec.request)?;
        self.ca.sign_request(
            csr_pem,
            Duration::from_secs(record.spec.duration_secs),
            &record.spec.usages,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_issuance::{RegistryBackend, SignError, SigningCoordinator, SigningRequest};
    use pkg_pki::testing::CsrBuilder;
    use pkg_types::certificate::{
        CertificateRequestSpec, CertificateRequestStatus, KeyUsage, TerminalState,
    };
    use std::collections::HashMap;

    const WEB: &str = "spiffe://cluster.local/ns/default/sa/web";

    fn issuer() -> IssuerRef {
        IssuerRef {
            name: "meshca".to_string(),
            kind: "Issuer".to_string(),
            group: "cert-manager.io".to_string(),
        }
    }

    fn make_record(name: &str, request: Vec<u8>, duration_secs: u64) -> CertificateRequest {
        CertificateRequest {
            name: name.to_string(),
            generate_name: None,
            namespace: "istio-system".to_string(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            spec: CertificateRequestSpec {
                duration_secs,
                request,
                usages: KeyUsage::workload(),
                issuer_ref: issuer(),
                is_ca: false,
            },
            status: CertificateRequestStatus::default(),
            created_at: Utc::now(),
        }
    }

    async fn setup(dir: &tempfile::TempDir) -> (StateStore, IssuerController) {
        let store = StateStore::new(dir.path().to_str().unwrap()).await.unwrap();
        let ca = Arc::new(ClusterCA::new("meshca test root").unwrap());
        let controller =
            IssuerController::new(store.clone(), ca, issuer(), Duration::from_secs(7200));
        (store, controller)
    }

    async fn put(store: &StateStore, record: &CertificateRequest) {
        store
            .put(&record.key(), &serde_json::to_vec(record).unwrap())
            .await
            .unwrap();
    }

    async fn load(store: &StateStore, name: &str) -> CertificateRequest {
        let data = store
            .get(&CertificateRequest::key_for("istio-system", name))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(&data).unwrap()
    }

    #[tokio::test]
    async fn signs_pending_request() {
        let dir = tempfile::tempdir().unwrap();
        let (store, controller) = setup(&dir).await;
        let csr = CsrBuilder::new().uri(WEB).pem();
        put(&store, &make_record("ok", csr.into_bytes(), 3600)).await;

        controller.reconcile().await.unwrap();

        let record = load(&store, "ok").await;
        assert_eq!(
            record.condition(ConditionType::Approved).map(|c| c.status),
            Some(ConditionStatus::True)
        );
        assert_eq!(
            record.condition(ConditionType::Ready).map(|c| c.reason.as_str()),
            Some(REASON_ISSUED)
        );
        match record.terminal_state() {
            Some(TerminalState::Signed { certificate, ca }) => {
                assert!(certificate.starts_with(b"-----BEGIN CERTIFICATE-----"));
                assert!(ca.is_some());
            }
            other => panic!("expected signed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn denies_overlong_request() {
        let dir = tempfile::tempdir().unwrap();
        let (store, controller) = setup(&dir).await;
        let csr = CsrBuilder::new().uri(WEB).pem();
        put(&store, &make_record("long", csr.into_bytes(), 7201)).await;

        controller.reconcile().await.unwrap();

        let record = load(&store, "long").await;
        assert!(matches!(
            record.terminal_state(),
            Some(TerminalState::Denied { .. })
        ));
        assert!(record.status.certificate.is_none());
        assert!(record.status.failure_time.is_some());
    }

    #[tokio::test]
    async fn unsignable_request_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (store, controller) = setup(&dir).await;
        put(&store, &make_record("junk", b"not a csr".to_vec(), 3600)).await;

        controller.reconcile().await.unwrap();

        assert!(matches!(
            load(&store, "junk").await.terminal_state(),
            Some(TerminalState::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn ignores_other_issuers_and_settled_records() {
        let dir = tempfile::tempdir().unwrap();
        let (store, controller) = setup(&dir).await;

        let mut foreign = make_record("foreign", b"x".to_vec(), 3600);
        foreign.spec.issuer_ref.name = "other".to_string();
        put(&store, &foreign).await;

        let mut settled = make_record("settled", b"x".to_vec(), 3600);
        settled.status.certificate = Some(b"leaf".to_vec());
        put(&store, &settled).await;

        controller.reconcile().await.unwrap();

        assert_eq!(load(&store, "foreign").await, foreign);
        assert_eq!(load(&store, "settled").await, settled);
    }

    #[tokio::test]
    async fn deleted_record_is_not_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let (store, controller) = setup(&dir).await;
        let csr = CsrBuilder::new().uri(WEB).pem();
        let record = make_record("gone", csr.into_bytes(), 3600);
        put(&store, &record).await;
        // The owner cleans the record up after it was listed.
        store.delete(&record.key()).await.unwrap();

        controller.process(record.clone()).await.unwrap();

        assert_eq!(store.get(&record.key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn coordinator_receives_certificate_from_running_issuer() {
        let dir = tempfile::tempdir().unwrap();
        let (store, controller) = setup(&dir).await;
        let _handle = controller.start();

        let backend = Arc::new(RegistryBackend::new(store.clone()));
        let coordinator = SigningCoordinator::new(backend, "istio-system", issuer());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

        let request = SigningRequest {
            identities: WEB.to_string(),
            csr_pem: CsrBuilder::new().uri(WEB).pem().into_bytes(),
            duration: Duration::from_secs(3600),
            usages: KeyUsage::workload(),
        };
        let bundle = coordinator.sign(&request, deadline).await.unwrap();
        assert!(bundle.certificate.starts_with(b"-----BEGIN CERTIFICATE-----"));
        assert!(bundle.ca.is_some());

        let too_long = SigningRequest {
            duration: Duration::from_secs(86400),
            ..request
        };
        let err = coordinator.sign(&too_long, deadline).await.unwrap_err();
        assert!(matches!(err, SignError::Denied { .. }), "{}", err);
    }
}
