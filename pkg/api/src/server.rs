use anyhow::{Context, bail};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::auth::request_metadata_middleware;
use crate::handlers::{certificates, health};
use crate::request_id::request_id_middleware;
use pkg_authz::{NodeAuthorizer, PodCache, PodInformer};
use pkg_controllers::issuer::IssuerController;
use pkg_issuance::{
    IssuanceService, IssuanceSettings, RegistryBackend, SigningCoordinator, TokenAuthenticator,
};
use pkg_pki::ca::ClusterCA;
use pkg_state::client::StateStore;
use pkg_types::certificate::IssuerRef;
use pkg_types::config::TokenEntry;
use pkg_types::identity::ServiceAccountRef;
use pkg_types::validate::validate_name;

/// Server configuration resolved from the CLI and config file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: String,
    pub trust_domain: String,
    /// Namespace signing records are created in.
    pub namespace: String,
    pub issuer_ref: IssuerRef,
    pub max_duration: Duration,
    pub request_timeout: Duration,
    pub preserve_requests: bool,
    /// `namespace/name` service accounts allowed to impersonate colocated workloads.
    pub trusted_node_accounts: Vec<String>,
    pub tokens: Vec<TokenEntry>,
    /// Run the in-process issuer for `issuer_ref`.
    pub embedded_issuer: bool,
}

impl ServerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trust_domain.is_empty() {
            bail!("trust domain must not be empty");
        }
        validate_name(&self.namespace).context("invalid record namespace")?;
        if self.issuer_ref.name.is_empty() || self.issuer_ref.kind.is_empty() {
            bail!("issuer reference needs a name and a kind");
        }
        if self.max_duration.is_zero() {
            bail!("max duration must be positive");
        }
        if self.request_timeout.is_zero() {
            bail!("request timeout must be positive");
        }
        self.trusted_accounts()?;

        let mut seen = HashSet::new();
        for entry in &self.tokens {
            if entry.token.is_empty() {
                bail!(
                    "empty token configured for {}/{}",
                    entry.namespace,
                    entry.service_account
                );
            }
            if !seen.insert(entry.token.as_str()) {
                bail!(
                    "token for {}/{} is configured more than once",
                    entry.namespace,
                    entry.service_account
                );
            }
        }
        Ok(())
    }

    pub fn trusted_accounts(&self) -> anyhow::Result<Vec<ServiceAccountRef>> {
        self.trusted_node_accounts
            .iter()
            .map(|s| s.parse::<ServiceAccountRef>())
            .collect()
    }
}

/// Wire the issuance pipeline and its background tasks over `store`.
///
/// When node impersonation is enabled this waits for the pod cache's initial
/// sync, so the returned state is ready to serve.
pub async fn build_state(config: &ServerConfig, store: StateStore) -> anyhow::Result<AppState> {
    config.validate()?;

    if config.embedded_issuer {
        let ca = ClusterCA::new(&format!("{} mesh CA", config.trust_domain))?;
        IssuerController::new(
            store.clone(),
            Arc::new(ca),
            config.issuer_ref.clone(),
            config.max_duration,
        )
        .start();
    }

    let backend = Arc::new(RegistryBackend::new(store.clone()));
    let coordinator =
        SigningCoordinator::new(backend, config.namespace.clone(), config.issuer_ref.clone())
            .preserve_records(config.preserve_requests);

    let authenticator = TokenAuthenticator::new(&config.trust_domain, &config.tokens);
    info!("Loaded {} bearer tokens", authenticator.len());

    let mut issuance = IssuanceService::new(
        vec![Arc::new(authenticator)],
        coordinator,
        IssuanceSettings {
            max_duration: config.max_duration,
            request_timeout: config.request_timeout,
        },
    );

    let trusted = config.trusted_accounts()?;
    if trusted.is_empty() {
        info!("No trusted node accounts configured; node impersonation disabled");
    } else {
        let cache = Arc::new(PodCache::new());
        PodInformer::new(store, cache.clone()).start().await?;
        info!("Node impersonation enabled for {} accounts", trusted.len());
        issuance = issuance.with_node_authorizer(Arc::new(NodeAuthorizer::new(cache, trusted)));
    }

    Ok(AppState {
        issuance: Arc::new(issuance),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/certificates", post(certificates::create_certificate))
        .route_layer(middleware::from_fn(request_metadata_middleware))
        .route("/healthz", get(health::healthz))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let store = StateStore::new(&config.data_dir).await?;
    let state = build_state(&config, store.clone()).await?;
    let app = router(state);

    info!("Starting meshca API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
