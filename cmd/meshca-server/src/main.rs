use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::issuance::{
    DEFAULT_ISSUER_GROUP, DEFAULT_ISSUER_KIND, DEFAULT_ISSUER_NAME, DEFAULT_MAX_DURATION_SECS,
    DEFAULT_REQUEST_NAMESPACE, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TRUST_DOMAIN,
};
use pkg_constants::paths::{DEFAULT_SERVER_CONFIG, DEFAULT_SERVER_DATA_DIR, DEFAULT_SERVER_PORT};
use pkg_types::certificate::IssuerRef;
use pkg_types::config::{ServerConfigFile, load_config_file};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meshca-server", about = "Mesh workload certificate authority")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// SPIFFE trust domain of issued identities
    #[arg(long)]
    trust_domain: Option<String>,

    /// Namespace certificate signing records are created in
    #[arg(long)]
    namespace: Option<String>,

    /// Upper bound on certificate lifetime, in seconds
    #[arg(long)]
    max_duration_secs: Option<u64>,

    /// How long a request may wait for the signing authority, in seconds
    #[arg(long)]
    request_timeout_secs: Option<u64>,

    /// Keep signing records after they complete
    #[arg(long)]
    preserve_requests: Option<bool>,

    /// Run the in-process issuer
    #[arg(long)]
    embedded_issuer: Option<bool>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_SERVER_PORT);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_SERVER_DATA_DIR.to_string());
    let trust_domain = cli
        .trust_domain
        .or(file_cfg.trust_domain)
        .unwrap_or_else(|| DEFAULT_TRUST_DOMAIN.to_string());
    let namespace = cli
        .namespace
        .or(file_cfg.namespace)
        .unwrap_or_else(|| DEFAULT_REQUEST_NAMESPACE.to_string());
    let max_duration_secs = cli
        .max_duration_secs
        .or(file_cfg.max_duration_secs)
        .unwrap_or(DEFAULT_MAX_DURATION_SECS);
    let request_timeout_secs = cli
        .request_timeout_secs
        .or(file_cfg.request_timeout_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    let preserve_requests = cli
        .preserve_requests
        .or(file_cfg.preserve_requests)
        .unwrap_or(false);
    let embedded_issuer = cli
        .embedded_issuer
        .or(file_cfg.embedded_issuer)
        .unwrap_or(true);

    let issuer_cfg = file_cfg.issuer_ref.unwrap_or_default();
    let issuer_ref = IssuerRef {
        name: issuer_cfg
            .name
            .unwrap_or_else(|| DEFAULT_ISSUER_NAME.to_string()),
        kind: issuer_cfg
            .kind
            .unwrap_or_else(|| DEFAULT_ISSUER_KIND.to_string()),
        group: issuer_cfg
            .group
            .unwrap_or_else(|| DEFAULT_ISSUER_GROUP.to_string()),
    };

    info!("Starting meshca-server");
    info!("  Port:          {}", port);
    info!("  Data dir:      {}", data_dir);
    info!("  Trust domain:  {}", trust_domain);
    info!("  Namespace:     {}", namespace);
    info!("  Issuer:        {}", issuer_ref);
    info!("  Max duration:  {}s", max_duration_secs);
    info!("  Preserve:      {}", preserve_requests);

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        data_dir,
        trust_domain,
        namespace,
        issuer_ref,
        max_duration: Duration::from_secs(max_duration_secs),
        request_timeout: Duration::from_secs(request_timeout_secs),
        preserve_requests,
        trusted_node_accounts: file_cfg.trusted_node_accounts,
        tokens: file_cfg.tokens,
        embedded_issuer,
    };

    start_server(config).await?;

    Ok(())
}
