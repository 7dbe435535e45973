use serde::{Deserialize, Serialize};

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 15012
/// data-dir: /var/lib/meshca/data
/// trust-domain: cluster.local
/// namespace: istio-system
/// issuer-ref:
///   name: meshca
///   kind: Issuer
///   group: cert-manager.io
/// max-duration-secs: 86400
/// preserve-requests: false
/// trusted-node-accounts:
///   - istio-system/ztunnel
/// tokens:
///   - token: ztunnel-node-a
///     namespace: istio-system
///     service-account: ztunnel
///     pod-name: ztunnel-abcde
///     pod-uid: 6f1c...
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "trust-domain")]
    pub trust_domain: Option<String>,
    /// Namespace certificate signing records are created in.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, alias = "issuer-ref")]
    pub issuer_ref: Option<IssuerRefConfig>,
    #[serde(default, alias = "max-duration-secs")]
    pub max_duration_secs: Option<u64>,
    #[serde(default, alias = "request-timeout-secs")]
    pub request_timeout_secs: Option<u64>,
    /// Keep records after they reach a terminal state instead of deleting them.
    #[serde(default, alias = "preserve-requests")]
    pub preserve_requests: Option<bool>,
    /// Service accounts (`namespace/name`) allowed to request certificates
    /// on behalf of workloads on their node.
    #[serde(default, alias = "trusted-node-accounts")]
    pub trusted_node_accounts: Vec<String>,
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
    /// Run the in-process issuer that signs records for `issuer-ref`.
    #[serde(default, alias = "embedded-issuer")]
    pub embedded_issuer: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuerRefConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

/// A static bearer token and the service account it authenticates as.
/// Pod claims are only needed for node-impersonating callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub namespace: String,
    #[serde(alias = "service-account")]
    pub service_account: String,
    #[serde(default, alias = "pod-name")]
    pub pod_name: Option<String>,
    #[serde(default, alias = "pod-uid")]
    pub pod_uid: Option<String>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kebab_case_config() {
        let yaml = r#"
port: 15012
data-dir: /var/lib/meshca
trust-domain: mesh.example
issuer-ref:
  name: vault
  kind: ClusterIssuer
max-duration-secs: 1800
preserve-requests: true
trusted-node-accounts:
  - istio-system/ztunnel
tokens:
  - token: t1
    namespace: istio-system
    service-account: ztunnel
    pod-name: ztunnel-1
    pod-uid: uid-1
"#;
        let cfg: ServerConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.port, Some(15012));
        assert_eq!(cfg.trust_domain.as_deref(), Some("mesh.example"));
        assert_eq!(cfg.max_duration_secs, Some(1800));
        assert_eq!(cfg.preserve_requests, Some(true));
        let issuer = cfg.issuer_ref.unwrap();
        assert_eq!(issuer.kind.as_deref(), Some("ClusterIssuer"));
        assert!(issuer.group.is_none());
        assert_eq!(cfg.trusted_node_accounts, vec!["istio-system/ztunnel"]);
        assert_eq!(cfg.tokens[0].pod_uid.as_deref(), Some("uid-1"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg: ServerConfigFile =
            load_config_file("/nonexistent/meshca/config.yaml").unwrap();
        assert!(cfg.port.is_none());
        assert!(cfg.tokens.is_empty());
    }
}
