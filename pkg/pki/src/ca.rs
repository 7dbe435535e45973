use std::time::Duration;

use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use time::OffsetDateTime;
use tracing::info;

use pkg_types::certificate::KeyUsage;

/// Backdate issued certificates to tolerate clock skew between peers.
const NOT_BEFORE_SKEW: Duration = Duration::from_secs(5 * 60);

/// Root lifetime for a freshly generated CA.
const ROOT_LIFETIME: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Internal mesh Certificate Authority.
/// Generates a self-signed root CA and signs workload CSRs with it.
pub struct ClusterCA {
    ca_cert_pem: String,
    ca_key_pair: KeyPair,
    ca_cert: rcgen::Certificate,
}

impl ClusterCA {
    /// Create a new CA with a freshly-generated self-signed root certificate.
    pub fn new(common_name: &str) -> anyhow::Result<Self> {
        info!("Generating mesh CA '{}'", common_name);

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params
            .distinguished_name
            .push(DnType::OrganizationName, "meshca");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - NOT_BEFORE_SKEW;
        params.not_after = now + ROOT_LIFETIME;

        let key_pair = KeyPair::generate()?;
        let ca_cert = params.self_signed(&key_pair)?;
        let ca_cert_pem = ca_cert.pem();

        info!("Mesh CA generated successfully");

        Ok(Self {
            ca_cert_pem,
            ca_key_pair: key_pair,
            ca_cert,
        })
    }

    /// Sign a PEM-encoded CSR, keeping its public key and SANs and replacing
    /// everything else with a leaf profile. Returns the certificate PEM.
    pub fn sign_request(
        &self,
        csr_pem: &str,
        lifetime: Duration,
        usages: &[KeyUsage],
    ) -> anyhow::Result<String> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)?;

        let now = OffsetDateTime::now_utc();
        csr.params.not_before = now - NOT_BEFORE_SKEW;
        csr.params.not_after = now + lifetime;
        csr.params.is_ca = IsCa::NoCa;
        csr.params.distinguished_name = DistinguishedName::new();
        csr.params.key_usages = Vec::new();
        csr.params.extended_key_usages = Vec::new();
        csr.params.custom_extensions = Vec::new();
        for usage in usages {
            match usage {
                KeyUsage::DigitalSignature => {
                    csr.params.key_usages.push(KeyUsagePurpose::DigitalSignature)
                }
                KeyUsage::KeyEncipherment => {
                    csr.params.key_usages.push(KeyUsagePurpose::KeyEncipherment)
                }
                KeyUsage::ServerAuth => csr
                    .params
                    .extended_key_usages
                    .push(ExtendedKeyUsagePurpose::ServerAuth),
                KeyUsage::ClientAuth => csr
                    .params
                    .extended_key_usages
                    .push(ExtendedKeyUsagePurpose::ClientAuth),
            }
        }

        let cert = csr.signed_by(&self.ca_cert, &self.ca_key_pair)?;
        Ok(cert.pem())
    }

    /// Return the CA certificate PEM so peers can verify issued certificates.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CsrBuilder;
    use x509_parser::extensions::GeneralName;
    use x509_parser::pem::parse_x509_pem;

    const SPIFFE: &str = "spiffe://cluster.local/ns/default/sa/web";

    #[test]
    fn signs_workload_request() {
        let ca = ClusterCA::new("meshca test root").unwrap();
        let csr = CsrBuilder::new().uri(SPIFFE).pem();

        let cert_pem = ca
            .sign_request(&csr, Duration::from_secs(3600), &KeyUsage::workload())
            .unwrap();

        let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        assert!(!cert.is_ca());

        let san = cert.subject_alternative_name().unwrap().unwrap();
        assert!(matches!(
            san.value.general_names.as_slice(),
            [GeneralName::URI(uri)] if *uri == SPIFFE
        ));

        let eku = cert.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.server_auth && eku.value.client_auth);

        let lifetime = cert.validity().not_after.timestamp() - cert.validity().not_before.timestamp();
        assert_eq!(lifetime as u64, 3600 + NOT_BEFORE_SKEW.as_secs());
    }

    #[test]
    fn rejects_garbage_request() {
        let ca = ClusterCA::new("meshca test root").unwrap();
        assert!(
            ca.sign_request("garbage", Duration::from_secs(60), &[])
                .is_err()
        );
    }

    #[test]
    fn ca_pem_is_a_certificate() {
        let ca = ClusterCA::new("meshca test root").unwrap();
        assert!(ca.ca_cert_pem().starts_with("-----BEGIN CERTIFICATE-----"));
    }
}
