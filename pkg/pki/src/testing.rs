//! CSR fixtures for tests in this and downstream crates.

use std::net::IpAddr;

use rcgen::Ia5String;
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair, SanType};

/// Builds PKCS#10 requests with arbitrary SANs and raw extensions.
#[derive(Debug, Clone, Default)]
pub struct CsrBuilder {
    sans: Vec<SanType>,
    common_name: Option<String>,
    extensions: Vec<CustomExtension>,
}

impl CsrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uri(mut self, uri: &str) -> Self {
        self.sans.push(SanType::URI(ia5(uri)));
        self
    }

    pub fn dns(mut self, name: &str) -> Self {
        self.sans.push(SanType::DnsName(ia5(name)));
        self
    }

    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.sans.push(SanType::IpAddress(ip));
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.sans.push(SanType::Rfc822Name(ia5(email)));
        self
    }

    pub fn common_name(mut self, cn: &str) -> Self {
        self.common_name = Some(cn.to_string());
        self
    }

    pub fn extension(mut self, ext: CustomExtension) -> Self {
        self.extensions.push(ext);
        self
    }

    fn params(&self) -> CertificateParams {
        let mut params = CertificateParams::default();
        // The default subject carries a common name; start from an empty one.
        params.distinguished_name = DistinguishedName::new();
        if let Some(cn) = &self.common_name {
            params.distinguished_name.push(DnType::CommonName, cn.as_str());
        }
        params.subject_alt_names = self.sans.clone();
        params.custom_extensions = self.extensions.clone();
        params
    }

    pub fn der(&self) -> Vec<u8> {
        let key = KeyPair::generate().expect("generate key");
        let csr = self.params().serialize_request(&key).expect("serialize csr");
        csr.der().to_vec()
    }

    pub fn pem(&self) -> String {
        let key = KeyPair::generate().expect("generate key");
        let csr = self.params().serialize_request(&key).expect("serialize csr");
        csr.pem().expect("encode csr pem")
    }
}

fn ia5(s: &str) -> Ia5String {
    Ia5String::try_from(s.to_string()).expect("ia5 string")
}

/// keyUsage extension with the given named bits (bit 0 = digitalSignature),
/// encoded as a minimal DER BIT STRING.
pub fn key_usage_extension(bits: u32) -> CustomExtension {
    let content = match (0..32).rev().find(|i| bits & (1 << i) != 0) {
        None => vec![0x03, 0x01, 0x00],
        Some(highest) => {
            let len = highest / 8 + 1;
            let unused = 7 - (highest % 8);
            let mut bytes = vec![0u8; len];
            for i in 0..=highest {
                if bits & (1 << i) != 0 {
                    bytes[i / 8] |= 0x80 >> (i % 8);
                }
            }
            let mut out = vec![0x03, (len + 1) as u8, unused as u8];
            out.extend(bytes);
            out
        }
    };
    CustomExtension::from_oid_content(&[2, 5, 29, 15], content)
}

/// extendedKeyUsage extension over already DER-encoded OIDs.
pub fn eku_extension(oids: &[&[u8]]) -> CustomExtension {
    let body: Vec<u8> = oids.iter().flat_map(|oid| oid.iter().copied()).collect();
    let mut content = vec![0x30, body.len() as u8];
    content.extend(body);
    CustomExtension::from_oid_content(&[2, 5, 29, 37], content)
}
