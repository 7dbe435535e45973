use std::net::IpAddr;

use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

use crate::error::{CsrError, Violation};
use crate::extensions::{extension_violations, ip_from_bytes};

const CSR_PEM_LABEL: &str = "CERTIFICATE REQUEST";

/// Identity-bearing fields extracted from a validated certificate request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrInfo {
    pub uris: Vec<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
    pub common_names: Vec<String>,
}

/// Decode a single PEM `CERTIFICATE REQUEST` block into DER.
pub fn decode_pem(pem: &[u8]) -> Result<Vec<u8>, CsrError> {
    let (_, block) = parse_x509_pem(pem).map_err(|e| CsrError::Pem(e.to_string()))?;
    if block.label != CSR_PEM_LABEL {
        return Err(CsrError::Label(block.label));
    }
    Ok(block.contents)
}

/// Parse a DER request and check its self-signature.
pub fn parse_der(der: &[u8]) -> Result<X509CertificationRequest<'_>, CsrError> {
    let (rest, csr) =
        X509CertificationRequest::from_der(der).map_err(|e| CsrError::Parse(e.to_string()))?;
    if !rest.is_empty() {
        return Err(CsrError::Parse(format!(
            "{} trailing bytes after request",
            rest.len()
        )));
    }
    csr.verify_signature()
        .map_err(|e| CsrError::Signature(e.to_string()))?;
    Ok(csr)
}

/// Pull the identity-bearing fields out of a parsed request.
pub fn csr_info(csr: &X509CertificationRequest<'_>) -> CsrInfo {
    let mut info = CsrInfo::default();

    for cn in csr.certification_request_info.subject.iter_common_name() {
        let value = cn
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|_| "<non-utf8>".to_string());
        info.common_names.push(value);
    }

    if let Some(extensions) = csr.requested_extensions() {
        for ext in extensions {
            let ParsedExtension::SubjectAlternativeName(san) = ext else {
                continue;
            };
            for name in &san.general_names {
                match name {
                    GeneralName::URI(uri) => info.uris.push(uri.to_string()),
                    GeneralName::DNSName(dns) => info.dns_names.push(dns.to_string()),
                    GeneralName::RFC822Name(email) => info.email_addresses.push(email.to_string()),
                    GeneralName::IPAddress(raw) => {
                        if let Some(ip) = ip_from_bytes(raw) {
                            info.ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    info
}

/// Full structural validation of a DER request: signature, allow-listed
/// extensions, and identity carried exclusively as URI SANs.
///
/// All violations are reported together.
pub fn validate_der(der: &[u8]) -> Result<CsrInfo, CsrError> {
    let csr = parse_der(der)?;
    let info = csr_info(&csr);

    let mut violations: Vec<Violation> = info
        .common_names
        .iter()
        .map(|cn| Violation::CommonName(cn.clone()))
        .collect();
    for dns in &info.dns_names {
        violations.push(Violation::NonUriSan(format!("DNS name {}", dns)));
    }
    for ip in &info.ip_addresses {
        violations.push(Violation::NonUriSan(format!("IP address {}", ip)));
    }
    // The SAN allow-list reports the same entries; keep one of each.
    for violation in extension_violations(&csr) {
        if !violations.contains(&violation) {
            violations.push(violation);
        }
    }

    if violations.is_empty() {
        Ok(info)
    } else {
        Err(CsrError::Violations(violations))
    }
}

/// [`validate_der`] over a PEM-encoded request.
pub fn validate_request(pem: &[u8]) -> Result<CsrInfo, CsrError> {
    let der = decode_pem(pem)?;
    validate_der(&der)
}
