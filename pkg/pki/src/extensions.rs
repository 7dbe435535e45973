//! Allow-list check over the X.509 extensions requested by a CSR.
//!
//! Workload certificates carry their identity only as URI SANs and are only
//! ever used for TLS, so a request may contain at most:
//!
//! - subjectAltName with URI entries only,
//! - keyUsage limited to digitalSignature and keyEncipherment,
//! - extendedKeyUsage limited to serverAuth and clientAuth.
//!
//! Everything else is a violation. Violations are collected, not short-circuited,
//! so the caller sees every problem with a request at once.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::cri_attributes::ParsedCriAttribute;
use x509_parser::extensions::{ExtendedKeyUsage, GeneralName, ParsedExtension};
use x509_parser::oid_registry::OID_X509_EXT_KEY_USAGE;

use crate::error::{CsrError, Violation};

/// keyUsage bits as decoded from the BIT STRING (bit 0 is the first named bit).
pub const KU_DIGITAL_SIGNATURE: u32 = 1 << 0;
pub const KU_KEY_ENCIPHERMENT: u32 = 1 << 2;

const ALLOWED_KEY_USAGE: u32 = KU_DIGITAL_SIGNATURE | KU_KEY_ENCIPHERMENT;

/// Widest keyUsage BIT STRING accepted, in content bytes.
const KEY_USAGE_MAX_BYTES: usize = 4;

/// Reject a CSR whose requested extensions fall outside the allow-list.
pub fn validate_extensions(csr: &X509CertificationRequest<'_>) -> Result<(), CsrError> {
    let violations = extension_violations(csr);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CsrError::Violations(violations))
    }
}

/// Collect every allow-list violation in the CSR's extension request.
pub fn extension_violations(csr: &X509CertificationRequest<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for attribute in csr.certification_request_info.iter_attributes() {
        let ParsedCriAttribute::ExtensionRequest(request) = attribute.parsed_attribute() else {
            continue;
        };
        for ext in &request.extensions {
            // The parsed form keeps only 16 bits, so keyUsage is read from the raw value.
            if ext.oid == OID_X509_EXT_KEY_USAGE {
                check_key_usage(ext.value, &mut violations);
            } else {
                check_extension(ext.parsed_extension(), &mut violations);
            }
        }
    }
    violations
}

fn check_extension(ext: &ParsedExtension<'_>, violations: &mut Vec<Violation>) {
    match ext {
        ParsedExtension::SubjectAlternativeName(san) => {
            for name in &san.general_names {
                if !matches!(name, GeneralName::URI(_)) {
                    violations.push(Violation::NonUriSan(describe_general_name(name)));
                }
            }
        }
        ParsedExtension::ExtendedKeyUsage(eku) => check_extended_key_usage(eku, violations),
        ParsedExtension::UnsupportedExtension { oid } => {
            violations.push(Violation::UnknownExtension(oid.to_id_string()));
        }
        ParsedExtension::ParseError { error } => {
            violations.push(Violation::MalformedExtension(format!("{:?}", error)));
        }
        other => violations.push(Violation::ForbiddenExtension(extension_name(other))),
    }
}

fn check_key_usage(value: &[u8], violations: &mut Vec<Violation>) {
    match key_usage_bits(value) {
        Some(bits) => {
            let extra = bits & !ALLOWED_KEY_USAGE;
            if extra != 0 {
                violations.push(Violation::KeyUsage(extra));
            }
        }
        None => violations.push(Violation::MalformedExtension(format!(
            "keyUsage is not a BIT STRING of at most {} bits",
            KEY_USAGE_MAX_BYTES * 8
        ))),
    }
}

/// Named bits of a DER keyUsage BIT STRING. Bit 0 is the most significant
/// bit of the first content byte.
fn key_usage_bits(value: &[u8]) -> Option<u32> {
    let [0x03, len, unused, content @ ..] = value else {
        return None;
    };
    if usize::from(*len) != content.len() + 1
        || *unused > 7
        || content.len() > KEY_USAGE_MAX_BYTES
        || (content.is_empty() && *unused != 0)
    {
        return None;
    }
    let mut bits = 0u32;
    for (i, byte) in content.iter().enumerate() {
        for j in 0..8 {
            if byte & (0x80 >> j) != 0 {
                bits |= 1 << (i * 8 + j);
            }
        }
    }
    Some(bits)
}

fn check_extended_key_usage(eku: &ExtendedKeyUsage<'_>, violations: &mut Vec<Violation>) {
    let named = [
        (eku.any, "anyExtendedKeyUsage"),
        (eku.code_signing, "codeSigning"),
        (eku.email_protection, "emailProtection"),
        (eku.time_stamping, "timeStamping"),
        (eku.ocsp_signing, "OCSPSigning"),
    ];
    for (present, name) in named {
        if present {
            violations.push(Violation::ExtendedKeyUsage(name.to_string()));
        }
    }
    for oid in &eku.other {
        violations.push(Violation::ExtendedKeyUsage(oid.to_id_string()));
    }
}

/// Human-readable form of a SAN entry, e.g. `DNS name example.com`.
fn describe_general_name(name: &GeneralName<'_>) -> String {
    match name {
        GeneralName::DNSName(dns) => format!("DNS name {}", dns),
        GeneralName::RFC822Name(email) => format!("email address {}", email),
        GeneralName::IPAddress(raw) => match ip_from_bytes(raw) {
            Some(ip) => format!("IP address {}", ip),
            None => format!("IP address {:02x?}", raw),
        },
        GeneralName::URI(uri) => format!("URI {}", uri),
        other => format!("{:?}", other),
    }
}

pub(crate) fn ip_from_bytes(raw: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(raw) {
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(raw) {
        return Some(IpAddr::V6(Ipv6Addr::from(octets)));
    }
    None
}

fn extension_name(ext: &ParsedExtension<'_>) -> &'static str {
    match ext {
        ParsedExtension::BasicConstraints(_) => "basicConstraints",
        ParsedExtension::SubjectKeyIdentifier(_) => "subjectKeyIdentifier",
        ParsedExtension::AuthorityKeyIdentifier(_) => "authorityKeyIdentifier",
        ParsedExtension::NameConstraints(_) => "nameConstraints",
        ParsedExtension::IssuerAlternativeName(_) => "issuerAltName",
        _ => "outside the allow-list",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CsrBuilder, eku_extension, key_usage_extension};
    use rcgen::CustomExtension;
    use x509_parser::prelude::FromDer;

    const SPIFFE: &str = "spiffe://cluster.local/ns/default/sa/web";

    // DER-encoded extendedKeyUsage purposes.
    const SERVER_AUTH: &[u8] = &[0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x01];
    const CLIENT_AUTH: &[u8] = &[0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x02];
    const CODE_SIGNING: &[u8] = &[0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x03];
    const ANY_EKU: &[u8] = &[0x06, 0x04, 0x55, 0x1d, 0x25, 0x00];
    const MS_EFS: &[u8] = &[
        0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x0a, 0x03, 0x04,
    ];

    fn violations_for(builder: CsrBuilder) -> Vec<Violation> {
        let der = builder.der();
        let (_, csr) = X509CertificationRequest::from_der(&der).unwrap();
        extension_violations(&csr)
    }

    #[test]
    fn uri_only_san_is_accepted() {
        let v = violations_for(
            CsrBuilder::new()
                .uri(SPIFFE)
                .uri("spiffe://cluster.local/ns/default/sa/other"),
        );
        assert!(v.is_empty(), "{:?}", v);
    }

    #[test]
    fn no_extensions_is_accepted() {
        assert!(violations_for(CsrBuilder::new()).is_empty());
    }

    #[test]
    fn non_uri_sans_are_rejected() {
        let cases = [
            CsrBuilder::new().uri(SPIFFE).dns("web.default.svc"),
            CsrBuilder::new().uri(SPIFFE).ip("10.0.0.1".parse().unwrap()),
            CsrBuilder::new().uri(SPIFFE).email("ops@example.com"),
            CsrBuilder::new().dns("only-dns.example.com"),
        ];
        for builder in cases {
            let v = violations_for(builder);
            assert_eq!(v.len(), 1, "{:?}", v);
            assert!(matches!(v[0], Violation::NonUriSan(_)));
        }
    }

    #[test]
    fn every_non_uri_san_is_reported() {
        let v = violations_for(
            CsrBuilder::new()
                .dns("a.example.com")
                .ip("::1".parse().unwrap())
                .uri(SPIFFE),
        );
        assert_eq!(
            v,
            vec![
                Violation::NonUriSan("DNS name a.example.com".to_string()),
                Violation::NonUriSan("IP address ::1".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let ext = CustomExtension::from_oid_content(&[1, 3, 6, 1, 4, 1, 55555, 1], vec![0x05, 0x00]);
        let v = violations_for(CsrBuilder::new().uri(SPIFFE).extension(ext));
        assert_eq!(
            v,
            vec![Violation::UnknownExtension("1.3.6.1.4.1.55555.1".to_string())]
        );
    }

    #[test]
    fn recognised_but_forbidden_extension_is_rejected() {
        // basicConstraints { cA TRUE }
        let ext =
            CustomExtension::from_oid_content(&[2, 5, 29, 19], vec![0x30, 0x03, 0x01, 0x01, 0xff]);
        let v = violations_for(CsrBuilder::new().uri(SPIFFE).extension(ext));
        assert_eq!(v, vec![Violation::ForbiddenExtension("basicConstraints")]);
    }

    #[test]
    fn key_usage_powerset() {
        let allowed = KU_DIGITAL_SIGNATURE | KU_KEY_ENCIPHERMENT;
        let builder = CsrBuilder::new().uri(SPIFFE);
        let check = |bits: u32| {
            let v = violations_for(builder.clone().extension(key_usage_extension(bits)));
            if bits & !allowed == 0 {
                assert!(v.is_empty(), "bits {:#b} rejected: {:?}", bits, v);
            } else {
                assert_eq!(
                    v,
                    vec![Violation::KeyUsage(bits & !allowed)],
                    "bits {:#b}",
                    bits
                );
            }
        };
        // Every combination of the nine named bits.
        for bits in 0u32..(1 << 9) {
            check(bits);
        }
        // Each remaining position of the 32-bit mask, alone and next to the allowed bits.
        for bit in 9..32 {
            check(1 << bit);
            check(allowed | (1 << bit));
        }
    }

    #[test]
    fn key_usage_bits_beyond_sixteen_are_rejected() {
        let raw = |content: Vec<u8>| CustomExtension::from_oid_content(&[2, 5, 29, 15], content);
        // Only bit 16 set.
        let v = violations_for(
            CsrBuilder::new()
                .uri(SPIFFE)
                .extension(raw(vec![0x03, 0x04, 0x07, 0x00, 0x00, 0x80])),
        );
        assert_eq!(v, vec![Violation::KeyUsage(1 << 16)]);

        // digitalSignature plus bit 24.
        let v = violations_for(
            CsrBuilder::new()
                .uri(SPIFFE)
                .extension(raw(vec![0x03, 0x05, 0x07, 0x80, 0x00, 0x00, 0x80])),
        );
        assert_eq!(v, vec![Violation::KeyUsage(1 << 24)]);
    }

    #[test]
    fn key_usage_wider_than_four_bytes_is_malformed() {
        let ext = CustomExtension::from_oid_content(
            &[2, 5, 29, 15],
            vec![0x03, 0x06, 0x00, 0x80, 0x00, 0x00, 0x00, 0x01],
        );
        let v = violations_for(CsrBuilder::new().uri(SPIFFE).extension(ext));
        assert_eq!(v.len(), 1, "{:?}", v);
        assert!(matches!(v[0], Violation::MalformedExtension(_)));
    }

    #[test]
    fn key_usage_bit_order_follows_der() {
        assert_eq!(key_usage_bits(&[0x03, 0x02, 0x05, 0xa0]), Some(0b101));
        assert_eq!(key_usage_bits(&[0x03, 0x01, 0x00]), Some(0));
        assert_eq!(key_usage_bits(&[0x03, 0x03, 0x07, 0x00, 0x80]), Some(1 << 8));
        assert_eq!(key_usage_bits(&[0x04, 0x02, 0x00, 0x80]), None);
        assert_eq!(key_usage_bits(&[0x03, 0x05, 0x00, 0x80]), None);
        assert_eq!(key_usage_bits(&[0x03, 0x01, 0x03]), None);
    }

    #[test]
    fn server_and_client_auth_are_accepted() {
        for oids in [
            vec![SERVER_AUTH],
            vec![CLIENT_AUTH],
            vec![SERVER_AUTH, CLIENT_AUTH],
            vec![CLIENT_AUTH, SERVER_AUTH],
        ] {
            let v = violations_for(CsrBuilder::new().uri(SPIFFE).extension(eku_extension(&oids)));
            assert!(v.is_empty(), "{:?}", v);
        }
    }

    #[test]
    fn foreign_extended_key_usages_are_rejected() {
        for (oids, expected) in [
            (vec![SERVER_AUTH, CODE_SIGNING], "codeSigning"),
            (vec![ANY_EKU], "anyExtendedKeyUsage"),
            (vec![CLIENT_AUTH, MS_EFS], "1.3.6.1.4.1.311.10.3.4"),
        ] {
            let v = violations_for(CsrBuilder::new().uri(SPIFFE).extension(eku_extension(&oids)));
            assert_eq!(v, vec![Violation::ExtendedKeyUsage(expected.to_string())]);
        }
    }

    #[test]
    fn violations_across_extensions_are_aggregated() {
        let v = violations_for(
            CsrBuilder::new()
                .dns("web.example.com")
                .extension(key_usage_extension(1 << 5))
                .extension(eku_extension(&[CODE_SIGNING])),
        );
        assert_eq!(v.len(), 3, "{:?}", v);
    }

    #[test]
    fn validate_extensions_wraps_violations() {
        let der = CsrBuilder::new().dns("web.example.com").der();
        let (_, csr) = X509CertificationRequest::from_der(&der).unwrap();
        let err = validate_extensions(&csr).unwrap_err();
        assert_eq!(err.violations().len(), 1);
    }
}
