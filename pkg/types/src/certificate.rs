use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use pkg_constants::issuance::{REASON_DENIED, REASON_FAILED};
use pkg_constants::state::CERTIFICATE_REQUESTS_PREFIX;

// --- Usages ---

/// Key usages a certificate may be requested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    #[serde(rename = "digital signature")]
    DigitalSignature,
    #[serde(rename = "key encipherment")]
    KeyEncipherment,
    #[serde(rename = "server auth")]
    ServerAuth,
    #[serde(rename = "client auth")]
    ClientAuth,
}

impl KeyUsage {
    /// Usages attached to every workload certificate.
    pub fn workload() -> Vec<KeyUsage> {
        vec![
            KeyUsage::DigitalSignature,
            KeyUsage::KeyEncipherment,
            KeyUsage::ServerAuth,
            KeyUsage::ClientAuth,
        ]
    }
}

// --- Issuer reference ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRef {
    pub name: String,
    pub kind: String,
    pub group: String,
}

impl std::fmt::Display for IssuerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}/{}", self.kind, self.group, self.name)
    }
}

// --- Conditions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    Approved,
    Denied,
    InvalidRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }
}

// --- CertificateRequest ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequestSpec {
    /// Requested certificate lifetime in seconds.
    pub duration_secs: u64,
    /// PEM-encoded PKCS#10 request.
    pub request: Vec<u8>,
    #[serde(default)]
    pub usages: Vec<KeyUsage>,
    pub issuer_ref: IssuerRef,
    #[serde(default)]
    pub is_ca: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequestStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// PEM-encoded signed certificate, set by the issuer.
    #[serde(default)]
    pub certificate: Option<Vec<u8>>,
    /// PEM-encoded CA of the issuer, if it publishes one.
    #[serde(default)]
    pub ca: Option<Vec<u8>>,
    #[serde(default)]
    pub failure_time: Option<DateTime<Utc>>,
}

/// A signing request tracked by the external signing authority.
///
/// Created by the CA front-end, mutated only by the issuer, deleted by the
/// front-end once terminal unless records are preserved for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Empty until the backend assigns one from `generate_name`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub generate_name: Option<String>,
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub spec: CertificateRequestSpec,
    #[serde(default)]
    pub status: CertificateRequestStatus,
    pub created_at: DateTime<Utc>,
}

/// A state the record will not transition out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    Denied { reason: String, message: String },
    Failed { reason: String, message: String },
    Signed { certificate: Vec<u8>, ca: Option<Vec<u8>> },
}

impl CertificateRequest {
    /// Registry key of the record `namespace/name`.
    pub fn key_for(namespace: &str, name: &str) -> String {
        format!("{}{}/{}", CERTIFICATE_REQUESTS_PREFIX, namespace, name)
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.namespace, &self.name)
    }

    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.status.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace the condition of the same type.
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => *existing = condition,
            None => self.status.conditions.push(condition),
        }
    }

    fn has_condition(&self, type_: ConditionType, status: ConditionStatus) -> bool {
        self.condition(type_).is_some_and(|c| c.status == status)
    }

    fn ready_false_with(&self, reason: &str) -> Option<&Condition> {
        self.condition(ConditionType::Ready)
            .filter(|c| c.status == ConditionStatus::False && c.reason == reason)
    }

    /// Classify the record. Denied wins over Failed, which wins over Signed,
    /// so a record carrying both a certificate and a denial is denied.
    pub fn terminal_state(&self) -> Option<TerminalState> {
        if self.has_condition(ConditionType::Denied, ConditionStatus::True)
            || self.ready_false_with(REASON_DENIED).is_some()
        {
            let cond = self
                .condition(ConditionType::Denied)
                .filter(|c| c.status == ConditionStatus::True)
                .or_else(|| self.ready_false_with(REASON_DENIED));
            return Some(TerminalState::Denied {
                reason: cond.map(|c| c.reason.clone()).unwrap_or_default(),
                message: cond.map(|c| c.message.clone()).unwrap_or_default(),
            });
        }

        let failed = self
            .condition(ConditionType::InvalidRequest)
            .filter(|c| c.status == ConditionStatus::True)
            .or_else(|| self.ready_false_with(REASON_FAILED));
        if let Some(cond) = failed {
            return Some(TerminalState::Failed {
                reason: cond.reason.clone(),
                message: cond.message.clone(),
            });
        }

        match &self.status.certificate {
            Some(cert) if !cert.is_empty() => Some(TerminalState::Signed {
                certificate: cert.clone(),
                ca: self.status.ca.clone().filter(|ca| !ca.is_empty()),
            }),
            _ => None,
        }
    }
}
