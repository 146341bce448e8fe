use crate::error::{EngineError, EngineResult};
use authd_types::{Outcome, Pid, Reason, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Final decision for one requested right.
    Decision,
    /// Sandbox admission refused the right.
    AdmissionDenied,
    /// A rule was decided without class evaluation.
    Bypass,
    Mechanism,
    /// A mechanism sequence was rewound after an interrupt.
    Restart,
    Authenticated,
    TooManyTries,
    Administrative,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub right: String,
    pub rule: Option<String>,
    pub mechanism: Option<String>,
    pub outcome: Outcome,
    pub reason: Reason,
    pub pid: Pid,
    pub uid: Uid,
}

/// Receives one call per engine state transition.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Tamper-evident stored audit entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: String,
    pub sequence: u64,
    pub event: AuditEvent,
    pub previous_hash: Option<String>,
    pub hash: String,
}

/// In-memory audit log whose records are blake3 hash-linked.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: AuditEvent) -> EngineResult<AuditRecord> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| EngineError::Audit("audit lock poisoned".to_string()))?;

        let previous_hash = guard.last().map(|r| r.hash.clone());
        let sequence = guard.len() as u64 + 1;
        let hash = compute_audit_hash(&event, previous_hash.as_deref(), sequence)?;
        let record = AuditRecord {
            event_id: format!("audit-{}", Uuid::new_v4()),
            sequence,
            event,
            previous_hash,
            hash,
        };
        guard.push(record.clone());
        Ok(record)
    }

    /// Records oldest first.
    pub fn records(&self) -> EngineResult<Vec<AuditRecord>> {
        let guard = self
            .records
            .read()
            .map_err(|_| EngineError::Audit("audit lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.records()
            .map(|records| records.into_iter().map(|r| r.event).collect())
            .unwrap_or_default()
    }

    pub fn latest_hash(&self) -> EngineResult<Option<String>> {
        let guard = self
            .records
            .read()
            .map_err(|_| EngineError::Audit("audit lock poisoned".to_string()))?;
        Ok(guard.last().map(|r| r.hash.clone()))
    }

    /// Recompute every hash and check the links.
    pub fn verify_chain(&self) -> EngineResult<bool> {
        let records = self.records()?;
        let mut previous: Option<String> = None;
        for record in &records {
            if record.previous_hash != previous {
                return Ok(false);
            }
            let expected =
                compute_audit_hash(&record.event, previous.as_deref(), record.sequence)?;
            if expected != record.hash {
                return Ok(false);
            }
            previous = Some(record.hash.clone());
        }
        Ok(true)
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.append(event) {
            warn!(error = %e, "dropping audit event");
        }
    }
}

fn compute_audit_hash(
    event: &AuditEvent,
    previous_hash: Option<&str>,
    sequence: u64,
) -> EngineResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "event": event,
    });
    let serialized =
        serde_json::to_vec(&serializable).map_err(|e| EngineError::Audit(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}
