use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a sampled item failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum MismatchReason {
    MissingItemId,
    OriginalUnavailable { item_id: String },
    ReplyUnavailable { reply_id: String },
    ReplyMissing { reply_id: String },
    ReplyTextMismatch { reply_id: String },
    ReplyAuthorMismatch { expected: String, found: String },
    ReplyTimeOutsideTolerance { drift_secs: i64 },
    OriginalTextMismatch { item_id: String },
    HashMismatch { item_id: String },
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::MissingItemId => write!(f, "sampled item has no item id"),
            MismatchReason::OriginalUnavailable { .. } => write!(f, "original item unavailable"),
            MismatchReason::ReplyUnavailable { reply_id } => {
                write!(f, "reply {reply_id} unavailable")
            }
            MismatchReason::ReplyMissing { reply_id } => {
                write!(f, "reply {reply_id} not found on its permalink")
            }
            MismatchReason::ReplyTextMismatch { reply_id } => {
                write!(f, "reply {reply_id} text does not match")
            }
            MismatchReason::ReplyAuthorMismatch { expected, found } => {
                write!(f, "reply author mismatch: expected {expected}, found {found}")
            }
            MismatchReason::ReplyTimeOutsideTolerance { drift_secs } => {
                write!(f, "reply time off by {drift_secs}s")
            }
            MismatchReason::OriginalTextMismatch { item_id } => {
                write!(f, "original item {item_id} text does not match")
            }
            MismatchReason::HashMismatch { item_id } => {
                write!(f, "hash mismatch for item {item_id}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditVerdict {
    pub pass: bool,
    pub reasons: Vec<MismatchReason>,
}

impl AuditVerdict {
    pub fn from_reasons(reasons: Vec<MismatchReason>) -> Self {
        Self {
            pass: reasons.is_empty(),
            reasons,
        }
    }

    pub fn has_reason(&self, predicate: impl Fn(&MismatchReason) -> bool) -> bool {
        self.reasons.iter().any(predicate)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub audit_id: Uuid,
    pub content_identifier: String,
    pub round: u64,
    pub verdict: AuditVerdict,
    /// Item ids that appeared more than once in the blob.
    pub duplicate_ids: Vec<String>,
    /// Set when duplicates exceed the allowed threshold.
    pub duplicate_risk: bool,
    pub sampled: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum AuditOutcome {
    Completed(AuditReport),
    /// The submission could not be examined; no verdict either way.
    Inconclusive { reason: String },
    /// Outside the runtime window.
    Skipped,
}

impl AuditOutcome {
    pub fn verdict(&self) -> Option<&AuditVerdict> {
        match self {
            AuditOutcome::Completed(report) => Some(&report.verdict),
            _ => None,
        }
    }
}
