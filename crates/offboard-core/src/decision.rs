//! Candidate classification and the per-candidate outcome record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{FileId, FileRecord, GranteeType, PermissionId, PermissionRecord, Role};
use crate::principal::Principal;

/// How the engine must treat a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Present and removable.
    Revocable,
    /// Ownership grant; never attempted.
    Protected,
    /// Already removed by an earlier run.
    Absent,
}

impl Classification {
    #[must_use]
    /// Stable label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Revocable => "revocable",
            Self::Protected => "protected",
            Self::Absent => "absent",
        }
    }
}

/// A (file, permission) pair that grants access to the target principal.
#[derive(Debug, Clone)]
pub struct CandidateDecision {
    /// Target principal.
    pub principal: Principal,
    /// File carrying the grant.
    pub file: Arc<FileRecord>,
    /// The grant itself.
    pub permission: PermissionRecord,
    /// Analyzer verdict.
    pub classification: Classification,
}

impl CandidateDecision {
    #[must_use]
    /// Serializable reference used by outcomes and reports.
    pub fn reference(&self) -> CandidateRef {
        CandidateRef {
            file_id: self.file.id.clone(),
            file_name: self.file.name.clone(),
            permission_id: self.permission.id.clone(),
            role: self.permission.role,
            grantee_type: self.permission.grantee_type,
            grantee: self.permission.grantee.clone(),
            classification: self.classification,
        }
    }
}

/// Flattened view of a candidate carried in outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRef {
    /// File identifier.
    pub file_id: FileId,
    /// File display name.
    pub file_name: String,
    /// Permission identifier.
    pub permission_id: PermissionId,
    /// Role of the grant.
    pub role: Role,
    /// Grantee kind.
    pub grantee_type: GranteeType,
    /// Grantee identifier when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grantee: Option<String>,
    /// Analyzer verdict.
    pub classification: Classification,
}

/// Final result for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    /// The grant was removed (or would have been, in a dry run).
    Success,
    /// Removal failed.
    Failed,
    /// No removal was attempted or needed.
    Skipped,
}

impl OutcomeResult {
    #[must_use]
    /// Stable label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Reason attached to a skipped outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Ownership grant.
    OwnerProtected,
    /// Recorded as removed by an earlier run.
    AlreadyAbsent,
    /// Disappeared between listing and deletion.
    Vanished,
}

impl SkipReason {
    #[must_use]
    /// Stable label matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OwnerProtected => "owner_protected",
            Self::AlreadyAbsent => "already_absent",
            Self::Vanished => "vanished",
        }
    }
}

/// One entry of the ordered outcome log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Zero-based position in candidate order.
    pub sequence: u64,
    /// Candidate this outcome belongs to.
    pub candidate: CandidateRef,
    /// Result.
    pub result: OutcomeResult,
    /// Set for dry-run successes.
    #[serde(default)]
    pub simulated: bool,
    /// Why the candidate was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Last error detail for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Remote delete calls made.
    pub attempts: u32,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Outcome {
    #[must_use]
    /// Confirmed removal.
    pub const fn success(
        sequence: u64,
        candidate: CandidateRef,
        attempts: u32,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            candidate,
            result: OutcomeResult::Success,
            simulated: false,
            skip_reason: None,
            error: None,
            attempts,
            recorded_at,
        }
    }

    #[must_use]
    /// Dry-run success; no remote call was made.
    pub const fn simulated(
        sequence: u64,
        candidate: CandidateRef,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            candidate,
            result: OutcomeResult::Success,
            simulated: true,
            skip_reason: None,
            error: None,
            attempts: 0,
            recorded_at,
        }
    }

    #[must_use]
    /// Failed removal with the last error seen.
    pub const fn failed(
        sequence: u64,
        candidate: CandidateRef,
        error: String,
        attempts: u32,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            candidate,
            result: OutcomeResult::Failed,
            simulated: false,
            skip_reason: None,
            error: Some(error),
            attempts,
            recorded_at,
        }
    }

    #[must_use]
    /// Skipped candidate.
    pub const fn skipped(
        sequence: u64,
        candidate: CandidateRef,
        reason: SkipReason,
        attempts: u32,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            candidate,
            result: OutcomeResult::Skipped,
            simulated: false,
            skip_reason: Some(reason),
            error: None,
            attempts,
            recorded_at,
        }
    }
}

/// Aggregate counts derived from the outcome log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Candidates considered.
    pub total: usize,
    /// Successful (including simulated) outcomes.
    pub success: usize,
    /// Failed outcomes.
    pub failed: usize,
    /// Skipped outcomes.
    pub skipped: usize,
    /// Successes that were simulated.
    pub simulated: usize,
}

impl RunSummary {
    #[must_use]
    /// Count the outcome log.
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        outcomes.iter().fold(
            Self {
                total: outcomes.len(),
                ..Self::default()
            },
            |mut summary, outcome| {
                match outcome.result {
                    OutcomeResult::Success => summary.success += 1,
                    OutcomeResult::Failed => summary.failed += 1,
                    OutcomeResult::Skipped => summary.skipped += 1,
                }
                if outcome.simulated {
                    summary.simulated += 1;
                }
                summary
            },
        )
    }

    #[must_use]
    /// Whether every considered candidate has exactly one result.
    pub const fn is_consistent(&self) -> bool {
        self.success + self.failed + self.skipped == self.total
    }
}
