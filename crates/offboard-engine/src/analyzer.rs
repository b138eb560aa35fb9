//! Partitions a snapshot into candidates for one principal.

use std::collections::BTreeMap;
use std::sync::Arc;

use offboard_core::{
    CandidateDecision, Classification, FileRecord, GranteeType, PermissionRecord, Principal, Role,
    Snapshot,
};
use serde::Serialize;
use tracing::debug;

/// Stateless candidate finder.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessAnalyzer;

impl AccessAnalyzer {
    /// Every grant in `snapshot` that gives `principal` access, in inventory
    /// order: files by id, current permissions in listing order, then ledger
    /// entries for that file in revocation order.
    #[must_use]
    pub fn find_candidates(principal: &Principal, snapshot: &Snapshot) -> Vec<CandidateDecision> {
        let mut candidates = Vec::new();
        let mut ledger: BTreeMap<&str, Vec<&PermissionRecord>> = BTreeMap::new();
        for grant in &snapshot.revoked {
            ledger
                .entry(grant.permission.file_id.as_str())
                .or_default()
                .push(&grant.permission);
        }

        for file in &snapshot.files {
            let mut shared: Option<Arc<FileRecord>> = None;
            let mut file_arc = || Arc::clone(shared.get_or_insert_with(|| Arc::new(file.clone())));

            for permission in file.permissions.iter().filter(|p| principal.matches(p)) {
                let classification = if permission.role.is_ownership() {
                    Classification::Protected
                } else {
                    Classification::Revocable
                };
                candidates.push(CandidateDecision {
                    principal: principal.clone(),
                    file: file_arc(),
                    permission: permission.clone(),
                    classification,
                });
            }

            let Some(removed) = ledger.remove(file.id.as_str()) else {
                continue;
            };
            for permission in removed {
                if !principal.matches(permission) || file.permission(&permission.id).is_some() {
                    continue;
                }
                let classification = if permission.role.is_ownership() {
                    Classification::Protected
                } else {
                    Classification::Absent
                };
                candidates.push(CandidateDecision {
                    principal: principal.clone(),
                    file: file_arc(),
                    permission: permission.clone(),
                    classification,
                });
            }
        }

        for file_id in ledger.keys() {
            debug!(file_id, "ledger entry refers to a file outside the snapshot");
        }
        candidates
    }

    /// Access profile of `principal` within `snapshot`.
    #[must_use]
    pub fn summarize(
        principal: &Principal,
        snapshot: &Snapshot,
        candidates: &[CandidateDecision],
    ) -> AccessSummary {
        let mut summary = AccessSummary {
            principal: principal.email().to_string(),
            files_scanned: snapshot.files.len(),
            ..AccessSummary::default()
        };

        for file in &snapshot.files {
            let mut granted = false;
            for permission in file.permissions.iter().filter(|p| principal.matches(p)) {
                granted = true;
                *summary
                    .by_role
                    .entry(permission.role.as_str().to_string())
                    .or_default() += 1;
                if permission.grantee_type == GranteeType::Domain {
                    summary.via_domain += 1;
                }
            }
            if granted {
                summary.files_with_access += 1;
            }
            if file.is_owned_by(principal.email())
                || file
                    .permissions
                    .iter()
                    .any(|p| p.role == Role::Owner && principal.matches(p))
            {
                summary.owned_files += 1;
            }
        }

        for candidate in candidates {
            match candidate.classification {
                Classification::Revocable => summary.revocable += 1,
                Classification::Protected => summary.protected += 1,
                Classification::Absent => summary.absent += 1,
            }
        }
        summary
    }
}

/// What the principal can reach, reported for every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessSummary {
    /// Target principal.
    pub principal: String,
    /// Files in the snapshot.
    pub files_scanned: usize,
    /// Files with at least one current grant for the principal.
    pub files_with_access: usize,
    /// Files the principal owns.
    pub owned_files: usize,
    /// Current grants keyed by role label.
    pub by_role: BTreeMap<String, usize>,
    /// Current grants reaching the principal through its domain.
    pub via_domain: usize,
    /// Candidates classified revocable.
    pub revocable: usize,
    /// Candidates classified protected.
    pub protected: usize,
    /// Candidates classified absent.
    pub absent: usize,
}
