//! Append-only audit trail for runs and their outcomes.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offboard_core::{Outcome, RunSummary};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    /// A run began.
    RunStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Target principal.
        principal: String,
        /// Mode label.
        mode: String,
        /// Start time.
        at: DateTime<Utc>,
    },
    /// One candidate's final outcome.
    Outcome {
        /// Run identifier.
        run_id: Uuid,
        /// The outcome, in processing order.
        outcome: Outcome,
    },
    /// A run stopped before the checkpoint because of a fatal error.
    RunAborted {
        /// Run identifier.
        run_id: Uuid,
        /// Error description.
        reason: String,
        /// Abort time.
        at: DateTime<Utc>,
    },
    /// A run ended.
    RunFinished {
        /// Run identifier.
        run_id: Uuid,
        /// Final counts.
        summary: RunSummary,
        /// Whether processing stopped early.
        cancelled: bool,
        /// End time.
        at: DateTime<Utc>,
    },
}

/// Receives audit records in order. Implementations must not reorder them.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Append one record.
    async fn append(&self, record: &AuditRecord) -> EngineResult<()>;
}

/// Recorder writing one JSON document per line.
#[derive(Debug)]
pub struct JsonLinesAuditRecorder {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<File>>,
}

impl JsonLinesAuditRecorder {
    /// Recorder appending to `path`; the file and its parent directories are
    /// created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: tokio::sync::Mutex::new(None),
        }
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> EngineResult<File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Audit {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl AuditRecorder for JsonLinesAuditRecorder {
    async fn append(&self, record: &AuditRecord) -> EngineResult<()> {
        let mut line =
            serde_json::to_vec(record).map_err(|source| EngineError::AuditEncode { source })?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(&line)
                .await
                .map_err(|source| self.io_error(source))?;
            file.flush().await.map_err(|source| self.io_error(source))?;
        }
        Ok(())
    }
}

/// Recorder keeping records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditRecorder {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditRecorder {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Outcomes appended so far, in order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                AuditRecord::Outcome { outcome, .. } => Some(outcome),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditRecorder {
    async fn append(&self, record: &AuditRecord) -> EngineResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Recorder that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditRecorder;

#[async_trait]
impl AuditRecorder for NullAuditRecorder {
    async fn append(&self, _record: &AuditRecord) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offboard_core::{CandidateRef, Classification, GranteeType, Role};
    use offboard_test_support::fixtures;

    fn outcome(sequence: u64) -> Outcome {
        Outcome::success(
            sequence,
            CandidateRef {
                file_id: "a".into(),
                file_name: "a.doc".into(),
                permission_id: format!("a-r{sequence}").as_str().into(),
                role: Role::Reader,
                grantee_type: GranteeType::User,
                grantee: Some("alice@example.com".into()),
                classification: Classification::Revocable,
            },
            1,
            fixtures::epoch(),
        )
    }

    #[tokio::test]
    async fn json_lines_append_in_order_and_create_parents() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("audit.jsonl");
        let recorder = JsonLinesAuditRecorder::new(&path);
        let run_id = Uuid::new_v4();

        recorder
            .append(&AuditRecord::RunStarted {
                run_id,
                principal: "alice@example.com".into(),
                mode: "revoke".into(),
                at: fixtures::epoch(),
            })
            .await?;
        for sequence in 0..3 {
            recorder
                .append(&AuditRecord::Outcome {
                    run_id,
                    outcome: outcome(sequence),
                })
                .await?;
        }

        let contents = std::fs::read_to_string(&path)?;
        let records = contents
            .lines()
            .map(serde_json::from_str::<AuditRecord>)
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(records.len(), 4);
        assert!(matches!(records[0], AuditRecord::RunStarted { .. }));
        let sequences: Vec<u64> = records
            .iter()
            .filter_map(|record| match record {
                AuditRecord::Outcome { outcome, .. } => Some(outcome.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(contents.lines().nth(1).is_some_and(|line| line.contains("\"record\":\"outcome\"")));
        Ok(())
    }

    #[tokio::test]
    async fn unwritable_path_reports_audit_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory")?;
        let recorder = JsonLinesAuditRecorder::new(blocker.join("audit.jsonl"));

        let err = recorder
            .append(&AuditRecord::Outcome {
                run_id: Uuid::nil(),
                outcome: outcome(0),
            })
            .await
            .expect_err("parent is a file");
        assert!(matches!(err, EngineError::Audit { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn memory_recorder_keeps_outcomes() -> anyhow::Result<()> {
        let recorder = MemoryAuditRecorder::new();
        recorder
            .append(&AuditRecord::Outcome {
                run_id: Uuid::nil(),
                outcome: outcome(4),
            })
            .await?;
        assert_eq!(recorder.outcomes(), vec![outcome(4)]);
        Ok(())
    }
}
