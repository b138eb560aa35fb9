#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![allow(clippy::module_name_repetitions)]

//! Progress event bus for offboarding runs.
//!
//! The bus provides a typed event enum, sequential identifiers, and replay of
//! recent events for subscribers that attach late (e.g. a progress renderer
//! started after the scan). Internally it uses `tokio::broadcast` with a
//! bounded buffer; when the channel overflows, the oldest events are dropped.
//! Publishing never blocks the engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use uuid::Uuid;

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed progress events emitted by the pipeline and its components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run was accepted for a principal.
    RunStarted {
        /// Run identifier shared with the audit trail.
        run_id: Uuid,
        /// Target principal.
        principal: String,
        /// Run mode label.
        mode: String,
    },
    /// Inventory retrieval began.
    ScanStarted {
        /// Scan scope.
        scope: String,
    },
    /// A fresh cached snapshot was served.
    CacheHit {
        /// Scan scope.
        scope: String,
        /// Snapshot age in seconds.
        age_secs: u64,
    },
    /// The cache could not serve a fresh snapshot.
    CacheMiss {
        /// Scan scope.
        scope: String,
        /// Why the lookup missed.
        reason: String,
    },
    /// One listing page was retrieved.
    PageFetched {
        /// One-based page number.
        page: u32,
        /// Files on the page.
        files: usize,
    },
    /// A file's sharing list could not be read; the file is left out of
    /// the inventory.
    PermissionsUnreadable {
        /// File identifier.
        file_id: String,
        /// Source error detail.
        reason: String,
    },
    /// Inventory retrieval finished.
    ScanCompleted {
        /// Scan scope.
        scope: String,
        /// Files in the inventory.
        files: usize,
        /// Where the inventory came from.
        origin: String,
    },
    /// Analysis produced the candidate set.
    CandidatesFound {
        /// Target principal.
        principal: String,
        /// Candidates that will be attempted.
        revocable: usize,
        /// Ownership grants that will be skipped.
        protected: usize,
        /// Grants already removed by an earlier run.
        absent: usize,
    },
    /// The pipeline is waiting at the confirmation checkpoint.
    AwaitingConfirmation {
        /// Candidates that would be removed.
        revocable: usize,
    },
    /// Revocation processing began.
    RevocationStarted {
        /// Candidates to process.
        candidates: usize,
        /// Whether removals are simulated.
        dry_run: bool,
    },
    /// A transient failure will be retried.
    RetryScheduled {
        /// File identifier.
        file_id: String,
        /// Permission identifier.
        permission_id: String,
        /// Attempt that failed (one-based).
        attempt: u32,
        /// Backoff before the next attempt.
        delay_ms: u64,
    },
    /// An outcome was appended to the log.
    OutcomeRecorded {
        /// Position in candidate order.
        sequence: u64,
        /// File identifier.
        file_id: String,
        /// Permission identifier.
        permission_id: String,
        /// Outcome label.
        result: String,
    },
    /// The run finished with a complete summary.
    RunCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// Candidates considered.
        total: usize,
        /// Successful outcomes.
        success: usize,
        /// Failed outcomes.
        failed: usize,
        /// Skipped outcomes.
        skipped: usize,
    },
    /// The run stopped before every candidate was processed.
    RunCancelled {
        /// Run identifier.
        run_id: Uuid,
        /// Candidates processed before cancellation.
        processed: usize,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::ScanStarted { .. } => "scan_started",
            Self::CacheHit { .. } => "cache_hit",
            Self::CacheMiss { .. } => "cache_miss",
            Self::PageFetched { .. } => "page_fetched",
            Self::PermissionsUnreadable { .. } => "permissions_unreadable",
            Self::ScanCompleted { .. } => "scan_completed",
            Self::CandidatesFound { .. } => "candidates_found",
            Self::AwaitingConfirmation { .. } => "awaiting_confirmation",
            Self::RevocationStarted { .. } => "revocation_started",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::OutcomeRecorded { .. } => "outcome_recorded",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunCancelled { .. } => "run_cancelled",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, so dropped events impact both structures consistently. A zero
    /// capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        // No live subscribers is not an error; the replay ring still has it.
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.back().map(|event| event.id)
    }

    /// Copy of the replay ring, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<EventEnvelope> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.iter().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
#[derive(Debug)]
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
