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

//! Scanning, analysis, and revocation of a principal's file access.
//!
//! Layout: `scanner.rs` (cache-first inventory retrieval), `analyzer.rs`
//! (candidate classification and access summary), `revocation.rs` (ordered,
//! bounded revocation with per-candidate fault isolation), `retry.rs`
//! (backoff policy application), `audit.rs` (outcome trail sinks),
//! `pipeline.rs` (run orchestration and the confirmation checkpoint),
//! `error.rs` (run-level errors).

pub mod analyzer;
pub mod audit;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod revocation;
pub mod scanner;

pub use analyzer::{AccessAnalyzer, AccessSummary};
pub use audit::{
    AuditRecord, AuditRecorder, JsonLinesAuditRecorder, MemoryAuditRecorder, NullAuditRecorder,
};
pub use error::{EngineError, EngineResult};
pub use pipeline::{
    AutoConfirm, Confirmation, ConfirmationRequest, NeverConfirm, RevocationPipeline, RunReport,
};
pub use retry::{Attempted, Retrier};
pub use revocation::{CancellationFlag, EngineRun, RevocationEngine};
pub use scanner::{Inventory, InventoryOrigin, InventoryScanner, ScanOptions};
