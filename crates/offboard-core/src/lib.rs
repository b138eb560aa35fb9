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

//! Source-agnostic inventory model and collaborator contracts.
//!
//! Layout: `model.rs` (files, permissions, snapshots), `principal.rs`
//! (validated target identity), `decision.rs` (candidates, outcomes, summary),
//! `source.rs` (`FileSource` contract and its typed errors), `time.rs`
//! (injectable clock and sleeper), `error.rs` (model validation errors).

pub mod decision;
pub mod error;
pub mod model;
pub mod principal;
pub mod source;
pub mod time;

pub use decision::{
    CandidateDecision, CandidateRef, Classification, Outcome, OutcomeResult, RunSummary,
    SkipReason,
};
pub use error::{ModelError, ModelResult};
pub use model::{
    FileId, FileRecord, GranteeType, PermissionId, PermissionRecord, RevokedGrant, Role, Snapshot,
};
pub use principal::Principal;
pub use source::{FilePage, FileSource, SourceError, SourceResult};
pub use time::{Clock, Sleeper, SystemClock, TokioSleeper};
