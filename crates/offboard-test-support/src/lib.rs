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

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (inventory builders), mocks.rs (scripted file source),
//! clock.rs (manual clock and recording sleeper).

pub mod clock;
pub mod fixtures;
pub mod mocks;

pub use clock::{ManualClock, RecordingSleeper};
pub use mocks::{ScriptedFileSource, SourceCall};
