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

//! File-backed configuration for offboarding runs.
//!
//! Layout: `model.rs` (typed settings, run mode, retry policy), `defaults.rs`
//! (default values), `loader.rs` (YAML + `OFFBOARD_*` environment overrides),
//! `validate.rs` (range checks).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use model::{
    AppConfig, AuditSettings, CacheSettings, LogStyle, LoggingSettings, RetryPolicy,
    RevocationSettings, RunConfig, RunMode, ScanSettings,
};
pub use validate::validate;
