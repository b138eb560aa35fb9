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
#![allow(clippy::redundant_pub_crate)]

//! Command-line entry point for offboarding a principal.
//!
//! Layout:
//! - `cli.rs`: argument parsing, configuration, and command dispatch
//! - `commands/`: command handlers grouped by concern
//! - `client.rs`: shared context, errors, and exit codes
//! - `source.rs`: HTTP file/permission source
//! - `prompt.rs`: interactive confirmation checkpoint
//! - `output.rs`: renderers and formatting helpers
//! - `main.rs`: thin entrypoint delegating to `run()`

pub(crate) mod cli;
pub(crate) mod client;
pub(crate) mod commands;
pub(crate) mod output;
pub(crate) mod prompt;
pub(crate) mod source;

pub use cli::run;
