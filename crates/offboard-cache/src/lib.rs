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

//! Time-boxed snapshot cache for the file/permission inventory.
//!
//! Layout: `store.rs` (`SnapshotCache` contract and lookup results), `key.rs`
//! (scope-derived keys), `codec.rs` (checksummed, optionally gzipped
//! envelope), `fs.rs` (one file per key with atomic replacement),
//! `memory.rs` (in-process store), `error.rs`.

pub mod codec;
pub mod error;
pub mod fs;
pub mod key;
pub mod memory;
pub mod store;

pub use codec::Compression;
pub use error::{CacheError, CacheResult};
pub use fs::FsSnapshotCache;
pub use key::CacheKey;
pub use memory::MemorySnapshotCache;
pub use store::{CacheEntryInfo, CacheRead, MissReason, SnapshotCache};
