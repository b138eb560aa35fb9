//! Command handlers grouped by concern.

pub(crate) mod cache;
pub(crate) mod run;

use std::sync::Arc;

use offboard_cache::{Compression, FsSnapshotCache};
use offboard_config::AppConfig;
use offboard_core::SystemClock;

/// On-disk snapshot cache described by the configuration.
pub(crate) fn open_cache(config: &AppConfig) -> FsSnapshotCache {
    let compression = if config.cache.compression {
        Compression::Gzip
    } else {
        Compression::None
    };
    FsSnapshotCache::new(&config.cache.dir, Arc::new(SystemClock)).with_compression(compression)
}
