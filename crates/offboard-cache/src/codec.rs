//! Envelope format for stored snapshots.
//!
//! An entry is a JSON document carrying metadata in the clear and the
//! snapshot as a base64 payload. The checksum is the hex SHA-256 of the
//! stored (possibly compressed) payload bytes, so corruption is detected
//! before decompression is attempted.

use std::io::{Read, Write};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use offboard_core::Snapshot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;

/// Current envelope version.
pub const FORMAT_VERSION: u32 = 1;

/// Payload encoding applied before storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Plain JSON payload.
    None,
    /// Gzip-compressed JSON payload.
    #[default]
    Gzip,
}

/// Stored entry layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub(crate) format_version: u32,
    pub(crate) key: String,
    pub(crate) scope: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) ttl_secs: u64,
    pub(crate) file_count: usize,
    pub(crate) compression: Compression,
    pub(crate) checksum: String,
    pub(crate) payload: String,
}

impl Envelope {
    /// When the entry stops being served as fresh; `None` if the ttl is too
    /// large to represent.
    pub(crate) fn expires_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
    }

    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now > expires_at)
    }
}

/// Why a stored entry could not be turned back into a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeFailure {
    Malformed,
    UnsupportedVersion,
    KeyMismatch,
    ChecksumMismatch,
    Payload,
}

impl DecodeFailure {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed envelope",
            Self::UnsupportedVersion => "unsupported format version",
            Self::KeyMismatch => "key mismatch",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::Payload => "undecodable payload",
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Serialize `snapshot` into envelope bytes.
pub(crate) fn encode(
    key: &CacheKey,
    snapshot: &Snapshot,
    created_at: DateTime<Utc>,
    ttl: Duration,
    compression: Compression,
) -> CacheResult<Vec<u8>> {
    let json = serde_json::to_vec(snapshot).map_err(|source| CacheError::Encode {
        operation: "cache.encode_snapshot",
        source,
    })?;
    let stored = match compression {
        Compression::None => json,
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder
                .write_all(&json)
                .map_err(|source| CacheError::Compression { source })?;
            encoder
                .finish()
                .map_err(|source| CacheError::Compression { source })?
        }
    };

    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        key: key.to_string(),
        scope: snapshot.scope.clone(),
        created_at,
        ttl_secs: ttl.as_secs(),
        file_count: snapshot.files.len(),
        compression,
        checksum: sha256_hex(&stored),
        payload: STANDARD.encode(&stored),
    };
    serde_json::to_vec(&envelope).map_err(|source| CacheError::Encode {
        operation: "cache.encode_envelope",
        source,
    })
}

/// Parse only the envelope, without verifying or decoding the payload.
pub(crate) fn read_envelope(bytes: &[u8]) -> Result<Envelope, DecodeFailure> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|_| DecodeFailure::Malformed)?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(DecodeFailure::UnsupportedVersion);
    }
    Ok(envelope)
}

/// Verify and decode a stored entry.
pub(crate) fn decode(key: &CacheKey, bytes: &[u8]) -> Result<(Envelope, Snapshot), DecodeFailure> {
    let envelope = read_envelope(bytes)?;
    if envelope.key != key.as_str() {
        return Err(DecodeFailure::KeyMismatch);
    }
    let stored = STANDARD
        .decode(envelope.payload.as_bytes())
        .map_err(|_| DecodeFailure::Malformed)?;
    if sha256_hex(&stored) != envelope.checksum {
        return Err(DecodeFailure::ChecksumMismatch);
    }
    let json = match envelope.compression {
        Compression::None => stored,
        Compression::Gzip => {
            let mut json = Vec::new();
            GzDecoder::new(stored.as_slice())
                .read_to_end(&mut json)
                .map_err(|_| DecodeFailure::Payload)?;
            json
        }
    };
    let snapshot = serde_json::from_slice(&json).map_err(|_| DecodeFailure::Payload)?;
    Ok((envelope, snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use offboard_test_support::fixtures;

    fn sample() -> Snapshot {
        fixtures::snapshot("me", fixtures::epoch(), vec![fixtures::shared_file("f1", &["alice@example.com"])])
    }

    #[test]
    fn gzip_and_plain_payloads_decode_to_the_same_snapshot() {
        let key = CacheKey::for_scope("me");
        let snapshot = sample();
        for compression in [Compression::Gzip, Compression::None] {
            let bytes = encode(&key, &snapshot, fixtures::epoch(), Duration::from_secs(60), compression)
                .expect("encode");
            let (envelope, decoded) = decode(&key, &bytes).expect("decode");
            assert_eq!(decoded, snapshot);
            assert_eq!(envelope.compression, compression);
            assert_eq!(envelope.file_count, 1);
        }
    }

    #[test]
    fn flipped_payload_fails_checksum() {
        let key = CacheKey::for_scope("me");
        let bytes = encode(&key, &sample(), fixtures::epoch(), Duration::from_secs(60), Compression::Gzip)
            .expect("encode");
        let mut envelope: Envelope = serde_json::from_slice(&bytes).expect("envelope");
        let mut stored = STANDARD.decode(envelope.payload.as_bytes()).expect("base64");
        if let Some(byte) = stored.last_mut() {
            *byte ^= 0xff;
        }
        envelope.payload = STANDARD.encode(&stored);
        let tampered = serde_json::to_vec(&envelope).expect("serialize");

        assert_eq!(
            decode(&key, &tampered).err(),
            Some(DecodeFailure::ChecksumMismatch)
        );
    }

    #[test]
    fn rejects_foreign_keys_and_garbage() {
        let key = CacheKey::for_scope("me");
        let bytes = encode(&key, &sample(), fixtures::epoch(), Duration::from_secs(60), Compression::None)
            .expect("encode");
        assert_eq!(
            decode(&CacheKey::for_scope("other"), &bytes).err(),
            Some(DecodeFailure::KeyMismatch)
        );
        assert_eq!(decode(&key, b"not json").err(), Some(DecodeFailure::Malformed));
    }

    #[test]
    fn expiry_is_measured_from_creation() {
        let key = CacheKey::for_scope("me");
        let created = fixtures::epoch();
        let bytes = encode(&key, &sample(), created, Duration::from_secs(60), Compression::None)
            .expect("encode");
        let envelope = read_envelope(&bytes).expect("envelope");
        assert!(!envelope.is_expired(created + TimeDelta::seconds(60)));
        assert!(envelope.is_expired(created + TimeDelta::seconds(61)));
    }
}
