//! Inventory builders.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use offboard_core::{FileId, FileRecord, GranteeType, PermissionId, PermissionRecord, Role, Snapshot};

/// Owner used by the builders below.
pub const OWNER: &str = "owner@example.com";

/// Fixed reference instant (2024-01-01T00:00:00Z).
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Permission granted to a user.
#[must_use]
pub fn user_permission(file: &str, id: &str, role: Role, email: &str) -> PermissionRecord {
    grant(file, id, role, GranteeType::User, Some(email))
}

/// Arbitrary permission.
#[must_use]
pub fn grant(
    file: &str,
    id: &str,
    role: Role,
    grantee_type: GranteeType,
    grantee: Option<&str>,
) -> PermissionRecord {
    PermissionRecord {
        id: PermissionId::new(id),
        file_id: FileId::new(file),
        role,
        grantee_type,
        grantee: grantee.map(str::to_string),
    }
}

/// File owned by [`OWNER`] carrying `extra` after the owner grant.
#[must_use]
pub fn file(id: &str, extra: Vec<PermissionRecord>) -> FileRecord {
    let mut permissions = vec![user_permission(id, &format!("{id}-owner"), Role::Owner, OWNER)];
    permissions.extend(extra);
    FileRecord {
        id: FileId::new(id),
        name: format!("{id}.doc"),
        mime_type: "application/vnd.google-apps.document".into(),
        owners: vec![OWNER.into()],
        permissions,
        size_bytes: Some(1_024),
        created_at: Some(epoch()),
        modified_at: Some(epoch()),
    }
}

/// File owned by [`OWNER`] and shared read-only with each of `readers`.
/// Reader permission ids are `<file>-r<index>`.
#[must_use]
pub fn shared_file(id: &str, readers: &[&str]) -> FileRecord {
    let extra = readers
        .iter()
        .enumerate()
        .map(|(index, email)| user_permission(id, &format!("{id}-r{index}"), Role::Reader, email))
        .collect();
    file(id, extra)
}

/// File owned by `owner` with no other grants.
#[must_use]
pub fn owned_file(id: &str, owner: &str) -> FileRecord {
    FileRecord {
        owners: vec![owner.to_string()],
        permissions: vec![user_permission(id, &format!("{id}-owner"), Role::Owner, owner)],
        ..file(id, Vec::new())
    }
}

/// Snapshot with a one-hour ttl.
#[must_use]
pub fn snapshot(scope: &str, captured_at: DateTime<Utc>, files: Vec<FileRecord>) -> Snapshot {
    Snapshot::new(scope, captured_at, Duration::from_secs(3_600), files)
}
