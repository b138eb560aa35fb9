//! Inventory records as read from the file source.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Opaque, globally unique file identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    #[must_use]
    /// Wrap a raw identifier issued by the file source.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Permission identifier, unique within its file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(String);

impl PermissionId {
    #[must_use]
    /// Wrap a raw identifier issued by the file source.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PermissionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PermissionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Access level carried by a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ownership grant; never removable by this system.
    Owner,
    /// Edit access.
    Writer,
    /// Comment-only access.
    Commenter,
    /// Read-only access.
    Reader,
}

impl Role {
    #[must_use]
    /// Stable lowercase label used in logs, metrics, and reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Writer => "writer",
            Self::Commenter => "commenter",
            Self::Reader => "reader",
        }
    }

    #[must_use]
    /// Whether the role confers ownership.
    pub const fn is_ownership(self) -> bool {
        matches!(self, Self::Owner)
    }

    /// Parse a role label (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidRole`] for unknown labels.
    pub fn parse(value: &str) -> ModelResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "writer" => Ok(Self::Writer),
            "commenter" => Ok(Self::Commenter),
            "reader" => Ok(Self::Reader),
            _ => Err(ModelError::InvalidRole {
                value: value.to_string(),
            }),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of party a permission is granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GranteeType {
    /// A single user account.
    User,
    /// A group address.
    Group,
    /// Every account within a domain.
    Domain,
    /// Anyone holding the link.
    Anyone,
}

impl GranteeType {
    #[must_use]
    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Domain => "domain",
            Self::Anyone => "anyone",
        }
    }

    /// Parse a grantee type label (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidGranteeType`] for unknown labels.
    pub fn parse(value: &str) -> ModelResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "domain" => Ok(Self::Domain),
            "anyone" => Ok(Self::Anyone),
            _ => Err(ModelError::InvalidGranteeType {
                value: value.to_string(),
            }),
        }
    }
}

impl Display for GranteeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single access grant on a file. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// Identifier unique within the owning file.
    pub id: PermissionId,
    /// File the grant belongs to.
    pub file_id: FileId,
    /// Access level.
    pub role: Role,
    /// Kind of grantee.
    pub grantee_type: GranteeType,
    /// Email address or domain; absent for [`GranteeType::Anyone`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grantee: Option<String>,
}

impl PermissionRecord {
    #[must_use]
    /// Grantee identifier, or `"anyone"` for link grants.
    pub fn grantee_label(&self) -> &str {
        self.grantee.as_deref().unwrap_or("anyone")
    }
}

/// A remotely hosted file together with its permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Opaque unique identifier.
    pub id: FileId,
    /// Display name.
    pub name: String,
    /// Content-type tag reported by the source.
    pub mime_type: String,
    /// Owner principals (lowercased email addresses).
    #[serde(default)]
    pub owners: Vec<String>,
    /// Permissions in source order.
    #[serde(default)]
    pub permissions: Vec<PermissionRecord>,
    /// Size in bytes when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    #[must_use]
    /// Look up a permission by id.
    pub fn permission(&self, id: &PermissionId) -> Option<&PermissionRecord> {
        self.permissions.iter().find(|permission| &permission.id == id)
    }

    #[must_use]
    /// Whether `email` appears among the owners (case-insensitive).
    pub fn is_owned_by(&self, email: &str) -> bool {
        self.owners
            .iter()
            .any(|owner| owner.eq_ignore_ascii_case(email))
    }

    /// Check the structural invariants of a record read from the source.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidFileRecord`] when the record has no
    /// owners, repeats a permission id, or carries a permission pointing at
    /// another file.
    pub fn validate(&self) -> ModelResult<()> {
        let invalid = |reason| ModelError::InvalidFileRecord {
            file_id: self.id.to_string(),
            reason,
        };
        if self.owners.is_empty() {
            return Err(invalid("file has no owners"));
        }
        let mut seen = HashSet::with_capacity(self.permissions.len());
        for permission in &self.permissions {
            if permission.file_id != self.id {
                return Err(invalid("permission references another file"));
            }
            if !seen.insert(&permission.id) {
                return Err(invalid("duplicate permission id"));
            }
        }
        Ok(())
    }
}

/// A grant removed by an earlier run against the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedGrant {
    /// The permission as it was before removal.
    pub permission: PermissionRecord,
    /// When the removal was confirmed by the source.
    pub revoked_at: DateTime<Utc>,
}

/// Point-in-time copy of the inventory. Never mutated, only superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Scan scope (account identity) the snapshot was captured for.
    pub scope: String,
    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,
    /// Time-to-live in whole seconds.
    pub ttl_secs: u64,
    /// Files in ascending id order.
    pub files: Vec<FileRecord>,
    /// Revocation ledger, in the order grants were removed.
    #[serde(default)]
    pub revoked: Vec<RevokedGrant>,
}

impl Snapshot {
    #[must_use]
    /// Build a snapshot, ordering files by id and dropping repeated ids
    /// (first occurrence wins).
    pub fn new(
        scope: impl Into<String>,
        captured_at: DateTime<Utc>,
        ttl: Duration,
        mut files: Vec<FileRecord>,
    ) -> Self {
        files.sort_by(|left, right| left.id.cmp(&right.id));
        files.dedup_by(|later, earlier| later.id == earlier.id);
        Self {
            scope: scope.into(),
            captured_at,
            ttl_secs: ttl.as_secs(),
            files,
            revoked: Vec::new(),
        }
    }

    #[must_use]
    /// Configured time-to-live.
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    /// Age at `now`; clock skew into the past yields zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }

    #[must_use]
    /// Whether the snapshot has outlived its ttl at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > self.ttl()
    }

    #[must_use]
    /// Time left before expiry, or `None` once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.ttl().checked_sub(self.age(now)).filter(|left| !left.is_zero())
    }

    #[must_use]
    /// Total number of permissions across all files.
    pub fn permission_count(&self) -> usize {
        self.files.iter().map(|file| file.permissions.len()).sum()
    }

    #[must_use]
    /// Produce the successor snapshot after `grants` were removed remotely.
    ///
    /// The successor keeps the capture time and ttl, drops the removed
    /// permissions from their files, and appends the grants to the ledger.
    /// Grants already in the ledger are not recorded twice.
    pub fn superseded_with_revocations(&self, grants: &[RevokedGrant]) -> Self {
        let removed: HashSet<(&FileId, &PermissionId)> = grants
            .iter()
            .map(|grant| (&grant.permission.file_id, &grant.permission.id))
            .collect();
        let files = self
            .files
            .iter()
            .map(|file| {
                let mut file = file.clone();
                file.permissions
                    .retain(|permission| !removed.contains(&(&permission.file_id, &permission.id)));
                file
            })
            .collect();

        let mut revoked = self.revoked.clone();
        for grant in grants {
            let already = revoked.iter().any(|existing| {
                existing.permission.file_id == grant.permission.file_id
                    && existing.permission.id == grant.permission.id
            });
            if !already {
                revoked.push(grant.clone());
            }
        }

        Self {
            scope: self.scope.clone(),
            captured_at: self.captured_at,
            ttl_secs: self.ttl_secs,
            files,
            revoked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn permission(file: &str, id: &str, role: Role) -> PermissionRecord {
        PermissionRecord {
            id: PermissionId::new(id),
            file_id: FileId::new(file),
            role,
            grantee_type: GranteeType::User,
            grantee: Some(format!("{id}@example.com")),
        }
    }

    fn file(id: &str, permissions: Vec<PermissionRecord>) -> FileRecord {
        FileRecord {
            id: FileId::new(id),
            name: format!("{id}.txt"),
            mime_type: "text/plain".into(),
            owners: vec!["owner@example.com".into()],
            permissions,
            size_bytes: None,
            created_at: None,
            modified_at: None,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn snapshot_orders_and_dedupes_files() {
        let snapshot = Snapshot::new(
            "scope",
            at(0),
            Duration::from_secs(60),
            vec![file("b", vec![]), file("a", vec![]), file("b", vec![])],
        );
        let ids: Vec<_> = snapshot.files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn expiry_is_strictly_after_ttl() {
        let snapshot = Snapshot::new("scope", at(0), Duration::from_secs(60), vec![]);
        assert!(!snapshot.is_expired(at(60)));
        assert!(snapshot.is_expired(at(61)));
        assert_eq!(snapshot.age(at(-5)), Duration::ZERO);
        assert_eq!(snapshot.remaining_ttl(at(20)), Some(Duration::from_secs(40)));
        assert_eq!(snapshot.remaining_ttl(at(90)), None);
    }

    #[test]
    fn superseding_moves_grants_into_the_ledger() {
        let snapshot = Snapshot::new(
            "scope",
            at(0),
            Duration::from_secs(60),
            vec![file(
                "a",
                vec![permission("a", "p1", Role::Owner), permission("a", "p2", Role::Reader)],
            )],
        );
        let grant = RevokedGrant {
            permission: permission("a", "p2", Role::Reader),
            revoked_at: at(10),
        };

        let next = snapshot.superseded_with_revocations(std::slice::from_ref(&grant));
        let again = next.superseded_with_revocations(&[grant]);

        assert_eq!(next.files[0].permissions.len(), 1);
        assert_eq!(next.revoked.len(), 1);
        assert_eq!(again.revoked.len(), 1);
        assert_eq!(next.captured_at, snapshot.captured_at);
        assert_eq!(snapshot.files[0].permissions.len(), 2);
    }

    #[test]
    fn validate_rejects_structural_violations() {
        let mut record = file("a", vec![permission("a", "p1", Role::Owner)]);
        assert!(record.validate().is_ok());

        record.permissions.push(permission("a", "p1", Role::Reader));
        assert!(matches!(
            record.validate(),
            Err(ModelError::InvalidFileRecord { reason: "duplicate permission id", .. })
        ));

        let orphan = file("b", vec![permission("a", "p1", Role::Reader)]);
        assert!(orphan.validate().is_err());

        let mut ownerless = file("c", vec![]);
        ownerless.owners.clear();
        assert!(ownerless.validate().is_err());
    }

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!(Role::parse("Writer").ok(), Some(Role::Writer));
        assert!(Role::parse("editor").is_err());
        assert_eq!(GranteeType::parse("DOMAIN").ok(), Some(GranteeType::Domain));
        assert!(GranteeType::parse("robot").is_err());
    }
}
