//! Scripted [`FileSource`] that records every call.
//!
//! The source serves an in-memory inventory. Deleting a present permission
//! removes it; deleting an absent one returns `NotFound`. Scripted errors for
//! a (file, permission) pair are returned, in order, before the default
//! behaviour applies.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use offboard_core::{
    FileId, FilePage, FileRecord, FileSource, PermissionId, PermissionRecord, SourceError,
    SourceResult,
};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    /// `list_files` with the given token.
    ListFiles(Option<String>),
    /// `list_permissions` for a file.
    ListPermissions(FileId),
    /// `delete_permission` for a grant.
    DeletePermission(FileId, PermissionId),
}

#[derive(Debug, Default)]
struct SourceState {
    files: Vec<FileRecord>,
    page_size: usize,
    embed_permissions: bool,
    unavailable: bool,
    listing_errors: VecDeque<SourceError>,
    permission_errors: HashMap<FileId, VecDeque<SourceError>>,
    delete_errors: HashMap<(FileId, PermissionId), VecDeque<SourceError>>,
    permission_latency: HashMap<FileId, Duration>,
    calls: Vec<SourceCall>,
}

/// In-memory [`FileSource`] driven by a script.
#[derive(Debug, Default)]
pub struct ScriptedFileSource {
    state: Mutex<SourceState>,
}

impl ScriptedFileSource {
    /// Source serving `files` (in the given order) with permissions embedded
    /// in the listing, 100 files per page.
    #[must_use]
    pub fn new(files: Vec<FileRecord>) -> Self {
        Self {
            state: Mutex::new(SourceState {
                files,
                page_size: 100,
                embed_permissions: true,
                ..SourceState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `size` files per page.
    #[must_use]
    pub fn with_page_size(self, size: usize) -> Self {
        self.state().page_size = size.max(1);
        self
    }

    /// Omit permissions from listings so the scanner must fetch them.
    #[must_use]
    pub fn without_embedded_permissions(self) -> Self {
        self.state().embed_permissions = false;
        self
    }

    /// Delay `list_permissions` for one file.
    #[must_use]
    pub fn with_permission_latency(self, file: &str, latency: Duration) -> Self {
        self.state()
            .permission_latency
            .insert(FileId::new(file), latency);
        self
    }

    /// Fail every `list_files` call with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Queue an error for the next `list_files` call.
    pub fn fail_next_listing(&self, error: SourceError) {
        self.state().listing_errors.push_back(error);
    }

    /// Return `errors` (in order) from the next permission listings of a file.
    pub fn script_permission_listing(&self, file: &str, errors: Vec<SourceError>) {
        self.state()
            .permission_errors
            .entry(FileId::new(file))
            .or_default()
            .extend(errors);
    }

    /// Return `errors` (in order) from the next deletes of a grant.
    pub fn script_delete(&self, file: &str, permission: &str, errors: Vec<SourceError>) {
        self.state()
            .delete_errors
            .entry((FileId::new(file), PermissionId::new(permission)))
            .or_default()
            .extend(errors);
    }

    /// Remove a grant behind the caller's back, as another actor would.
    pub fn remove_permission(&self, file: &str, permission: &str) {
        let mut state = self.state();
        if let Some(record) = state.files.iter_mut().find(|f| f.id.as_str() == file) {
            record.permissions.retain(|p| p.id.as_str() != permission);
        }
    }

    /// Replace the served inventory.
    pub fn set_files(&self, files: Vec<FileRecord>) {
        self.state().files = files;
    }

    /// Current inventory.
    #[must_use]
    pub fn files(&self) -> Vec<FileRecord> {
        self.state().files.clone()
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SourceCall> {
        self.state().calls.clone()
    }

    /// Number of delete calls so far.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, SourceCall::DeletePermission(..)))
            .count()
    }

    /// Delete calls made for one grant.
    #[must_use]
    pub fn delete_calls_for(&self, file: &str, permission: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| {
                matches!(call, SourceCall::DeletePermission(f, p)
                    if f.as_str() == file && p.as_str() == permission)
            })
            .count()
    }

    /// Number of `list_files` calls so far.
    #[must_use]
    pub fn listing_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, SourceCall::ListFiles(_)))
            .count()
    }
}

#[async_trait]
impl FileSource for ScriptedFileSource {
    async fn list_files(&self, page_token: Option<&str>) -> SourceResult<FilePage> {
        let mut state = self.state();
        state
            .calls
            .push(SourceCall::ListFiles(page_token.map(str::to_string)));
        if state.unavailable {
            return Err(SourceError::Unavailable {
                operation: "list_files",
                detail: "scripted outage".into(),
            });
        }
        if let Some(error) = state.listing_errors.pop_front() {
            return Err(error);
        }

        let start = match page_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|index| index.parse::<usize>().ok())
                .ok_or_else(|| SourceError::InvalidResponse {
                    operation: "list_files",
                    detail: format!("unknown page token {token}"),
                })?,
        };
        let end = (start + state.page_size).min(state.files.len());
        let embed = state.embed_permissions;
        let files = state
            .files
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .cloned()
            .map(|mut file| {
                if !embed {
                    file.permissions.clear();
                }
                file
            })
            .collect();
        Ok(FilePage {
            files,
            permissions_included: embed,
            next_page_token: (end < state.files.len()).then(|| format!("page-{end}")),
        })
    }

    async fn list_permissions(&self, file_id: &FileId) -> SourceResult<Vec<PermissionRecord>> {
        let latency = {
            let mut state = self.state();
            state.calls.push(SourceCall::ListPermissions(file_id.clone()));
            state.permission_latency.get(file_id).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state();
        if let Some(error) = state
            .permission_errors
            .get_mut(file_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        state
            .files
            .iter()
            .find(|file| &file.id == file_id)
            .map(|file| file.permissions.clone())
            .ok_or(SourceError::NotFound {
                operation: "list_permissions",
            })
    }

    async fn delete_permission(
        &self,
        file_id: &FileId,
        permission_id: &PermissionId,
    ) -> SourceResult<()> {
        let mut state = self.state();
        state.calls.push(SourceCall::DeletePermission(
            file_id.clone(),
            permission_id.clone(),
        ));
        let scripted = state
            .delete_errors
            .get_mut(&(file_id.clone(), permission_id.clone()))
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        let file = state.files.iter_mut().find(|file| &file.id == file_id);
        let Some(file) = file else {
            return Err(SourceError::NotFound {
                operation: "delete_permission",
            });
        };
        let before = file.permissions.len();
        file.permissions.retain(|permission| &permission.id != permission_id);
        if file.permissions.len() == before {
            return Err(SourceError::NotFound {
                operation: "delete_permission",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::shared_file;

    #[tokio::test]
    async fn pages_through_inventory_in_given_order() {
        let source = ScriptedFileSource::new(vec![
            shared_file("c", &[]),
            shared_file("a", &[]),
            shared_file("b", &[]),
        ])
        .with_page_size(2);

        let first = source.list_files(None).await.expect("first page");
        assert_eq!(first.files.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("page-2"));
        let second = source
            .list_files(first.next_page_token.as_deref())
            .await
            .expect("second page");
        assert_eq!(second.files.len(), 1);
        assert!(second.next_page_token.is_none());
        assert_eq!(source.listing_calls(), 2);
    }

    #[tokio::test]
    async fn scripted_errors_precede_default_delete() {
        let source = ScriptedFileSource::new(vec![shared_file("a", &["alice@example.com"])]);
        source.script_delete(
            "a",
            "a-r0",
            vec![SourceError::Timeout {
                operation: "delete_permission",
            }],
        );
        let file = FileId::new("a");
        let permission = PermissionId::new("a-r0");

        assert!(source.delete_permission(&file, &permission).await.is_err());
        assert!(source.delete_permission(&file, &permission).await.is_ok());
        assert_eq!(
            source.delete_permission(&file, &permission).await,
            Err(SourceError::NotFound {
                operation: "delete_permission"
            })
        );
        assert_eq!(source.delete_calls_for("a", "a-r0"), 3);
        assert_eq!(source.files()[0].permissions.len(), 1);
    }

    #[tokio::test]
    async fn listing_without_permissions_strips_them() {
        let source = ScriptedFileSource::new(vec![shared_file("a", &["alice@example.com"])])
            .without_embedded_permissions();
        let page = source.list_files(None).await.expect("page");
        assert!(!page.permissions_included);
        assert!(page.files[0].permissions.is_empty());
        let permissions = source
            .list_permissions(&FileId::new("a"))
            .await
            .expect("permissions");
        assert_eq!(permissions.len(), 2);
    }
}
