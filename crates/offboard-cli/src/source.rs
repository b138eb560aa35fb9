//! HTTP implementation of the file/permission source.
//!
//! Speaks a Drive-v3-shaped REST API: `GET files`, `GET
//! files/{id}/permissions`, and `DELETE files/{id}/permissions/{pid}`,
//! authenticated with a bearer token. Status codes are mapped onto
//! [`SourceError`] so the engine can decide what to retry.
//!
//! With admin access enabled, permission listing and deletion carry
//! `useDomainAdminAccess=true` so a domain administrator can act on files
//! owned by other users.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offboard_core::{
    FileId, FilePage, FileRecord, FileSource, GranteeType, PermissionId, PermissionRecord, Role,
    SourceError, SourceResult,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::client::{CliError, CliResult};

const FILE_FIELDS: &str = "nextPageToken, files(id, name, mimeType, owners(emailAddress), \
                           permissions(id, emailAddress, role, type, domain), size, \
                           createdTime, modifiedTime)";
const PERMISSION_FIELDS: &str = "nextPageToken, permissions(id, emailAddress, role, type, domain)";
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// File source backed by the remote REST API.
#[derive(Debug, Clone)]
pub(crate) struct HttpFileSource {
    client: Client,
    base_url: Url,
    token: String,
    page_size: u32,
    admin_access: bool,
}

impl HttpFileSource {
    pub(crate) fn new(
        base_url: &str,
        token: impl Into<String>,
        page_size: u32,
        timeout: Duration,
    ) -> CliResult<Self> {
        let base_url = base_url
            .parse::<Url>()
            .map_err(|err| CliError::validation(format!("invalid base URL '{base_url}': {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CliError::validation(format!(
                "base URL '{base_url}' cannot carry a path"
            )));
        }
        let token = token.into();
        if token.trim().is_empty() {
            return Err(CliError::validation("access token cannot be empty"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url,
            token,
            page_size,
            admin_access: false,
        })
    }

    /// Act on permissions with domain administrator rights.
    pub(crate) fn with_admin_access(mut self, admin_access: bool) -> Self {
        self.admin_access = admin_access;
        self
    }

    fn permission_request(&self, request: RequestBuilder) -> RequestBuilder {
        if self.admin_access {
            request.query(&[("useDomainAdminAccess", "true")])
        } else {
            request
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> SourceResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .query(&[("supportsAllDrives", "true")])
            .send()
            .await
            .map_err(|err| transport_error(operation, &err))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_response(operation, response).await)
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> SourceResult<T> {
        let response = self.send(operation, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| SourceError::InvalidResponse {
                operation,
                detail: err.to_string(),
            })
    }
}

#[async_trait]
impl FileSource for HttpFileSource {
    async fn list_files(&self, page_token: Option<&str>) -> SourceResult<FilePage> {
        let mut request = self.client.get(self.endpoint(&["files"])).query(&[
            ("pageSize", self.page_size.to_string().as_str()),
            ("fields", FILE_FIELDS),
            ("includeItemsFromAllDrives", "true"),
        ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        let body: FileListBody = self.fetch_json("list_files", request).await?;

        let permissions_included = body.files.iter().all(|file| file.permissions.is_some());
        let files = body
            .files
            .into_iter()
            .map(ApiFile::into_record)
            .collect::<Vec<_>>();
        debug!(
            files = files.len(),
            permissions_included,
            has_next = body.next_page_token.is_some(),
            "listed file page"
        );
        Ok(FilePage {
            files,
            permissions_included,
            next_page_token: body.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    async fn list_permissions(&self, file_id: &FileId) -> SourceResult<Vec<PermissionRecord>> {
        let url = self.endpoint(&["files", file_id.as_str(), "permissions"]);
        let mut permissions = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let mut request = self.permission_request(
                self.client
                    .get(url.clone())
                    .query(&[("fields", PERMISSION_FIELDS)]),
            );
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let body: PermissionListBody = self.fetch_json("list_permissions", request).await?;
            permissions.extend(
                body.permissions
                    .into_iter()
                    .filter_map(|permission| permission.into_record(file_id)),
            );
            match body.next_page_token.filter(|token| !token.is_empty()) {
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(SourceError::InvalidResponse {
                        operation: "list_permissions",
                        detail: format!("page token '{next}' repeated"),
                    });
                }
                Some(next) => page_token = Some(next),
                None => return Ok(permissions),
            }
        }
    }

    async fn delete_permission(
        &self,
        file_id: &FileId,
        permission_id: &PermissionId,
    ) -> SourceResult<()> {
        let url = self.endpoint(&[
            "files",
            file_id.as_str(),
            "permissions",
            permission_id.as_str(),
        ]);
        self.send("delete_permission", self.permission_request(self.client.delete(url)))
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListBody {
    #[serde(default)]
    files: Vec<ApiFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionListBody {
    #[serde(default)]
    permissions: Vec<ApiPermission>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    owners: Vec<ApiUser>,
    permissions: Option<Vec<ApiPermission>>,
    size: Option<String>,
    created_time: Option<DateTime<Utc>>,
    modified_time: Option<DateTime<Utc>>,
}

impl ApiFile {
    fn into_record(self) -> FileRecord {
        let id = FileId::new(self.id);
        let permissions = self
            .permissions
            .unwrap_or_default()
            .into_iter()
            .filter_map(|permission| permission.into_record(&id))
            .collect();
        FileRecord {
            name: self.name,
            mime_type: self.mime_type,
            owners: self
                .owners
                .into_iter()
                .filter_map(|owner| owner.email_address)
                .map(|email| email.to_ascii_lowercase())
                .collect(),
            permissions,
            size_bytes: self.size.and_then(|size| size.parse().ok()),
            created_at: self.created_time,
            modified_at: self.modified_time,
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUser {
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPermission {
    id: String,
    role: String,
    #[serde(rename = "type")]
    kind: String,
    email_address: Option<String>,
    domain: Option<String>,
}

impl ApiPermission {
    /// Convert to the domain model; grants with unknown roles or grantee
    /// kinds are dropped so they are never attempted.
    fn into_record(self, file_id: &FileId) -> Option<PermissionRecord> {
        let Some(role) = map_role(&self.role) else {
            warn!(%file_id, permission_id = %self.id, role = %self.role, "unknown role; grant ignored");
            return None;
        };
        let Ok(grantee_type) = GranteeType::parse(&self.kind) else {
            warn!(%file_id, permission_id = %self.id, kind = %self.kind, "unknown grantee type; grant ignored");
            return None;
        };
        let grantee = match grantee_type {
            GranteeType::User | GranteeType::Group => self.email_address,
            GranteeType::Domain => self.domain,
            GranteeType::Anyone => None,
        };
        Some(PermissionRecord {
            id: PermissionId::new(self.id),
            file_id: file_id.clone(),
            role,
            grantee_type,
            grantee,
        })
    }
}

fn map_role(label: &str) -> Option<Role> {
    match label {
        "organizer" => Some(Role::Owner),
        "fileOrganizer" => Some(Role::Writer),
        other => Role::parse(other).ok(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    reason: Option<String>,
}

fn transport_error(operation: &'static str, err: &reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout { operation }
    } else {
        SourceError::Unavailable {
            operation,
            detail: err.to_string(),
        }
    }
}

async fn classify_response(operation: &'static str, response: Response) -> SourceError {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let bytes = response.bytes().await.unwrap_or_default();
    let detail = serde_json::from_slice::<ErrorBody>(&bytes)
        .ok()
        .and_then(|body| body.error)
        .unwrap_or_default();
    let reason = detail.errors.into_iter().find_map(|item| item.reason);
    classify_status(operation, status, retry_after, reason, &detail.message)
}

fn classify_status(
    operation: &'static str,
    status: StatusCode,
    retry_after: Option<Duration>,
    reason: Option<String>,
    message: &str,
) -> SourceError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            operation,
            retry_after,
        },
        StatusCode::FORBIDDEN
            if reason
                .as_deref()
                .is_some_and(|reason| RATE_LIMIT_REASONS.contains(&reason)) =>
        {
            SourceError::RateLimited {
                operation,
                retry_after,
            }
        }
        StatusCode::FORBIDDEN => SourceError::PermissionDenied { operation, reason },
        StatusCode::NOT_FOUND => SourceError::NotFound { operation },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            SourceError::Timeout { operation }
        }
        status if status.is_server_error() => SourceError::Transient {
            operation,
            detail: status_detail(status, message),
        },
        status => SourceError::Unavailable {
            operation,
            detail: status_detail(status, message),
        },
    }
}

fn status_detail(status: StatusCode, message: &str) -> String {
    if message.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {message}", status.as_u16())
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
