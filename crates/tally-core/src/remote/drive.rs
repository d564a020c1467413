//! HTTP client for a Drive-style file API (files, media upload, about).
//!
//! Every request carries a bearer token obtained from the workspace's
//! [`TokenProvider`]. HTTP 401/403 map to [`RemoteError::Unauthorized`]; a
//! workspace with no stored token gets [`RemoteError::MissingCredential`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    normalize_blob_name, sort_newest_first, AccountIdentity, RemoteBlob, RemoteError,
    RemoteResult, RemoteStore, UploadedBlob,
};
use crate::auth::{AuthError, TokenProvider};
use crate::util::{compact_text, is_http_url, non_empty_trimmed};

const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_UPLOAD_BASE_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const DEFAULT_SPACE: &str = "appDataFolder";
const LIST_PAGE_SIZE: u32 = 100;
const FILE_FIELDS: &str = "id,name,modifiedTime,size";
const ERROR_PREVIEW_CHARS: usize = 180;

/// Endpoints and storage space for the Drive backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub api_base_url: String,
    pub upload_base_url: String,
    /// Parent folder/space for uploaded files (`appDataFolder` keeps them hidden).
    pub space: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            upload_base_url: DEFAULT_UPLOAD_BASE_URL.to_string(),
            space: DEFAULT_SPACE.to_string(),
        }
    }
}

impl DriveConfig {
    fn normalized(self) -> RemoteResult<Self> {
        let api_base_url = normalize_base_url(&self.api_base_url, "api_base_url")?;
        let upload_base_url = normalize_base_url(&self.upload_base_url, "upload_base_url")?;
        let space = non_empty_trimmed(Some(self.space))
            .unwrap_or_else(|| DEFAULT_SPACE.to_string());
        Ok(Self {
            api_base_url,
            upload_base_url,
            space,
        })
    }
}

/// Drive-backed remote snapshot store.
#[derive(Clone)]
pub struct DriveClient {
    config: DriveConfig,
    tokens: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

impl DriveClient {
    pub fn new(config: DriveConfig, tokens: Arc<dyn TokenProvider>) -> RemoteResult<Self> {
        let config = config.normalized()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| RemoteError::Transport(format!("failed to build client: {error}")))?;
        Ok(Self {
            config,
            tokens,
            client,
        })
    }

    pub const fn config(&self) -> &DriveConfig {
        &self.config
    }

    async fn authorized(&self, request: RequestBuilder) -> RemoteResult<RequestBuilder> {
        let token = self.tokens.access_token().await.map_err(|error| match error {
            AuthError::NotConfigured => RemoteError::MissingCredential,
            AuthError::Unauthorized(reason) => RemoteError::Unauthorized(reason),
            other => RemoteError::Transport(other.to_string()),
        })?;
        Ok(request.bearer_auth(token.access_token))
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> RemoteResult<reqwest::Response> {
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(|error| RemoteError::Transport(format!("{context}: {error}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body, context))
    }

    async fn list_page(
        &self,
        prefix: &str,
        page_token: Option<&str>,
    ) -> RemoteResult<FileListResponse> {
        let query = format!(
            "name contains '{}' and trashed = false",
            escape_query_literal(prefix)
        );
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let page_size = LIST_PAGE_SIZE.to_string();
        let mut params = vec![
            ("q", query.as_str()),
            ("spaces", self.config.space.as_str()),
            ("orderBy", "modifiedTime desc"),
            ("fields", fields.as_str()),
            ("pageSize", page_size.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let request = self
            .client
            .get(format!("{}/files", self.config.api_base_url))
            .query(&params)
            .header("Accept", "application/json");
        let response = self.send(request, "list files").await?;
        response
            .json::<FileListResponse>()
            .await
            .map_err(|error| RemoteError::InvalidResponse(format!("file list: {error}")))
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn upload_blob(
        &self,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> RemoteResult<UploadedBlob> {
        let name = normalize_blob_name(name)?;
        let metadata = serde_json::json!({
            "name": name,
            "parents": [self.config.space],
            "mimeType": mime_type,
        });
        let boundary = format!("tally-{}", Uuid::now_v7().simple());
        let body = multipart_related_body(&boundary, &metadata, mime_type, &bytes);

        let request = self
            .client
            .post(format!("{}/files", self.config.upload_base_url))
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                "Content-Type",
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let response = self.send(request, "upload file").await?;
        let file = response
            .json::<DriveFile>()
            .await
            .map_err(|error| RemoteError::InvalidResponse(format!("upload: {error}")))?;

        Ok(UploadedBlob {
            id: file.id,
            name: file.name,
            modified_time: file.modified_time,
        })
    }

    async fn list_blobs_by_prefix(&self, prefix: &str) -> RemoteResult<Vec<RemoteBlob>> {
        let mut blobs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(prefix, page_token.as_deref()).await?;
            blobs.extend(
                page.files
                    .into_iter()
                    .filter(|file| file.name.starts_with(prefix))
                    .filter_map(DriveFile::into_remote_blob),
            );

            match non_empty_trimmed(page.next_page_token) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        sort_newest_first(&mut blobs);
        Ok(blobs)
    }

    async fn download_blob(&self, id: &str) -> RemoteResult<Vec<u8>> {
        let id = normalize_blob_name(id)?;
        let request = self
            .client
            .get(format!("{}/files/{id}", self.config.api_base_url))
            .query(&[("alt", "media")]);
        let response = self.send(request, "download file").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|error| RemoteError::Transport(format!("download body: {error}")))?;
        Ok(bytes.to_vec())
    }

    async fn account_identity(&self) -> RemoteResult<AccountIdentity> {
        let request = self
            .client
            .get(format!("{}/about", self.config.api_base_url))
            .query(&[("fields", "user(displayName,emailAddress,photoLink)")])
            .header("Accept", "application/json");
        let response = self.send(request, "fetch account").await?;
        let about = response
            .json::<AboutResponse>()
            .await
            .map_err(|error| RemoteError::InvalidResponse(format!("about: {error}")))?;

        let user = about.user.unwrap_or_default();
        Ok(AccountIdentity {
            display_name: non_empty_trimmed(user.display_name),
            email: non_empty_trimmed(user.email_address),
            avatar_url: non_empty_trimmed(user.photo_link),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    modified_time: Option<DateTime<Utc>>,
    size: Option<String>,
}

impl DriveFile {
    fn into_remote_blob(self) -> Option<RemoteBlob> {
        let Some(modified_time) = self.modified_time else {
            tracing::warn!("Ignoring remote file {} without modifiedTime", self.name);
            return None;
        };
        Some(RemoteBlob {
            id: self.id,
            name: self.name,
            modified_time,
            size: self
                .size
                .and_then(|size| size.parse().ok())
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AboutResponse {
    user: Option<AboutUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutUser {
    display_name: Option<String>,
    email_address: Option<String>,
    photo_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

fn classify_status(status: StatusCode, body: &str, context: &str) -> RemoteError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message)
        .unwrap_or_else(|| compact_text(body, ERROR_PREVIEW_CHARS));
    let message = if message.is_empty() {
        format!("{context}: HTTP {}", status.as_u16())
    } else {
        format!("{context}: {message}")
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn multipart_related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn normalize_base_url(raw: &str, field: &str) -> RemoteResult<String> {
    let value = non_empty_trimmed(Some(raw.to_string()))
        .ok_or_else(|| RemoteError::InvalidInput(format!("{field} must not be empty")))?;
    if !is_http_url(&value) {
        return Err(RemoteError::InvalidInput(format!(
            "{field} must include http:// or https://"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryTokenStore, TokenManager};

    fn client(config: DriveConfig) -> RemoteResult<DriveClient> {
        let tokens: Arc<dyn TokenProvider> =
            Arc::new(TokenManager::new(MemoryTokenStore::default(), None));
        DriveClient::new(config, tokens)
    }

    #[test]
    fn config_normalizes_urls() {
        let drive = client(DriveConfig {
            api_base_url: "https://drive.example.com/v3/".to_string(),
            upload_base_url: "https://drive.example.com/upload/v3".to_string(),
            space: " ".to_string(),
        })
        .unwrap();
        assert_eq!(drive.config().api_base_url, "https://drive.example.com/v3");
        assert_eq!(drive.config().space, "appDataFolder");
    }

    #[test]
    fn config_rejects_missing_scheme() {
        let result = client(DriveConfig {
            api_base_url: "drive.example.com".to_string(),
            ..DriveConfig::default()
        });
        assert!(matches!(result, Err(RemoteError::InvalidInput(_))));
    }

    #[test]
    fn classify_status_distinguishes_unauthorized() {
        let body = r#"{"error":{"code":401,"message":"Invalid Credentials"}}"#;
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, body, "list files"),
            RemoteError::Unauthorized("list files: Invalid Credentials".to_string())
        );
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "", "download file"),
            RemoteError::NotFound(_)
        ));
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, "", "upload file"),
            RemoteError::Api {
                status: 500,
                message: "upload file: HTTP 500".to_string()
            }
        );
    }

    #[test]
    fn multipart_body_wraps_metadata_and_payload() {
        let metadata = serde_json::json!({ "name": "x.json" });
        let body = multipart_related_body("b", &metadata, "application/json", b"{}");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b\r\nContent-Type: application/json; charset=UTF-8"));
        assert!(text.contains(r#"{"name":"x.json"}"#));
        assert!(text.ends_with("\r\n--b--\r\n"));
    }

    #[test]
    fn drive_file_without_modified_time_is_skipped() {
        let file = DriveFile {
            id: "1".to_string(),
            name: "n".to_string(),
            modified_time: None,
            size: None,
        };
        assert!(file.into_remote_blob().is_none());

        let file: DriveFile = serde_json::from_str(
            r#"{"id":"1","name":"n","modifiedTime":"2024-05-01T10:00:00.000Z","size":"42"}"#,
        )
        .unwrap();
        assert_eq!(file.into_remote_blob().unwrap().size, 42);
    }

    #[test]
    fn escape_query_literal_escapes_quotes() {
        assert_eq!(escape_query_literal("it's"), "it\\'s");
    }

    #[tokio::test]
    async fn missing_token_is_not_a_rejected_credential() {
        let drive = client(DriveConfig::default()).unwrap();
        let error = drive.account_identity().await.unwrap_err();
        assert_eq!(error, RemoteError::MissingCredential);
        assert!(!error.is_unauthorized());

        let error = drive.list_blobs_by_prefix("books_").await.unwrap_err();
        assert_eq!(error, RemoteError::MissingCredential);

        let error = drive
            .upload_blob("books_manifest_1.json", b"{}".to_vec(), "application/json")
            .await
            .unwrap_err();
        assert_eq!(error, RemoteError::MissingCredential);
    }
}
