//! Cloudflare R2 (S3-compatible) snapshot store.
//!
//! Object keys are `<blob name>/<uuid v7>` so that uploading the same name
//! twice yields two distinct objects, as the engine expects.

use std::env;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    normalize_blob_name, sort_newest_first, AccountIdentity, RemoteBlob, RemoteError,
    RemoteResult, RemoteStore, UploadedBlob,
};

const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";

const UNAUTHORIZED_CODES: [&str; 4] = [
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
];
const NOT_FOUND_CODES: [&str; 3] = ["NoSuchKey", "NoSuchBucket", "NotFound"];

/// Cloudflare R2 configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct R2Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// R2 bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
}

impl std::fmt::Debug for R2Config {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl R2Config {
    /// Load R2 configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no R2 variables are set and an error when only
    /// part of the configuration is present.
    pub fn from_env() -> RemoteResult<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// Cloudflare R2 S3-compatible endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// R2-backed remote store.
#[derive(Clone, Debug)]
pub struct R2RemoteStore {
    config: R2Config,
    client: Client,
}

impl R2RemoteStore {
    #[must_use]
    pub fn new(config: R2Config) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }

    #[must_use]
    pub const fn config(&self) -> &R2Config {
        &self.config
    }
}

#[async_trait]
impl RemoteStore for R2RemoteStore {
    async fn upload_blob(
        &self,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> RemoteResult<UploadedBlob> {
        let name = normalize_blob_name(name)?;
        let object_key = object_key_for(&name);

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .content_type(mime_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|error| classify_error("put_object", &self.config.bucket, &object_key, &error))?;

        // PutObject does not report the server's LastModified; read it back.
        let head = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|error| classify_error("head_object", &self.config.bucket, &object_key, &error))?;
        let modified_time = head
            .last_modified()
            .and_then(|value| DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos()));

        Ok(UploadedBlob {
            id: object_key,
            name,
            modified_time,
        })
    }

    async fn list_blobs_by_prefix(&self, prefix: &str) -> RemoteResult<Vec<RemoteBlob>> {
        let mut blobs = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|error| {
                    classify_error("list_objects_v2", &self.config.bucket, prefix, &error)
                })?;

            for object in response.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                let Some(modified_time) = object
                    .last_modified()
                    .and_then(|value| DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos()))
                else {
                    tracing::warn!("Ignoring R2 object {} without last-modified time", key);
                    continue;
                };
                blobs.push(RemoteBlob {
                    id: key.to_string(),
                    name: blob_name_from_key(key).to_string(),
                    modified_time,
                    size: object
                        .size()
                        .and_then(|size| u64::try_from(size).ok())
                        .unwrap_or_default(),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        sort_newest_first(&mut blobs);
        Ok(blobs)
    }

    async fn download_blob(&self, id: &str) -> RemoteResult<Vec<u8>> {
        let object_key = normalize_blob_name(id)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|error| classify_error("get_object", &self.config.bucket, &object_key, &error))?;

        let payload = response.body.collect().await.map_err(|error| {
            RemoteError::Transport(format!(
                "R2 get_object body failed for {}/{object_key}: {error}",
                self.config.bucket
            ))
        })?;
        Ok(payload.into_bytes().to_vec())
    }

    async fn account_identity(&self) -> RemoteResult<AccountIdentity> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|error| {
                classify_error("head_bucket", &self.config.bucket, "", &error)
            })?;

        Ok(AccountIdentity {
            display_name: Some(format!("R2 bucket {}", self.config.bucket)),
            email: None,
            avatar_url: None,
        })
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> RemoteResult<Option<R2Config>> {
    let read = |key: &str| lookup(key).map(|value| value.trim().to_string());
    let account_id = read(ENV_ACCOUNT_ID);
    let bucket = read(ENV_BUCKET);
    let access_key_id = read(ENV_ACCESS_KEY_ID);
    let secret_access_key = read(ENV_SECRET_ACCESS_KEY);

    if account_id.is_none()
        && bucket.is_none()
        && access_key_id.is_none()
        && secret_access_key.is_none()
    {
        return Ok(None);
    }

    let mut missing = Vec::new();
    let mut require = |value: Option<String>, key: &'static str| {
        let value = value.filter(|value| !value.is_empty());
        if value.is_none() {
            missing.push(key);
        }
        value.unwrap_or_default()
    };
    let config = R2Config {
        account_id: require(account_id, ENV_ACCOUNT_ID),
        bucket: require(bucket, ENV_BUCKET),
        access_key_id: require(access_key_id, ENV_ACCESS_KEY_ID),
        secret_access_key: require(secret_access_key, ENV_SECRET_ACCESS_KEY),
    };

    if !missing.is_empty() {
        return Err(RemoteError::InvalidInput(format!(
            "R2 configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    }

    Ok(Some(config))
}

fn build_s3_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "tally-r2-remote",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

fn object_key_for(name: &str) -> String {
    format!("{name}/{}", Uuid::now_v7())
}

fn blob_name_from_key(key: &str) -> &str {
    key.rsplit_once('/').map_or(key, |(name, _)| name)
}

fn classify_error<E>(operation: &str, bucket: &str, target: &str, error: &SdkError<E>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let target = if target.is_empty() {
        bucket.to_string()
    } else {
        format!("{bucket}/{target}")
    };
    let message = format!(
        "R2 {operation} failed for {target}: {}",
        DisplayErrorContext(error)
    );

    if matches!(
        error,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)
    ) {
        return RemoteError::Transport(message);
    }

    match error.code() {
        Some(code) if UNAUTHORIZED_CODES.contains(&code) => RemoteError::Unauthorized(message),
        Some(code) if NOT_FOUND_CODES.contains(&code) => RemoteError::NotFound(message),
        _ => {
            let status = error
                .raw_response()
                .map_or(0, |response| response.status().as_u16());
            match status {
                401 | 403 => RemoteError::Unauthorized(message),
                404 => RemoteError::NotFound(message),
                0 => RemoteError::Transport(message),
                status => RemoteError::Api { status, message },
            }
        }
    }
}
