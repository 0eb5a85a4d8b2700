//! src/services/proxy_service.rs
//!
//! ProxyService: policy-governed file delivery on top of a [`BlobStore`].
//! Uploads attach an access policy to each object; reads look the policy up,
//! evaluate it, and only then stream bytes (whole object or one range). No
//! payload bytes are kept between requests; the only shared state is the
//! bounded head cache.

use chrono::{DateTime, Utc};
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{
    blob_store::{BlobError, BlobStore, ByteStream, ObjectBody, PutObjectOptions},
    metadata_cache::MetadataCache,
    policy::{self, Decision},
};
use crate::models::{
    object::{ObjectHead, resolve_content_type},
    policy::{AccessPolicy, POLICY_METADATA_KEY, PolicyDecodeError},
    range::{ByteRange, RangeSpec},
    upload::{UploadReceipt, UploadRequest},
};

const MAX_KEY_LEN: usize = 1024;

/// Reads attempted before giving up on a file that keeps being replaced.
const MAX_READ_ATTEMPTS: usize = 3;

/// Where an evaluated head was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadSource {
    Cache,
    Store,
}

/// Why a password-protected read was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    PasswordRequired,
    InvalidPassword,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::PasswordRequired => f.write_str("Password required"),
            DenyReason::InvalidPassword => f.write_str("Invalid password"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("file `{key}` expired at {expired_at}")]
    Expired {
        key: String,
        expired_at: DateTime<Utc>,
    },
    #[error("access to `{key}` denied: {reason}")]
    AccessDenied { key: String, reason: DenyReason },
    #[error("{0}")]
    BadRequest(String),
    #[error("range not satisfiable for a {size} byte file")]
    RangeNotSatisfiable { size: u64 },
    #[error("access policy of `{key}` is unreadable: {source}")]
    CorruptPolicy {
        key: String,
        source: PolicyDecodeError,
    },
    #[error("file `{key}` changed repeatedly while being read")]
    ConcurrentModification { key: String },
    #[error("blob store {op} failed for `{key}`: {source}")]
    Upstream {
        op: &'static str,
        key: String,
        source: BlobError,
    },
}

pub type ProxyResult<T> = Result<T, ProxyError>;

/// A readable file: its head, decoded policy and the content type served.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub head: ObjectHead,
    pub policy: AccessPolicy,
    pub content_type: String,
}

impl FileInfo {
    fn new(head: ObjectHead, policy: AccessPolicy) -> Self {
        let content_type = head.resolved_content_type();
        Self {
            head,
            policy,
            content_type,
        }
    }
}

/// An authorized read, ready to stream.
pub struct Retrieval {
    pub info: FileInfo,
    /// Set for partial-content responses.
    pub range: Option<ByteRange>,
    pub body: ByteStream,
}

impl Retrieval {
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.info.head.size, |range| range.len())
    }
}

/// Upload, retrieval, verification and deletion of policy-governed files.
#[derive(Clone)]
pub struct ProxyService {
    store: Arc<dyn BlobStore>,
    cache: Arc<MetadataCache>,
}

impl ProxyService {
    pub fn new(store: Arc<dyn BlobStore>, cache: Arc<MetadataCache>) -> Self {
        Self { store, cache }
    }

    /// Store `body` at `key` with the policy described by `request`,
    /// replacing any previous object and policy at that key.
    pub async fn upload(
        &self,
        key: &str,
        body: ObjectBody,
        request: UploadRequest,
        declared_content_type: Option<String>,
    ) -> ProxyResult<UploadReceipt> {
        ensure_key_safe(key)?;
        let policy = request.policy_at(Utc::now());
        let content_type = resolve_content_type(key, declared_content_type.as_deref());

        let options = PutObjectOptions {
            content_type: Some(content_type),
            metadata: HashMap::from([(POLICY_METADATA_KEY.to_string(), policy.encode())]),
        };
        let receipt = self
            .store
            .put(key, body, options)
            .await
            .map_err(|err| self.upstream("put", key, err))?;
        self.cache.invalidate(key);

        info!(
            key,
            size = receipt.size,
            variant = ?request.variant,
            expires_at = ?policy.expires_at,
            "stored file"
        );

        Ok(UploadReceipt {
            key: key.to_string(),
            size: receipt.size,
            etag: receipt.etag,
            expires_at: policy.expires_at,
            protected: policy.is_protected(),
        })
    }

    /// Authorize and open a file, whole or as a single byte range.
    ///
    /// Order of checks: existence, policy, then range syntax. The object
    /// actually opened must be the version whose policy was evaluated; when a
    /// concurrent write slipped in between, the new version's policy and size
    /// are evaluated and the read is retried.
    pub async fn retrieve(
        &self,
        key: &str,
        range: Option<&str>,
        password: Option<&str>,
    ) -> ProxyResult<Retrieval> {
        let (mut info, mut source) = self.authorize(key, password).await?;
        let spec = range
            .map(|raw| raw.parse::<RangeSpec>())
            .transpose()
            .map_err(|err| ProxyError::BadRequest(err.to_string()))?;

        for _ in 0..MAX_READ_ATTEMPTS {
            let range = match spec {
                None => None,
                Some(spec) => match spec.resolve(info.head.size) {
                    Some(range) => Some(range),
                    None if source == HeadSource::Cache => {
                        info = self.reauthorize(key, password).await?;
                        source = HeadSource::Store;
                        continue;
                    }
                    None => {
                        return Err(ProxyError::RangeNotSatisfiable {
                            size: info.head.size,
                        });
                    }
                },
            };

            let (op, fetched) = match range {
                Some(range) => ("get_range", self.store.get_range(key, range.to_exclusive()).await),
                None => ("get", self.store.get(key).await),
            };
            let object = match fetched {
                Ok(object) => object,
                // The cached size may point past the end of a shorter new version.
                Err(err) if source == HeadSource::Cache && !matches!(err, BlobError::NotFound(_)) => {
                    debug!(key, error = %err, "read against cached head failed; refreshing");
                    info = self.reauthorize(key, password).await?;
                    source = HeadSource::Store;
                    continue;
                }
                Err(err) => return Err(self.upstream(op, key, err)),
            };

            if same_version(&info.head, &object.head) {
                if let Some(range) = range {
                    debug!(key, range = %range, "serving byte range");
                }
                return Ok(Retrieval {
                    info: FileInfo::new(object.head, info.policy),
                    range,
                    body: object.body,
                });
            }

            debug!(key, "file changed after its policy was checked; re-evaluating");
            self.cache.invalidate(key);
            info = self.evaluate(key, object.head, password)?;
            source = HeadSource::Store;
        }

        warn!(key, attempts = MAX_READ_ATTEMPTS, "file kept changing during retrieval");
        Err(ProxyError::ConcurrentModification {
            key: key.to_string(),
        })
    }

    /// Authorize a file without opening its body (HEAD).
    ///
    /// Served from the head cache; no bytes leave the store.
    pub async fn head(&self, key: &str, password: Option<&str>) -> ProxyResult<FileInfo> {
        self.authorize(key, password).await.map(|(info, _)| info)
    }

    /// Check a password against the stored policy, bypassing the cache.
    pub async fn verify(&self, key: &str, password: &str) -> ProxyResult<()> {
        ensure_key_safe(key)?;
        self.reauthorize(key, Some(password)).await.map(|_| ())
    }

    pub async fn delete(&self, key: &str) -> ProxyResult<()> {
        ensure_key_safe(key)?;
        self.store
            .head(key)
            .await
            .map_err(|err| self.upstream("head", key, err))?;
        self.store
            .delete(key)
            .await
            .map_err(|err| self.upstream("delete", key, err))?;
        self.cache.invalidate(key);
        info!(key, "deleted file");
        Ok(())
    }

    /// Cheap round trip to the blob store for readiness checks.
    pub async fn probe(&self) -> Result<(), BlobError> {
        self.store.list(None, 1).await.map(|_| ())
    }

    /// Head from cache or store, then the shared policy evaluation.
    async fn authorize(
        &self,
        key: &str,
        password: Option<&str>,
    ) -> ProxyResult<(FileInfo, HeadSource)> {
        ensure_key_safe(key)?;
        if let Some(head) = self.cache.get(key) {
            debug!(key, "metadata cache hit");
            return Ok((self.evaluate(key, head, password)?, HeadSource::Cache));
        }
        let head = self.fetch_head(key).await?;
        Ok((self.evaluate(key, head, password)?, HeadSource::Store))
    }

    /// Drop any cached head and evaluate the store's current one.
    async fn reauthorize(&self, key: &str, password: Option<&str>) -> ProxyResult<FileInfo> {
        self.cache.invalidate(key);
        let head = self.fetch_head(key).await?;
        self.evaluate(key, head, password)
    }

    /// Read a head from the store and cache it, unless an invalidation
    /// overtook the read.
    async fn fetch_head(&self, key: &str) -> ProxyResult<ObjectHead> {
        let token = self.cache.begin_fill();
        let head = self
            .store
            .head(key)
            .await
            .map_err(|err| self.upstream("head", key, err))?;
        self.cache.insert(head.clone(), token);
        Ok(head)
    }

    fn evaluate(
        &self,
        key: &str,
        head: ObjectHead,
        password: Option<&str>,
    ) -> ProxyResult<FileInfo> {
        let policy = head.access_policy().map_err(|source| {
            error!(key, error = %source, "stored access policy cannot be decoded");
            ProxyError::CorruptPolicy {
                key: key.to_string(),
                source,
            }
        })?;

        match policy::evaluate(&policy, password) {
            Decision::Allowed => Ok(FileInfo::new(head, policy)),
            Decision::Expired => Err(ProxyError::Expired {
                key: key.to_string(),
                expired_at: policy.expires_at.unwrap_or_else(Utc::now),
            }),
            Decision::PasswordRequired => Err(ProxyError::AccessDenied {
                key: key.to_string(),
                reason: DenyReason::PasswordRequired,
            }),
            Decision::PasswordInvalid => Err(ProxyError::AccessDenied {
                key: key.to_string(),
                reason: DenyReason::InvalidPassword,
            }),
        }
    }

    /// Classify a blob-store failure. Missing objects are ordinary outcomes
    /// (a concurrent sweep may remove a file mid-request), as are broken
    /// upload bodies; everything else is logged with the key and operation.
    fn upstream(&self, op: &'static str, key: &str, err: BlobError) -> ProxyError {
        match err {
            BlobError::NotFound(_) => {
                self.cache.invalidate(key);
                ProxyError::NotFound(key.to_string())
            }
            BlobError::InvalidKey(_) => ProxyError::BadRequest(format!("invalid file key `{key}`")),
            BlobError::LengthMismatch { .. } => ProxyError::BadRequest(err.to_string()),
            BlobError::BodyRead(_) => {
                warn!(key, op, error = %err, "upload body ended abnormally");
                ProxyError::BadRequest(err.to_string())
            }
            source => {
                error!(key, op, error = %source, "blob store request failed");
                ProxyError::Upstream {
                    op,
                    key: key.to_string(),
                    source,
                }
            }
        }
    }
}

/// Two heads describe the same stored version. ETags decide when both sides
/// have one; otherwise size and modification time must agree.
fn same_version(authorized: &ObjectHead, opened: &ObjectHead) -> bool {
    match (&authorized.etag, &opened.etag) {
        (Some(a), Some(b)) => a == b,
        _ => authorized.size == opened.size && authorized.last_modified == opened.last_modified,
    }
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or overlong keys, keys that begin with `/` or contain `..`,
/// and control characters or backslashes.
fn ensure_key_safe(key: &str) -> ProxyResult<()> {
    let invalid = || ProxyError::BadRequest(format!("invalid file key `{key}`"));
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(invalid());
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(invalid());
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(invalid());
    }
    Ok(())
}
