//! [`BlobStore`] over the `object_store` crate.
//!
//! Supports `s3://bucket[/prefix]` (any S3-compatible endpoint) and
//! `memory://`. The access policy rides in user metadata, the content type
//! in the object's own Content-Type attribute.

use anyhow::{Context, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, GetRange, GetResult, ObjectMeta,
    ObjectStore, PutMultipartOptions, PutOptions, PutPayload, WriteMultipart, aws::AmazonS3Builder,
    memory::InMemory, path::Path,
};
use std::{collections::HashMap, ops::Range, sync::Arc};
use tracing::{debug, warn};
use url::Url;

use super::blob_store::{
    BlobError, BlobResult, BlobStore, ByteStream, ObjectBody, ObjectStream, PutObjectOptions,
    PutReceipt, collect_exact,
};
use crate::models::object::{ListPage, ObjectHead};

/// Known-length bodies up to this size go out as one put; larger ones are
/// streamed as a multipart upload.
pub const SINGLE_PUT_LIMIT: u64 = 5 * 1024 * 1024;

/// Upper bound on a single listing page.
pub const MAX_LIST_PAGE: usize = 1000;

/// Parts allowed in flight during a multipart upload.
const MAX_IN_FLIGHT_PARTS: usize = 4;

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound(path),
            object_store::Error::InvalidPath { source } => {
                BlobError::InvalidKey(source.to_string())
            }
            other => BlobError::Backend(other),
        }
    }
}

/// Blob store backed by any `object_store` implementation, rooted at a key
/// prefix.
#[derive(Clone)]
pub struct ObjectStoreBlobStore {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
}

impl ObjectStoreBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path) -> Self {
        Self { store, prefix }
    }

    /// Process-local store; contents vanish with the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), Path::default())
    }

    /// Build from a blob store URL.
    ///
    /// S3 credentials and region come from the standard `AWS_*` environment.
    /// `s3_endpoint` points at an S3-compatible service instead of AWS.
    pub fn from_url(url: &str, s3_endpoint: Option<&str>) -> anyhow::Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parsing blob store URL `{url}`"))?;
        match parsed.scheme() {
            "memory" => Ok(Self::in_memory()),
            "s3" => {
                let mut builder = AmazonS3Builder::from_env().with_url(url);
                if let Some(endpoint) = s3_endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                let store = builder.build().context("building S3 client")?;
                let prefix = Path::from_url_path(parsed.path())
                    .with_context(|| format!("parsing key prefix of `{url}`"))?;
                debug!(bucket = ?parsed.host_str(), prefix = %prefix, "created S3 blob store");
                Ok(Self::new(Arc::new(store), prefix))
            }
            other => bail!("unsupported blob store scheme `{other}`"),
        }
    }

    /// Full store path for a caller key.
    fn object_path(&self, key: &str) -> BlobResult<Path> {
        let relative = Path::parse(key).map_err(|_| BlobError::InvalidKey(key.to_string()))?;
        if relative.as_ref().is_empty() {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(Path::from_iter(self.prefix.parts().chain(relative.parts())))
    }

    /// Caller key for a store location.
    fn relative_key(&self, location: &Path) -> String {
        let full = location.as_ref();
        let prefix = self.prefix.as_ref();
        if prefix.is_empty() {
            return full.to_string();
        }
        full.strip_prefix(prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(full)
            .to_string()
    }

    fn head_from(&self, key: &str, meta: &ObjectMeta, attributes: &Attributes) -> ObjectHead {
        let mut content_type = None;
        let mut metadata = HashMap::new();
        for (attribute, value) in attributes.iter() {
            let value: &str = value.as_ref();
            match attribute {
                Attribute::ContentType => content_type = Some(value.to_string()),
                Attribute::Metadata(name) => {
                    metadata.insert(name.to_string(), value.to_string());
                }
                _ => {}
            }
        }

        ObjectHead {
            key: key.to_string(),
            size: meta.size,
            etag: meta.e_tag.clone(),
            last_modified: meta.last_modified,
            content_type,
            metadata,
        }
    }

    fn open(&self, key: &str, result: GetResult) -> ObjectStream {
        let head = self.head_from(key, &result.meta, &result.attributes);
        let body: ByteStream = result.into_stream().map_err(BlobError::from).boxed();
        ObjectStream { head, body }
    }

    async fn put_single(
        &self,
        path: &Path,
        bytes: Bytes,
        attributes: Attributes,
    ) -> BlobResult<PutReceipt> {
        let size = bytes.len() as u64;
        let result = self
            .store
            .put_opts(
                path,
                PutPayload::from(bytes),
                PutOptions {
                    attributes,
                    ..Default::default()
                },
            )
            .await?;
        Ok(PutReceipt {
            size,
            etag: result.e_tag,
        })
    }

    /// Stream a known-length body as a multipart upload. Any failure aborts
    /// the upload so no partial object is published.
    async fn put_streaming(
        &self,
        path: &Path,
        length: u64,
        mut stream: ByteStream,
        attributes: Attributes,
    ) -> BlobResult<PutReceipt> {
        let upload = self
            .store
            .put_multipart_opts(
                path,
                PutMultipartOptions {
                    attributes,
                    ..Default::default()
                },
            )
            .await?;
        let mut writer = WriteMultipart::new(upload);
        let mut received: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    abort_upload(path, writer).await;
                    return Err(err);
                }
            };
            received += chunk.len() as u64;
            if received > length {
                abort_upload(path, writer).await;
                return Err(BlobError::LengthMismatch {
                    declared: length,
                    received,
                });
            }
            if let Err(err) = writer.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await {
                abort_upload(path, writer).await;
                return Err(err.into());
            }
            writer.write(&chunk);
        }

        if received != length {
            abort_upload(path, writer).await;
            return Err(BlobError::LengthMismatch {
                declared: length,
                received,
            });
        }

        let result = writer.finish().await?;
        Ok(PutReceipt {
            size: received,
            etag: result.e_tag,
        })
    }
}

async fn abort_upload(path: &Path, writer: WriteMultipart) {
    if let Err(err) = writer.abort().await {
        warn!(path = %path, error = %err, "failed to abort multipart upload");
    }
}

fn to_attributes(options: PutObjectOptions) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(content_type) = options.content_type {
        attributes.insert(Attribute::ContentType, AttributeValue::from(content_type));
    }
    for (name, value) in options.metadata {
        attributes.insert(Attribute::Metadata(name.into()), AttributeValue::from(value));
    }
    attributes
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn put(
        &self,
        key: &str,
        body: ObjectBody,
        options: PutObjectOptions,
    ) -> BlobResult<PutReceipt> {
        let path = self.object_path(key)?;
        let attributes = to_attributes(options);
        let started = Utc::now();

        let receipt = match body {
            ObjectBody::Buffered(bytes) => self.put_single(&path, bytes, attributes).await?,
            ObjectBody::Sized { length, stream } if length <= SINGLE_PUT_LIMIT => {
                let bytes = collect_exact(stream, length).await?;
                self.put_single(&path, bytes, attributes).await?
            }
            ObjectBody::Sized { length, stream } => {
                self.put_streaming(&path, length, stream, attributes).await?
            }
        };

        debug!(
            key,
            size = receipt.size,
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "put object"
        );
        Ok(receipt)
    }

    async fn get(&self, key: &str) -> BlobResult<ObjectStream> {
        let path = self.object_path(key)?;
        let result = self.store.get_opts(&path, GetOptions::default()).await?;
        Ok(self.open(key, result))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> BlobResult<ObjectStream> {
        let path = self.object_path(key)?;
        let options = GetOptions {
            range: Some(GetRange::Bounded(range)),
            ..Default::default()
        };
        let result = self.store.get_opts(&path, options).await?;
        Ok(self.open(key, result))
    }

    async fn head(&self, key: &str) -> BlobResult<ObjectHead> {
        let path = self.object_path(key)?;
        // A plain `head` drops user metadata; a head-only get keeps it.
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self.store.get_opts(&path, options).await?;
        Ok(self.head_from(key, &result.meta, &result.attributes))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.object_path(key)?;
        self.store.delete(&path).await?;
        Ok(())
    }

    async fn list(&self, start_after: Option<&str>, max_keys: usize) -> BlobResult<ListPage> {
        let max_keys = max_keys.clamp(1, MAX_LIST_PAGE);
        let prefix = (!self.prefix.as_ref().is_empty()).then_some(&self.prefix);
        let mut listing = match start_after {
            Some(after) => {
                let offset = self.object_path(after)?;
                self.store.list_with_offset(prefix, &offset)
            }
            None => self.store.list(prefix),
        };

        let mut page = ListPage::default();
        while let Some(meta) = listing.next().await {
            let meta = meta?;
            if page.keys.len() == max_keys {
                page.next_start_after = page.keys.last().cloned();
                break;
            }
            page.keys.push(self.relative_key(&meta.location));
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::blob_store::buffer_all;
    use futures::stream;

    fn options_with(name: &str, value: &str) -> PutObjectOptions {
        PutObjectOptions {
            content_type: Some("text/plain".into()),
            metadata: HashMap::from([(name.to_string(), value.to_string())]),
        }
    }

    async fn put_bytes(store: &ObjectStoreBlobStore, key: &str, data: &'static [u8]) {
        store
            .put(
                key,
                ObjectBody::Buffered(Bytes::from_static(data)),
                PutObjectOptions::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn head_returns_size_content_type_and_metadata() {
        let store = ObjectStoreBlobStore::in_memory();
        store
            .put(
                "docs/a.txt",
                ObjectBody::Buffered(Bytes::from_static(b"hello")),
                options_with("access-policy", "{}"),
            )
            .await
            .unwrap();

        let head = store.head("docs/a.txt").await.unwrap();
        assert_eq!(head.key, "docs/a.txt");
        assert_eq!(head.size, 5);
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.policy_metadata(), Some("{}"));
    }

    #[tokio::test]
    async fn ranged_get_returns_exact_slice() {
        let store = ObjectStoreBlobStore::in_memory();
        put_bytes(&store, "a.txt", b"hello").await;

        let object = store.get_range("a.txt", 2..4).await.unwrap();
        assert_eq!(object.head.size, 5);
        assert_eq!(buffer_all(object.body).await.unwrap(), "ll");
    }

    #[tokio::test]
    async fn missing_objects_report_not_found() {
        let store = ObjectStoreBlobStore::in_memory();
        assert!(matches!(store.head("nope").await, Err(BlobError::NotFound(_))));
        assert!(matches!(store.get("nope").await, Err(BlobError::NotFound(_))));
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unusable_keys() {
        let store = ObjectStoreBlobStore::in_memory();
        for key in ["", "a//b", "../etc/passwd"] {
            assert!(
                matches!(store.head(key).await, Err(BlobError::InvalidKey(_))),
                "{key:?}"
            );
        }
    }

    #[tokio::test]
    async fn large_sized_body_streams_as_multipart() {
        let store = ObjectStoreBlobStore::in_memory();
        let chunk = Bytes::from(vec![7u8; 1024 * 1024]);
        let parts = 6;
        let body = stream::iter((0..parts).map(move |_| Ok(chunk.clone()))).boxed();

        let receipt = store
            .put(
                "big.bin",
                ObjectBody::Sized {
                    length: parts * 1024 * 1024,
                    stream: body,
                },
                options_with("access-policy", "{\"v\":1}"),
            )
            .await
            .unwrap();
        assert_eq!(receipt.size, 6 * 1024 * 1024);

        let head = store.head("big.bin").await.unwrap();
        assert_eq!(head.size, 6 * 1024 * 1024);
        assert_eq!(head.policy_metadata(), Some("{\"v\":1}"));
    }

    #[tokio::test]
    async fn short_streaming_body_is_aborted() {
        let store = ObjectStoreBlobStore::in_memory();
        let chunk = Bytes::from(vec![1u8; 1024 * 1024]);
        let body = stream::iter((0..6).map(move |_| Ok(chunk.clone()))).boxed();

        let result = store
            .put(
                "short.bin",
                ObjectBody::Sized {
                    length: 8 * 1024 * 1024,
                    stream: body,
                },
                PutObjectOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(BlobError::LengthMismatch { .. })));
        assert!(matches!(store.head("short.bin").await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn listing_paginates_in_key_order() {
        let store = ObjectStoreBlobStore::in_memory();
        for key in ["c.txt", "a.txt", "dir/b.txt", "b.txt"] {
            put_bytes(&store, key, b"x").await;
        }

        let first = store.list(None, 2).await.unwrap();
        assert_eq!(first.keys, vec!["a.txt", "b.txt"]);
        assert_eq!(first.next_start_after.as_deref(), Some("b.txt"));

        let second = store.list(first.next_start_after.as_deref(), 2).await.unwrap();
        assert_eq!(second.keys, vec!["c.txt", "dir/b.txt"]);
        assert_eq!(second.next_start_after, None);
    }

    #[tokio::test]
    async fn prefixed_store_reports_relative_keys() {
        let store = ObjectStoreBlobStore::new(Arc::new(InMemory::new()), Path::from("tenant"));
        put_bytes(&store, "a.txt", b"x").await;

        let page = store.list(None, 10).await.unwrap();
        assert_eq!(page.keys, vec!["a.txt"]);
        assert_eq!(store.head("a.txt").await.unwrap().key, "a.txt");
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(ObjectStoreBlobStore::from_url("ftp://bucket", None).is_err());
        assert!(ObjectStoreBlobStore::from_url("memory://", None).is_ok());
    }
}
