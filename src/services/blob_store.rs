//! The blob-store seam.
//!
//! Everything the proxy needs from object storage goes through [`BlobStore`]:
//! put with metadata, full and ranged reads, head, delete and paginated
//! listing. The S3-compatible implementation lives in
//! [`object_store_backend`](super::object_store_backend).

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt, stream::BoxStream};
use std::{
    collections::HashMap,
    io::{self, SeekFrom},
    ops::Range,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::models::object::{ListPage, ObjectHead};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("body length mismatch: declared {declared} bytes, received {received}")]
    LengthMismatch { declared: u64, received: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The caller's body stream failed, e.g. a client disconnecting mid-upload.
    #[error("reading the upload body failed: {0}")]
    BodyRead(#[source] io::Error),
    #[error("blob store request failed: {0}")]
    Backend(#[source] object_store::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Payload chunks flowing to or from the store.
pub type ByteStream = BoxStream<'static, BlobResult<Bytes>>;

/// An object body opened for reading, with the head of the version served.
pub struct ObjectStream {
    pub head: ObjectHead,
    pub body: ByteStream,
}

/// Write-side options for a put.
#[derive(Clone, Debug, Default)]
pub struct PutObjectOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// What the store reports after a successful put.
#[derive(Clone, Debug)]
pub struct PutReceipt {
    pub size: u64,
    pub etag: Option<String>,
}

/// Body of an upload.
///
/// `Sized` bodies are streamed through to the store and never held in memory
/// as a whole. `Buffered` bodies come from sources whose length could only be
/// learned by reading them completely.
pub enum ObjectBody {
    Buffered(Bytes),
    Sized { length: u64, stream: ByteStream },
}

impl ObjectBody {
    pub fn length(&self) -> u64 {
        match self {
            Self::Buffered(bytes) => bytes.len() as u64,
            Self::Sized { length, .. } => *length,
        }
    }

    /// Measure a seekable source by seeking to its end and back, then stream
    /// it from the current position.
    ///
    /// For library callers holding a file or cursor. The HTTP surface gets
    /// its length from `Content-Length` and goes through [`Self::from_stream`].
    pub async fn from_seekable<R>(mut reader: R) -> io::Result<Self>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send + 'static,
    {
        let position = reader.stream_position().await?;
        let end = reader.seek(SeekFrom::End(0)).await?;
        reader.seek(SeekFrom::Start(position)).await?;

        Ok(Self::Sized {
            length: end.saturating_sub(position),
            stream: ReaderStream::new(reader).map_err(BlobError::from).boxed(),
        })
    }

    /// Wrap an opaque stream. With a declared length the stream is passed
    /// through untouched; without one it is read to the end first.
    pub async fn from_stream<S>(stream: S, declared_length: Option<u64>) -> BlobResult<Self>
    where
        S: Stream<Item = BlobResult<Bytes>> + Send + 'static,
    {
        match declared_length {
            Some(length) => Ok(Self::Sized {
                length,
                stream: stream.boxed(),
            }),
            None => Ok(Self::Buffered(buffer_all(stream.boxed()).await?)),
        }
    }
}

/// Read a stream completely into memory.
pub async fn buffer_all(mut stream: ByteStream) -> BlobResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Read a stream that must yield exactly `length` bytes.
pub async fn collect_exact(mut stream: ByteStream, length: u64) -> BlobResult<Bytes> {
    let mut buf = BytesMut::with_capacity(usize::try_from(length).unwrap_or(0));
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
        if buf.len() as u64 > length {
            return Err(BlobError::LengthMismatch {
                declared: length,
                received: buf.len() as u64,
            });
        }
    }
    if buf.len() as u64 != length {
        return Err(BlobError::LengthMismatch {
            declared: length,
            received: buf.len() as u64,
        });
    }
    Ok(buf.freeze())
}

/// Key-addressed object storage.
///
/// Implementations provide per-key consistency only; the proxy takes no
/// locks of its own.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create or replace the object at `key` together with its metadata.
    /// Either the whole object lands or nothing becomes visible.
    async fn put(
        &self,
        key: &str,
        body: ObjectBody,
        options: PutObjectOptions,
    ) -> BlobResult<PutReceipt>;

    /// Open the full object.
    ///
    /// Returns `BlobError::NotFound` if the object doesn't exist.
    async fn get(&self, key: &str) -> BlobResult<ObjectStream>;

    /// Open a half-open byte range of the object.
    async fn get_range(&self, key: &str, range: Range<u64>) -> BlobResult<ObjectStream>;

    /// Size, entity tag, content type and user metadata without the body.
    async fn head(&self, key: &str) -> BlobResult<ObjectHead>;

    /// Remove the object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// List up to `max_keys` keys strictly after `start_after`, in
    /// lexicographic order.
    async fn list(&self, start_after: Option<&str>, max_keys: usize) -> BlobResult<ListPage>;
}
