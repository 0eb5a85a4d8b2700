//! Represents a stored file as reported by the blob store.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::policy::{AccessPolicy, POLICY_METADATA_KEY, PolicyDecodeError};

/// Fallback content type when neither the key nor the store provides one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Head information for a single object.
///
/// Payload bytes are never part of this struct; they stream straight from the
/// blob store to the caller.
#[derive(Clone, Debug)]
pub struct ObjectHead {
    /// Object key (path-like identifier, relative to the store prefix).
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// Entity tag reported by the blob store.
    pub etag: Option<String>,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,

    /// Content type stored alongside the object, if any.
    pub content_type: Option<String>,

    /// User metadata (`x-amz-meta-*` on S3).
    pub metadata: HashMap<String, String>,
}

impl ObjectHead {
    /// The encoded access policy, if the object carries one.
    pub fn policy_metadata(&self) -> Option<&str> {
        self.metadata.get(POLICY_METADATA_KEY).map(String::as_str)
    }

    /// Decode the access policy; objects without one are unrestricted and
    /// date from their last write.
    pub fn access_policy(&self) -> Result<AccessPolicy, PolicyDecodeError> {
        AccessPolicy::from_metadata(self.policy_metadata(), self.last_modified)
    }

    pub fn resolved_content_type(&self) -> String {
        resolve_content_type(&self.key, self.content_type.as_deref())
    }
}

/// Content type for a key: its extension wins, then the stored type, then
/// `application/octet-stream`.
pub fn resolve_content_type(key: &str, stored: Option<&str>) -> String {
    mime_guess::from_path(key)
        .first_raw()
        .or(stored.filter(|ct| !ct.trim().is_empty()))
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// One page of a key listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    /// Keys in lexicographic order.
    pub keys: Vec<String>,

    /// Resume point for the next page; `None` on the last page.
    pub next_start_after: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_takes_precedence_over_stored_type() {
        assert_eq!(resolve_content_type("a.txt", Some("image/png")), "text/plain");
        assert_eq!(resolve_content_type("clips/intro.mp4", None), "video/mp4");
    }

    #[test]
    fn falls_back_to_stored_then_octet_stream() {
        assert_eq!(resolve_content_type("README", Some("text/markdown")), "text/markdown");
        assert_eq!(resolve_content_type("blob.unknownext", None), DEFAULT_CONTENT_TYPE);
        assert_eq!(resolve_content_type("noext", Some("  ")), DEFAULT_CONTENT_TYPE);
    }
}
