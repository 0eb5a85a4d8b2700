//! Access policy attached to every stored file.
//!
//! The policy travels as one JSON string in the object's user metadata under
//! [`POLICY_METADATA_KEY`]. Decoding is lenient per field: a missing or
//! malformed field falls back to its default instead of failing the record,
//! so objects written by older encoders keep decoding as the schema grows.

use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// User-metadata key holding the encoded policy.
pub const POLICY_METADATA_KEY: &str = "access-policy";

/// Schema tag written into every encoded policy.
pub const POLICY_SCHEMA_VERSION: u64 = 1;

/// Expiration and password rules for a single object.
///
/// Both dimensions are independent; `None` means "never expires" and
/// "no password" respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Instant after which the object is no longer served.
    pub expires_at: Option<DateTime<Utc>>,

    /// Hex-encoded SHA-256 digest of the access password.
    pub password_hash: Option<String>,

    /// When the policy (and the upload it belongs to) was created.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PolicyDecodeError {
    #[error("policy metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("policy metadata must be a JSON object")]
    NotAnObject,
}

impl AccessPolicy {
    /// A policy with no restriction, as written for plain uploads.
    pub fn unrestricted(created_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: None,
            password_hash: None,
            created_at,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    /// True when the policy carries an expiration strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    /// Serialize into the compact JSON form stored in object metadata.
    pub fn encode(&self) -> String {
        let mut record = Map::new();
        record.insert("v".into(), Value::from(POLICY_SCHEMA_VERSION));
        if let Some(expires_at) = self.expires_at {
            record.insert("expiresAt".into(), timestamp_value(expires_at));
        }
        if let Some(hash) = &self.password_hash {
            record.insert("passwordHash".into(), Value::String(hash.clone()));
        }
        record.insert("createdAt".into(), timestamp_value(self.created_at));
        Value::Object(record).to_string()
    }

    /// Parse an encoded policy.
    ///
    /// Only a payload that is not a JSON object at all is an error. Unknown
    /// fields and newer schema versions are accepted; `created_at` falls back
    /// to `fallback_created_at` when absent or unreadable.
    pub fn decode(
        raw: &str,
        fallback_created_at: DateTime<Utc>,
    ) -> Result<Self, PolicyDecodeError> {
        let Value::Object(record) = serde_json::from_str::<Value>(raw)? else {
            return Err(PolicyDecodeError::NotAnObject);
        };

        Ok(Self {
            expires_at: record.get("expiresAt").and_then(timestamp_field),
            password_hash: record
                .get("passwordHash")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|hash| !hash.is_empty())
                .map(str::to_string),
            created_at: record
                .get("createdAt")
                .and_then(timestamp_field)
                .unwrap_or(fallback_created_at),
        })
    }

    /// Decode the metadata slot of an object; a missing slot is the
    /// unrestricted default.
    pub fn from_metadata(
        raw: Option<&str>,
        fallback_created_at: DateTime<Utc>,
    ) -> Result<Self, PolicyDecodeError> {
        match raw {
            Some(raw) => Self::decode(raw, fallback_created_at),
            None => Ok(Self::unrestricted(fallback_created_at)),
        }
    }
}

/// Hex SHA-256 of a password, the form stored in `password_hash`.
pub fn digest_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// RFC 3339 covers years 0 through 9999 only; anything outside is written
/// as epoch milliseconds.
fn timestamp_value(ts: DateTime<Utc>) -> Value {
    if (0..=9999).contains(&ts.year()) {
        Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    } else {
        Value::from(ts.timestamp_millis())
    }
}

/// RFC 3339 strings and epoch milliseconds are both accepted.
fn timestamp_field(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn round_trips_every_field_combination() {
        let now = Utc::now();
        let hash = digest_password("secret");
        let cases = [
            (None, None),
            (Some(now + TimeDelta::hours(24)), None),
            (None, Some(hash.clone())),
            (Some(now - TimeDelta::seconds(1)), Some(hash)),
        ];

        for (expires_at, password_hash) in cases {
            let policy = AccessPolicy {
                expires_at,
                password_hash,
                created_at: now,
            };
            let decoded = AccessPolicy::decode(&policy.encode(), created()).unwrap();
            assert_eq!(decoded, policy);
        }
    }

    #[test]
    fn encoding_carries_schema_tag() {
        let encoded = AccessPolicy::unrestricted(created()).encode();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["v"], Value::from(POLICY_SCHEMA_VERSION));
        assert!(value.get("expiresAt").is_none());
        assert!(value.get("passwordHash").is_none());
    }

    #[test]
    fn missing_slot_is_unrestricted() {
        let policy = AccessPolicy::from_metadata(None, created()).unwrap();
        assert_eq!(policy, AccessPolicy::unrestricted(created()));
    }

    #[test]
    fn malformed_fields_fall_back_to_defaults() {
        let raw = r#"{"v": 1, "expiresAt": "next tuesday", "passwordHash": 42, "createdAt": false}"#;
        let policy = AccessPolicy::decode(raw, created()).unwrap();
        assert_eq!(policy, AccessPolicy::unrestricted(created()));
    }

    #[test]
    fn decoding_ignores_whitespace_unknown_fields_and_newer_versions() {
        let raw = "{\n  \"v\" : 7,\n  \"passwordHash\" : \"abcd\" ,\n  \"maxDownloads\": 3\n}";
        let policy = AccessPolicy::decode(raw, created()).unwrap();
        assert_eq!(policy.password_hash.as_deref(), Some("abcd"));
        assert_eq!(policy.expires_at, None);
        assert_eq!(policy.created_at, created());
    }

    #[test]
    fn accepts_epoch_millis_timestamps() {
        let raw = r#"{"expiresAt": 1740830400000}"#;
        let policy = AccessPolicy::decode(raw, created()).unwrap();
        assert_eq!(policy.expires_at, Some(created()));
    }

    #[test]
    fn far_future_expiry_survives_a_round_trip() {
        let expires_at = Utc.with_ymd_and_hms(13434, 9, 29, 18, 1, 14).unwrap()
            + TimeDelta::milliseconds(250);
        let policy = AccessPolicy {
            expires_at: Some(expires_at),
            ..AccessPolicy::unrestricted(created())
        };

        let encoded = policy.encode();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["expiresAt"], Value::from(expires_at.timestamp_millis()));
        assert_eq!(value["createdAt"], "2025-03-01T12:00:00Z");
        assert_eq!(AccessPolicy::decode(&encoded, created()).unwrap(), policy);
    }

    #[test]
    fn rejects_payloads_that_are_not_objects() {
        assert!(matches!(
            AccessPolicy::decode("not json", created()),
            Err(PolicyDecodeError::Json(_))
        ));
        assert!(matches!(
            AccessPolicy::decode("[1, 2]", created()),
            Err(PolicyDecodeError::NotAnObject)
        ));
    }

    #[test]
    fn expiry_is_strictly_before_now() {
        let policy = AccessPolicy {
            expires_at: Some(created()),
            ..AccessPolicy::unrestricted(created())
        };
        assert!(!policy.is_expired_at(created()));
        assert!(policy.is_expired_at(created() + TimeDelta::milliseconds(1)));
        assert!(!AccessPolicy::unrestricted(created()).is_expired_at(Utc::now()));
    }

    #[test]
    fn password_digest_is_hex_sha256() {
        assert_eq!(
            digest_password("secret"),
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }
}
