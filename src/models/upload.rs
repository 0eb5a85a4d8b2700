//! Upload variants and the policy each one produces.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;

use super::policy::{AccessPolicy, digest_password};

/// Lifetime applied to temporary uploads when no usable duration is given.
pub const DEFAULT_EXPIRATION_HOURS: i64 = 24;

/// Longest lifetime a temporary upload may ask for (100 years).
pub const MAX_EXPIRATION_HOURS: f64 = 876_600.0;

/// How an uploaded file is governed once stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadVariant {
    #[default]
    Plain,
    Temporary,
    Protected,
    TemporaryProtected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadParamError {
    #[error("unknown upload type `{0}`")]
    UnknownVariant(String),
    #[error("a non-empty password is required for protected uploads")]
    MissingPassword,
}

impl UploadVariant {
    /// Parse the `type` query parameter. Absent or empty means plain.
    pub fn parse(raw: Option<&str>) -> Result<Self, UploadParamError> {
        match raw.map(str::trim).unwrap_or_default() {
            "" | "plain" => Ok(Self::Plain),
            "temporary" => Ok(Self::Temporary),
            "protected" => Ok(Self::Protected),
            "temporary-protected" => Ok(Self::TemporaryProtected),
            other => Err(UploadParamError::UnknownVariant(other.to_string())),
        }
    }

    pub fn is_temporary(self) -> bool {
        matches!(self, Self::Temporary | Self::TemporaryProtected)
    }

    pub fn is_protected(self) -> bool {
        matches!(self, Self::Protected | Self::TemporaryProtected)
    }
}

/// Validated upload parameters.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub variant: UploadVariant,
    expiration: Option<String>,
    password: Option<String>,
}

impl UploadRequest {
    /// Validate raw parameters. The password is kept only for protected
    /// variants and must be non-empty there.
    pub fn from_params(
        variant: Option<&str>,
        expiration: Option<String>,
        password: Option<String>,
    ) -> Result<Self, UploadParamError> {
        let variant = UploadVariant::parse(variant)?;
        let password = if variant.is_protected() {
            match password {
                Some(password) if !password.is_empty() => Some(password),
                _ => return Err(UploadParamError::MissingPassword),
            }
        } else {
            None
        };

        Ok(Self {
            variant,
            expiration: if variant.is_temporary() { expiration } else { None },
            password,
        })
    }

    /// Build the policy to store, anchored at `now`.
    pub fn policy_at(&self, now: DateTime<Utc>) -> AccessPolicy {
        let expires_at = self.variant.is_temporary().then(|| {
            now.checked_add_signed(expiration_window(self.expiration.as_deref()))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });

        AccessPolicy {
            expires_at,
            password_hash: self.password.as_deref().map(digest_password),
            created_at: now,
        }
    }
}

/// Hours from the `expiration` parameter. Fractions are honoured; absent,
/// unparseable or non-positive values give the 24 hour default, and values
/// above [`MAX_EXPIRATION_HOURS`] are capped to it.
pub fn expiration_window(raw: Option<&str>) -> TimeDelta {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|hours| hours.is_finite() && *hours > 0.0)
        .map(|hours| hours.min(MAX_EXPIRATION_HOURS))
        .and_then(|hours| TimeDelta::try_milliseconds((hours * 3_600_000.0) as i64))
        .filter(|window| *window > TimeDelta::zero())
        .unwrap_or_else(|| TimeDelta::hours(DEFAULT_EXPIRATION_HOURS))
}

/// Response body of a successful upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub protected: bool,
}
