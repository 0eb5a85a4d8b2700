//! Access decisions for stored files.
//!
//! Full retrieval, ranged retrieval, HEAD and password verification all call
//! [`evaluate`], so they cannot disagree about who may read what.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::policy::AccessPolicy;

/// Outcome of evaluating a policy against a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Expired,
    PasswordRequired,
    PasswordInvalid,
}

pub fn evaluate(policy: &AccessPolicy, supplied_password: Option<&str>) -> Decision {
    evaluate_at(policy, supplied_password, Utc::now())
}

/// Expiration is checked first and wins over any password outcome. An empty
/// password counts as not supplied.
pub fn evaluate_at(
    policy: &AccessPolicy,
    supplied_password: Option<&str>,
    now: DateTime<Utc>,
) -> Decision {
    if policy.is_expired_at(now) {
        return Decision::Expired;
    }

    let Some(expected) = policy.password_hash.as_deref() else {
        return Decision::Allowed;
    };

    match supplied_password.filter(|password| !password.is_empty()) {
        None => Decision::PasswordRequired,
        Some(password) if password_matches(expected, password) => Decision::Allowed,
        Some(_) => Decision::PasswordInvalid,
    }
}

/// Compare digests as raw bytes; a stored hash that is not hex never matches.
fn password_matches(expected_hex: &str, password: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex.trim()) else {
        return false;
    };
    expected.as_slice() == Sha256::digest(password.as_bytes()).as_slice()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::digest_password;
    use chrono::TimeDelta;

    fn policy(expires_in: Option<TimeDelta>, password: Option<&str>) -> AccessPolicy {
        let now = Utc::now();
        AccessPolicy {
            expires_at: expires_in.map(|delta| now + delta),
            password_hash: password.map(digest_password),
            created_at: now,
        }
    }

    #[test]
    fn unrestricted_policy_always_allows() {
        let open = policy(None, None);
        for supplied in [None, Some(""), Some("anything")] {
            assert_eq!(evaluate(&open, supplied), Decision::Allowed);
        }
    }

    #[test]
    fn expiration_precedes_password_checks() {
        let expired = policy(Some(TimeDelta::minutes(-1)), Some("secret"));
        for supplied in [None, Some("wrong"), Some("secret")] {
            assert_eq!(evaluate(&expired, supplied), Decision::Expired);
        }
    }

    #[test]
    fn future_expiration_is_still_served() {
        let live = policy(Some(TimeDelta::hours(1)), None);
        assert_eq!(evaluate(&live, None), Decision::Allowed);
        assert_eq!(
            evaluate_at(&live, None, Utc::now() + TimeDelta::hours(2)),
            Decision::Expired
        );
    }

    #[test]
    fn protected_policy_distinguishes_missing_and_wrong_password() {
        let protected = policy(None, Some("secret"));
        assert_eq!(evaluate(&protected, None), Decision::PasswordRequired);
        assert_eq!(evaluate(&protected, Some("")), Decision::PasswordRequired);
        assert_eq!(evaluate(&protected, Some("wrong")), Decision::PasswordInvalid);
        assert_eq!(evaluate(&protected, Some("secret")), Decision::Allowed);
    }

    #[test]
    fn stored_hash_case_does_not_matter_but_garbage_never_matches() {
        let mut upper = policy(None, Some("secret"));
        upper.password_hash = upper.password_hash.map(|hash| hash.to_ascii_uppercase());
        assert_eq!(evaluate(&upper, Some("secret")), Decision::Allowed);

        let mut garbage = policy(None, None);
        garbage.password_hash = Some("not-hex".into());
        assert_eq!(evaluate(&garbage, Some("not-hex")), Decision::PasswordInvalid);
    }
}
