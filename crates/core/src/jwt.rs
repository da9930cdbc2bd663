//! Unverified inspection of JWT access tokens
//!
//! The client never validates signatures; it only reads the `exp` claim to
//! avoid sending a token it already knows is dead.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Expiry encoded in the token, if it is a JWT carrying an `exp` claim
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claim.exp?, 0)
}

/// Whether the token is known to be expired at `now`.
///
/// Opaque tokens and JWTs without `exp` are never reported expired; only the
/// server can judge them.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    expires_at(token).is_some_and(|exp| exp <= now)
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Build an unsigned token with the given `exp` claim
    fn token_expiring(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"1","exp":{exp}}}"#));
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn reads_exp_claim() {
        let token = token_expiring(1_700_000_000);
        assert_eq!(
            expires_at(&token),
            DateTime::from_timestamp(1_700_000_000, 0)
        );
    }

    #[test]
    fn expiry_compares_against_now() {
        let now = Utc::now();
        let past = token_expiring((now - Duration::minutes(5)).timestamp());
        let future = token_expiring((now + Duration::minutes(5)).timestamp());
        assert!(is_expired_at(&past, now));
        assert!(!is_expired_at(&future, now));
    }

    #[test]
    fn opaque_tokens_are_not_judged() {
        assert_eq!(expires_at("opaque-token"), None);
        assert!(!is_expired("opaque-token"));
        assert!(!is_expired("a.%%%.c"));
    }
}
