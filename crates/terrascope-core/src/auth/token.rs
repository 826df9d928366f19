//! Bearer credential payload inspection.
//!
//! Access and refresh credentials are compact JWTs whose payload segment
//! carries an `exp` claim. Expiry is read locally, without verifying the
//! signature - validation is the server's job, scheduling is ours.
//!
//! Everything here is pure and fails closed: a credential whose expiry
//! cannot be read is treated as already expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Lead time subtracted from the embedded expiry when deciding whether a
/// credential is still usable. Covers request latency and minor clock skew
/// between this machine and the service.
pub const DEFAULT_EXPIRY_LEAD_SECS: i64 = 30;

#[derive(Deserialize)]
struct Claims {
    exp: i64,
}

/// Extract the expiry instant embedded in a bearer credential.
/// Returns `None` for anything that is not a parseable three-segment token.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp, 0).single()
}

/// Whether the credential is expired, or will be within `lead_secs`.
/// Undecodable credentials count as expired.
pub fn is_expired(token: &str, lead_secs: i64) -> bool {
    match decode_expiry(token) {
        Some(expiry) => Utc::now() + Duration::seconds(lead_secs) >= expiry,
        None => true,
    }
}

/// Time remaining until the credential's embedded expiry, clamped to zero.
pub fn time_until_expiry(token: &str) -> Duration {
    decode_expiry(token)
        .map(|expiry| (expiry - Utc::now()).max(Duration::zero()))
        .unwrap_or_else(Duration::zero)
}

/// Fabricate a JWT-shaped token whose payload expires at `exp`.
/// The signature segment is junk - `decode_expiry` never looks at it.
#[cfg(test)]
pub(crate) fn make_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_expiry_round_trip() {
        let exp = Utc::now().timestamp() + 300;
        let expiry = decode_expiry(&make_token(exp)).expect("expiry");
        assert_eq!(expiry.timestamp(), exp);
    }

    #[test]
    fn test_malformed_tokens_have_no_expiry() {
        assert!(decode_expiry("").is_none());
        assert!(decode_expiry("only-one-segment").is_none());
        assert!(decode_expiry("a.not-base64!.c").is_none());
        // Valid base64, but not a JSON object with an exp claim
        let payload = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(decode_expiry(&format!("a.{payload}.c")).is_none());
    }

    #[test]
    fn test_malformed_tokens_are_expired() {
        // Fail closed: no readable expiry means not usable
        assert!(is_expired("garbage", 0));
        assert!(is_expired("", 30));
    }

    #[test]
    fn test_is_expired_boundaries() {
        let lead = 30;
        let now = Utc::now().timestamp();

        // Well inside the lead window
        assert!(is_expired(&make_token(now + lead - 10), lead));
        // Expiry in the past
        assert!(is_expired(&make_token(now - 1), lead));
        // Comfortably beyond the lead window (margin absorbs test runtime)
        assert!(!is_expired(&make_token(now + lead + 60), lead));
        // Zero lead: only the embedded expiry matters
        assert!(!is_expired(&make_token(now + 60), 0));
    }

    #[test]
    fn test_time_until_expiry_clamps_to_zero() {
        let now = Utc::now().timestamp();
        assert_eq!(time_until_expiry(&make_token(now - 100)), Duration::zero());
        assert_eq!(time_until_expiry("garbage"), Duration::zero());

        let remaining = time_until_expiry(&make_token(now + 300));
        assert!(remaining > Duration::seconds(290) && remaining <= Duration::seconds(300));
    }
}
