//! Small helpers shared by the auth handlers.

use axum::http::HeaderMap;
use rand::{rngs::OsRng, Rng};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

/// Bucket shared by every caller whose address cannot be resolved.
pub const UNKNOWN_IDENTITY: &str = "unknown";

const CODE_DIGITS: u32 = 6;

/// Normalize an email for lookup and comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Hash a session token so raw values never touch the database.
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Six-digit numeric code, zero padded. Uniform over the whole range.
pub(super) fn generate_numeric_code() -> String {
    let value = OsRng.gen_range(0..10u32.pow(CODE_DIGITS));
    format!("{value:0width$}", width = CODE_DIGITS as usize)
}

/// Derive the rate-limit bucket for a caller.
///
/// Order: peer address from the listener, first `X-Forwarded-For` entry,
/// `X-Real-IP`, then the shared `unknown` bucket.
pub fn rate_limit_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(peer) = peer {
        return peer.ip().to_string();
    }
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| UNKNOWN_IDENTITY.to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::http::HeaderValue;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("a b@example.com"));
    }

    #[test]
    fn session_hash_is_stable_sha256() {
        let first = hash_session_token("token");
        assert_eq!(first.len(), 32);
        assert_eq!(first, hash_session_token("token"));
        assert_ne!(first, hash_session_token("other"));
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_numeric_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn generated_codes_cover_low_values() {
        // Zero padding keeps short values at full width.
        let codes: Vec<String> = (0..2_000).map(|_| generate_numeric_code()).collect();
        assert!(codes.iter().all(|code| code.len() == 6));
        assert!(codes.iter().any(|code| code.starts_with('0')));
    }

    #[test]
    fn identity_prefers_peer_address() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let peer: SocketAddr = "198.51.100.2:4431".parse()?;
        assert_eq!(rate_limit_identity(&headers, Some(peer)), "198.51.100.2");
        Ok(())
    }

    #[test]
    fn identity_uses_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.1 , 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.9"));
        assert_eq!(rate_limit_identity(&headers, None), "203.0.113.1");
    }

    #[test]
    fn identity_falls_back_to_real_ip_then_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" "));
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.9"));
        assert_eq!(rate_limit_identity(&headers, None), "192.0.2.9");

        assert_eq!(rate_limit_identity(&HeaderMap::new(), None), UNKNOWN_IDENTITY);
    }
}
