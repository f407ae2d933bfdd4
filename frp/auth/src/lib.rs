//! `privilege_key` (control-session auth) and `sk`/`sign_key` (STCP visitor
//! auth) are both checked the same way: `md5_hex(secret || timestamp)`,
//! compared against what the peer sent alongside that same timestamp, with
//! a bound on how far the timestamp may have drifted from wall-clock time.
//!
//! The digest matches `util.GetAuthKey` in an existing frpc/frps
//! implementation bit-for-bit, so this server authenticates real,
//! unmodified clients rather than only ones built against this crate.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Default timestamp-skew bound used by [`verify_now`] when a caller has no
/// configured `AuthTimeout` of its own to pass through.
pub const DEFAULT_TIMESTAMP_SKEW_SECS: i64 = 15 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token timestamp is {0}s old, exceeding the {1}s window")]
    TimestampSkew(i64, i64),

    #[error("authentication token mismatch")]
    TokenMismatch,

    #[error("unsupported client version {client}, server requires at least {minimum}")]
    IncompatibleVersion { client: String, minimum: String },
}

/// Computes the token a peer is expected to present for `timestamp`.
pub fn token(secret: &str, timestamp: i64) -> String {
    let mut input = secret.as_bytes().to_vec();
    input.extend_from_slice(timestamp.to_string().as_bytes());
    format!("{:x}", md5::compute(input))
}

/// Verifies a peer-supplied token against the shared secret and timestamp.
///
/// `timeout_secs` is the configured `AuthTimeout` (spec.md §4.5 step 2,
/// §6): a peer whose timestamp has drifted more than `timeout_secs` from
/// `now` is rejected, unless `timeout_secs` is `0`, which disables the
/// check entirely.
pub fn verify(
    secret: &str,
    timestamp: i64,
    presented: &str,
    now: i64,
    timeout_secs: i64,
) -> Result<(), AuthError> {
    if timeout_secs != 0 {
        let skew = (now - timestamp).abs();
        if skew > timeout_secs {
            return Err(AuthError::TimestampSkew(skew, timeout_secs));
        }
    }
    let expected = token(secret, timestamp);
    if !constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
        return Err(AuthError::TokenMismatch);
    }
    Ok(())
}

/// Convenience wrapper over [`verify`] using the current wall-clock time.
pub fn verify_now(
    secret: &str,
    timestamp: i64,
    presented: &str,
    timeout_secs: i64,
) -> Result<(), AuthError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    verify(secret, timestamp, presented, now, timeout_secs)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// A dotted `major.minor.patch` version, parsed loosely enough to tolerate
/// a trailing pre-release suffix (e.g. `0.52.0-dev`) by ignoring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(u64, u64, u64);

impl Version {
    pub fn parse(s: &str) -> Option<Self> {
        let core = s.split(['-', '+']).next().unwrap_or(s);
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        Some(Version(major, minor, patch))
    }
}

/// The server's minimum supported client version. Clients older than this
/// are rejected at login rather than allowed to speak a wire dialect the
/// server no longer understands.
pub fn check_version_compat(client_version: &str, minimum: &str) -> Result<(), AuthError> {
    let client = Version::parse(client_version).ok_or_else(|| AuthError::IncompatibleVersion {
        client: client_version.to_string(),
        minimum: minimum.to_string(),
    })?;
    let min = Version::parse(minimum).expect("minimum version is a compile-time constant");
    if client < min {
        return Err(AuthError::IncompatibleVersion {
            client: client_version.to_string(),
            minimum: minimum.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_verify() {
        let secret = "s3cr3t";
        let ts = 1_700_000_000;
        let tok = token(secret, ts);
        assert!(verify(secret, ts, &tok, ts, DEFAULT_TIMESTAMP_SKEW_SECS).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let ts = 1_700_000_000;
        let tok = token("s3cr3t", ts);
        assert_eq!(
            verify("wrong", ts, &tok, ts, DEFAULT_TIMESTAMP_SKEW_SECS),
            Err(AuthError::TokenMismatch)
        );
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let secret = "s3cr3t";
        let ts = 1_700_000_000;
        let tok = token(secret, ts);
        let now = ts + DEFAULT_TIMESTAMP_SKEW_SECS + 1;
        assert_eq!(
            verify(secret, ts, &tok, now, DEFAULT_TIMESTAMP_SKEW_SECS),
            Err(AuthError::TimestampSkew(
                DEFAULT_TIMESTAMP_SKEW_SECS + 1,
                DEFAULT_TIMESTAMP_SKEW_SECS
            ))
        );
    }

    #[test]
    fn zero_timeout_disables_skew_check() {
        let secret = "s3cr3t";
        let ts = 1_700_000_000;
        let tok = token(secret, ts);
        let now = ts + DEFAULT_TIMESTAMP_SKEW_SECS * 100;
        assert!(verify(secret, ts, &tok, now, 0).is_ok());
    }

    #[test]
    fn version_compat_accepts_equal_and_newer() {
        assert!(check_version_compat("0.52.0", "0.52.0").is_ok());
        assert!(check_version_compat("0.53.1", "0.52.0").is_ok());
    }

    #[test]
    fn version_compat_rejects_older() {
        assert!(check_version_compat("0.51.9", "0.52.0").is_err());
    }

    #[test]
    fn version_compat_rejects_unparseable() {
        assert!(check_version_compat("not-a-version", "0.52.0").is_err());
    }
}
