mod http;
mod router;
mod sni;

pub use http::{check_basic_auth, rewrite_host_header, DetectHost, HostAndPath};
pub use router::Router;
pub use sni::{parse_sni, Incomplete};

use std::time::Duration;

use frp_io::{detect, Detect, DetectError, PrefixedIo};
use thiserror::Error;
use tokio::io::AsyncRead;

/// How long a peek is allowed to take before the connection is dropped —
/// matches the original server's 30-second vhost muxer deadline.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest amount of a request this muxer will buffer while looking for a
/// Host header or ClientHello SNI extension.
pub const MAX_DETECT_BUF: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("no route registered for host {0}")]
    NoRoute(String),

    #[error("timed out waiting to identify the request")]
    Timeout,

    #[error(transparent)]
    Detect(#[from] DetectError),
}

/// Peeks an inbound HTTP request for its Host header (and path, for
/// location-based routing), returning the still-unconsumed connection.
pub async fn detect_http<I>(io: I) -> Result<(HostAndPath, PrefixedIo<I>), MuxError>
where
    I: AsyncRead + Unpin,
{
    tokio::time::timeout(DETECT_TIMEOUT, detect(&DetectHost, io, MAX_DETECT_BUF))
        .await
        .map_err(|_| MuxError::Timeout)?
        .map_err(MuxError::from)
}

struct DetectSni;

impl Detect for DetectSni {
    type Protocol = String;

    fn detect(&self, buf: &[u8]) -> Result<Option<String>, DetectError> {
        match sni::parse_sni(buf) {
            Ok(name) => Ok(name),
            Err(sni::Incomplete) => Ok(None),
        }
    }
}

/// Peeks an inbound TLS ClientHello for its SNI server name, without
/// terminating the handshake — the returned [`PrefixedIo`] still has the
/// full ClientHello available to whichever backend actually owns the cert.
pub async fn detect_sni<I>(io: I) -> Result<(String, PrefixedIo<I>), MuxError>
where
    I: AsyncRead + Unpin,
{
    tokio::time::timeout(DETECT_TIMEOUT, detect(&DetectSni, io, MAX_DETECT_BUF))
        .await
        .map_err(|_| MuxError::Timeout)?
        .map_err(MuxError::from)
}
