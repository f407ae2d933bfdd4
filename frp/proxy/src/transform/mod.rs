//! Optional per-proxy symmetric transformation applied to the
//! reverse-tunnel half of a splice (spec.md §4.10): the public side always
//! carries plaintext, uncompressed bytes, while the work-connection side
//! carries whatever `use_encryption`/`use_compression` asked for.

mod compress;
mod crypto;

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use compress::DeflateStream;
use crypto::CryptoStream;

pin_project! {
    #[project = TunnelStreamProj]
    pub enum TunnelStream<T> {
        Plain { #[pin] io: T },
        Encrypted { #[pin] io: CryptoStream<T> },
        Compressed { #[pin] io: DeflateStream<T> },
        Both { #[pin] io: DeflateStream<CryptoStream<T>> },
    }
}

/// Wraps `io` (always the tunnel side, never the public side) according to
/// a proxy's registered flags. Compression runs over the already-encrypted
/// bytes on write and is undone before decryption on read, so the order is
/// symmetric regardless of which side is writing.
pub fn wrap_tunnel<T>(io: T, shared_secret: &str, use_encryption: bool, use_compression: bool) -> TunnelStream<T> {
    match (use_encryption, use_compression) {
        (false, false) => TunnelStream::Plain { io },
        (true, false) => TunnelStream::Encrypted {
            io: CryptoStream::new(io, shared_secret),
        },
        (false, true) => TunnelStream::Compressed { io: DeflateStream::new(io) },
        (true, true) => TunnelStream::Both {
            io: DeflateStream::new(CryptoStream::new(io, shared_secret)),
        },
    }
}

impl<T> AsyncRead for TunnelStream<T>
where
    T: AsyncRead,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.project() {
            TunnelStreamProj::Plain { io } => io.poll_read(cx, buf),
            TunnelStreamProj::Encrypted { io } => io.poll_read(cx, buf),
            TunnelStreamProj::Compressed { io } => io.poll_read(cx, buf),
            TunnelStreamProj::Both { io } => io.poll_read(cx, buf),
        }
    }
}

impl<T> AsyncWrite for TunnelStream<T>
where
    T: AsyncWrite,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.project() {
            TunnelStreamProj::Plain { io } => io.poll_write(cx, buf),
            TunnelStreamProj::Encrypted { io } => io.poll_write(cx, buf),
            TunnelStreamProj::Compressed { io } => io.poll_write(cx, buf),
            TunnelStreamProj::Both { io } => io.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.project() {
            TunnelStreamProj::Plain { io } => io.poll_flush(cx),
            TunnelStreamProj::Encrypted { io } => io.poll_flush(cx),
            TunnelStreamProj::Compressed { io } => io.poll_flush(cx),
            TunnelStreamProj::Both { io } => io.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.project() {
            TunnelStreamProj::Plain { io } => io.poll_shutdown(cx),
            TunnelStreamProj::Encrypted { io } => io.poll_shutdown(cx),
            TunnelStreamProj::Compressed { io } => io.poll_shutdown(cx),
            TunnelStreamProj::Both { io } => io.poll_shutdown(cx),
        }
    }
}
