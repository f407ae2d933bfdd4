use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, BytesMut};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// Wraps an I/O type with bytes that were already read off of it (during
    /// protocol detection) so they're replayed to the next reader before the
    /// underlying connection is read from again.
    pub struct PrefixedIo<T> {
        prefix: BytesMut,
        #[pin]
        io: T,
    }
}

impl<T> PrefixedIo<T> {
    pub fn new(prefix: BytesMut, io: T) -> Self {
        Self { prefix, io }
    }

    /// No bytes were consumed ahead of time; detection fell through without
    /// buffering anything.
    pub fn passthrough(io: T) -> Self {
        Self {
            prefix: BytesMut::new(),
            io,
        }
    }

    /// Gives a caller mutable access to the buffered prefix bytes before
    /// any of them are replayed — used by the vhost muxer's optional
    /// `host_header_rewrite` (spec.md §4.7), which must edit the request's
    /// `Host:` line in place rather than waiting until it's already been
    /// read by the downstream proxy.
    pub fn prefix_mut(&mut self) -> &mut BytesMut {
        &mut self.prefix
    }
}

impl<T: AsyncRead> AsyncRead for PrefixedIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        if !this.prefix.is_empty() {
            let n = std::cmp::min(this.prefix.len(), buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            if this.prefix.capacity() == 0 {
                *this.prefix = BytesMut::new();
            }
            return Poll::Ready(Ok(()));
        }
        this.io.poll_read(cx, buf)
    }
}

impl<T: AsyncWrite> AsyncWrite for PrefixedIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().io.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().io.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().io.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn replays_prefix_before_underlying_io() {
        let mut prefix = BytesMut::new();
        prefix.extend_from_slice(b"buffered");
        let underlying = std::io::Cursor::new(b"-from-socket".to_vec());
        let mut io = PrefixedIo::new(prefix, underlying);

        let mut out = Vec::new();
        io.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"buffered-from-socket");
    }
}
