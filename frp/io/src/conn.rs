use std::{
    net::SocketAddr,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use frp_mux::MuxStream;
use pin_project_lite::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_io_timeout::TimeoutStream;
use tokio_kcp::KcpStream;
use tracing::debug;

use crate::either::EitherIo;

/// The physical transports a control connection; when TCP multiplexing is
/// on, each logical stream yamux hands back is wrapped the same way a
/// fresh accept would be.
type Physical = EitherIo<TimeoutStream<TcpStream>, TimeoutStream<KcpStream>>;
type Transport = EitherIo<Physical, TimeoutStream<MuxStream>>;

pin_project! {
    /// A connection accepted over either the TCP control transport or the
    /// KCP (reliable-UDP) one, with stateful read/write deadlines and a
    /// log-prefix carried for tracing.
    pub struct Conn {
        #[pin]
        inner: Transport,
        peer: SocketAddr,
        closed: Arc<AtomicBool>,
    }
}

impl Conn {
    pub fn from_tcp(io: TcpStream, peer: SocketAddr) -> Self {
        Self {
            inner: EitherIo::left(EitherIo::left(TimeoutStream::new(io))),
            peer,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_kcp(io: KcpStream, peer: SocketAddr) -> Self {
        Self {
            inner: EitherIo::left(EitherIo::right(TimeoutStream::new(io))),
            peer,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A logical stream accepted off a yamux-multiplexed control
    /// connection (`tcp_mux` enabled); `peer` is inherited from the
    /// physical connection the multiplexer is running over.
    pub fn from_mux(io: MuxStream, peer: SocketAddr) -> Self {
        Self {
            inner: EitherIo::right(TimeoutStream::new(io)),
            peer,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Mirrors `net.Conn.SetReadDeadline`: applies to the next read only if
    /// `dur` is `Some`; `None` clears any existing deadline.
    pub fn set_read_timeout(self: Pin<&mut Self>, dur: Option<Duration>) {
        let this = self.project();
        match this.inner.project() {
            crate::either::EitherIoProj::Left { io } => match io.project() {
                crate::either::EitherIoProj::Left { io } => io.set_read_timeout_pinned(dur),
                crate::either::EitherIoProj::Right { io } => io.set_read_timeout_pinned(dur),
            },
            crate::either::EitherIoProj::Right { io } => io.set_read_timeout_pinned(dur),
        }
    }

    pub fn set_write_timeout(self: Pin<&mut Self>, dur: Option<Duration>) {
        let this = self.project();
        match this.inner.project() {
            crate::either::EitherIoProj::Left { io } => match io.project() {
                crate::either::EitherIoProj::Left { io } => io.set_write_timeout_pinned(dur),
                crate::either::EitherIoProj::Right { io } => io.set_write_timeout_pinned(dur),
            },
            crate::either::EitherIoProj::Right { io } => io.set_write_timeout_pinned(dur),
        }
    }

    /// Idempotent: a second call is a no-op rather than an error, matching
    /// the original server's "close a conn that might already be closing
    /// from the other side" call sites.
    pub async fn close(mut self: Pin<&mut Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(error) = tokio::io::AsyncWriteExt::shutdown(&mut self).await {
            debug!(peer = %self.peer, %error, "error shutting down connection");
        }
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
