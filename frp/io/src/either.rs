use std::{
    pin::Pin,
    task::{Context, Poll},
};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// Either one of two I/O types behind a single concrete type, so callers
    /// that branch on protocol detection don't need to box or generify.
    #[project = EitherIoProj]
    pub enum EitherIo<L, R> {
        Left { #[pin] io: L },
        Right { #[pin] io: R },
    }
}

impl<L, R> EitherIo<L, R> {
    pub fn left(io: L) -> Self {
        EitherIo::Left { io }
    }

    pub fn right(io: R) -> Self {
        EitherIo::Right { io }
    }
}

impl<L, R> AsyncRead for EitherIo<L, R>
where
    L: AsyncRead,
    R: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.project() {
            EitherIoProj::Left { io } => io.poll_read(cx, buf),
            EitherIoProj::Right { io } => io.poll_read(cx, buf),
        }
    }
}

impl<L, R> AsyncWrite for EitherIo<L, R>
where
    L: AsyncWrite,
    R: AsyncWrite,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.project() {
            EitherIoProj::Left { io } => io.poll_write(cx, buf),
            EitherIoProj::Right { io } => io.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.project() {
            EitherIoProj::Left { io } => io.poll_flush(cx),
            EitherIoProj::Right { io } => io.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.project() {
            EitherIoProj::Left { io } => io.poll_shutdown(cx),
            EitherIoProj::Right { io } => io.poll_shutdown(cx),
        }
    }
}
