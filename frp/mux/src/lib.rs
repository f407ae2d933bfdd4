//! A thin wrapper around `yamux`, used when a control session negotiates
//! `pool_count > 0` and wants to multiplex pooled work connections over the
//! one physical transport instead of opening a fresh TCP/KCP connection per
//! work connection.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use pin_project_lite::pin_project;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, warn};
use yamux::{Config, Connection, ConnectionError, Mode};

#[derive(Debug, Error)]
pub enum Error {
    #[error("multiplexed connection closed")]
    Closed,

    #[error(transparent)]
    Yamux(#[from] ConnectionError),
}

/// Owns the yamux connection and the background task that drives it.
/// `open` is used by the side that wants to originate pooled streams
/// (mirrors the client role in frp's own connection pool); `accept` is used
/// by the side receiving them.
pub struct Mux {
    control: yamux::Control,
    inbound: tokio::sync::mpsc::Receiver<Result<MuxStream, Error>>,
    _driver: tokio::task::JoinHandle<()>,
}

impl Mux {
    pub fn new<T>(io: T, mode: Mode) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Connection::new(io.compat(), Config::default(), mode);
        let control = conn.control();
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let driver = tokio::spawn(drive(conn, tx));
        Self {
            control,
            inbound: rx,
            _driver: driver,
        }
    }

    /// Opens a new pooled stream. Only meaningful on the side that dialed
    /// the underlying transport.
    pub async fn open_stream(&mut self) -> Result<MuxStream, Error> {
        let stream = self.control.open_stream().await?;
        Ok(MuxStream(stream.compat()))
    }

    /// Waits for the next inbound pooled stream. Returns `None` once the
    /// connection has gone away.
    pub async fn accept_stream(&mut self) -> Option<Result<MuxStream, Error>> {
        self.inbound.recv().await
    }
}

async fn drive(
    mut conn: Connection<Compat<impl AsyncRead + AsyncWrite + Unpin>>,
    tx: tokio::sync::mpsc::Sender<Result<MuxStream, Error>>,
) {
    loop {
        match conn.next_stream().await {
            Ok(Some(stream)) => {
                if tx.send(Ok(MuxStream(stream.compat()))).await.is_err() {
                    debug!("mux inbound receiver dropped, stopping driver");
                    return;
                }
            }
            Ok(None) => {
                debug!("multiplexed connection closed cleanly");
                let _ = tx.send(Err(Error::Closed)).await;
                return;
            }
            Err(error) => {
                warn!(%error, "multiplexed connection driver error");
                let _ = tx.send(Err(Error::Yamux(error))).await;
                return;
            }
        }
    }
}

pin_project! {
    /// One multiplexed stream, presenting the usual tokio `AsyncRead`/
    /// `AsyncWrite` traits so it can be treated like any other [`frp_io::Conn`]
    /// payload stream.
    pub struct MuxStream(#[pin] Compat<yamux::Stream>);
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.project().0.poll_read(cx, buf)
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().0.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().0.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().0.poll_shutdown(cx)
    }
}

pub use yamux::Mode as MuxMode;
