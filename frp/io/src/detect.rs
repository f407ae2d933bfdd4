use bytes::BytesMut;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::prefixed::PrefixedIo;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("no protocol identified within {0} bytes")]
    BufferExhausted(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Something that can be recognized by buffering bytes off the front of a
/// connection without fully consuming them.
pub trait Detect {
    type Protocol;

    /// Inspects `buf`, returning `Ok(Some(_))` once enough bytes have
    /// arrived to decide, `Ok(None)` if more bytes are still needed, or an
    /// error if the buffered bytes can never match.
    fn detect(&self, buf: &[u8]) -> Result<Option<Self::Protocol>, DetectError>;
}

/// Repeatedly reads from `io` into a capacity-bounded buffer, offering each
/// chunk to `detector`, until it resolves a protocol, the peer closes the
/// connection, or the buffer fills without a match.
///
/// Returns the detected protocol along with a [`PrefixedIo`] that will
/// replay the buffered bytes to whatever reads from it next.
pub async fn detect<D, I>(
    detector: &D,
    mut io: I,
    max_buf: usize,
) -> Result<(D::Protocol, PrefixedIo<I>), DetectError>
where
    D: Detect,
    I: tokio::io::AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(max_buf);
    loop {
        match detector.detect(&buf)? {
            Some(protocol) => return Ok((protocol, PrefixedIo::new(buf, io))),
            None => {
                if buf.len() >= max_buf {
                    return Err(DetectError::BufferExhausted(max_buf));
                }
                let n = io.read_buf(&mut buf).await?;
                if n == 0 {
                    return Err(DetectError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed during protocol detection",
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StartsWithGet;

    impl Detect for StartsWithGet {
        type Protocol = ();

        fn detect(&self, buf: &[u8]) -> Result<Option<()>, DetectError> {
            if buf.len() < 3 {
                return Ok(None);
            }
            if &buf[..3] == b"GET" {
                Ok(Some(()))
            } else {
                Err(DetectError::BufferExhausted(buf.len()))
            }
        }
    }

    #[tokio::test]
    async fn detects_after_buffering() {
        let io = std::io::Cursor::new(b"GET / HTTP/1.1\r\n".to_vec());
        let (protocol, prefixed) = detect(&StartsWithGet, io, 4096).await.unwrap();
        assert_eq!(protocol, ());
        drop(prefixed);
    }

    #[tokio::test]
    async fn surfaces_eof_as_io_error() {
        let io = std::io::Cursor::new(Vec::new());
        let err = detect(&StartsWithGet, io, 4096).await.unwrap_err();
        assert!(matches!(err, DetectError::Io(_)));
    }
}
