use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum SpliceError {
    #[error("splice io error: {0}")]
    Io(#[source] io::Error),
}

/// Bytes moved in each direction of a [`splice`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpliceStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Copies bytes between `a` and `b` in both directions concurrently until
/// either side's read half reaches end of stream, then shuts down the
/// corresponding write half and returns.
///
/// A read error whose root cause is `UnexpectedEof` — including one
/// discovered by walking `source()` through a wrapping error type, which
/// compression/encryption layers may introduce — is treated the same as a
/// clean `Ok(0)` read: normal termination, not a failure to report.
pub async fn splice<A, B>(mut a: A, mut b: B) -> Result<SpliceStats, SpliceError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ar, mut aw) = tokio::io::split(&mut a);
    let (mut br, mut bw) = tokio::io::split(&mut b);

    let a_to_b = async {
        let result = tokio::io::copy(&mut ar, &mut bw).await;
        let _ = bw.shutdown().await;
        result
    };
    let b_to_a = async {
        let result = tokio::io::copy(&mut br, &mut aw).await;
        let _ = aw.shutdown().await;
        result
    };

    let (a_to_b, b_to_a) = tokio::join!(a_to_b, b_to_a);

    Ok(SpliceStats {
        a_to_b: unwrap_or_eof(a_to_b)?,
        b_to_a: unwrap_or_eof(b_to_a)?,
    })
}

fn unwrap_or_eof(result: io::Result<u64>) -> Result<u64, SpliceError> {
    match result {
        Ok(n) => Ok(n),
        Err(e) if is_eof(&e) => Ok(0),
        Err(e) => Err(SpliceError::Io(e)),
    }
}

fn is_eof(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        return true;
    }
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        source = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn copies_both_directions_until_close() {
        let (mut client, server) = duplex(64);
        let (mut far, near) = duplex(64);

        let splicer = tokio::spawn(splice(server, near));

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        far.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(client);
        drop(far);

        let stats = splicer.await.unwrap().unwrap();
        assert_eq!(stats.a_to_b, 5);
        assert_eq!(stats.b_to_a, 5);
    }

    #[test]
    fn recognizes_wrapped_eof() {
        #[derive(Debug)]
        struct Wrapper(io::Error);
        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "wrapped: {}", self.0)
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let inner = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let wrapped = io::Error::new(io::ErrorKind::Other, Wrapper(inner));
        assert!(is_eof(&wrapped));

        let unrelated = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(!is_eof(&unrelated));
    }
}
