use std::{
    pin::Pin,
    task::{Context, Poll},
};

use pin_project_lite::pin_project;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const BLOCK_LEN: u64 = 32;

fn keystream_block(key: &[u8; 32], block: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(block.to_be_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn xor_in_place(key: &[u8; 32], start_pos: u64, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        let pos = start_pos + i as u64;
        let block = keystream_block(key, pos / BLOCK_LEN);
        *byte ^= block[(pos % BLOCK_LEN) as usize];
    }
}

pin_project! {
    /// XORs every byte crossing the stream against a keystream derived
    /// from the shared privilege token, the same secret frp-auth already
    /// hashes to check the login/work-conn tokens. Read and write
    /// directions keep independent position counters since each is
    /// encrypted independently on the wire.
    pub struct CryptoStream<T> {
        #[pin]
        inner: T,
        key: [u8; 32],
        read_pos: u64,
        write_pos: u64,
    }
}

impl<T> CryptoStream<T> {
    pub fn new(inner: T, shared_secret: &str) -> Self {
        let digest = Sha256::digest(shared_secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self {
            inner,
            key,
            read_pos: 0,
            write_pos: 0,
        }
    }
}

impl<T: AsyncRead> AsyncRead for CryptoStream<T> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let poll = this.inner.poll_read(cx, buf);
        if poll.is_ready() {
            let added = buf.filled().len() - before;
            if added > 0 {
                xor_in_place(this.key, *this.read_pos, &mut buf.filled_mut()[before..before + added]);
                *this.read_pos += added as u64;
            }
        }
        poll
    }
}

impl<T: AsyncWrite> AsyncWrite for CryptoStream<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.project();
        let mut scratch = data.to_vec();
        xor_in_place(this.key, *this.write_pos, &mut scratch);
        match this.inner.poll_write(cx, &scratch) {
            Poll::Ready(Ok(n)) => {
                *this.write_pos += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn round_trips_through_two_independently_keyed_ends() {
        let (a, b) = duplex(256);
        let mut client = CryptoStream::new(a, "shared-secret");
        let mut server = CryptoStream::new(b, "shared-secret");

        client.write_all(b"hello tunnel").await.unwrap();
        let mut buf = [0u8; 12];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello tunnel");

        server.write_all(b"hello client").await.unwrap();
        let mut buf = [0u8; 12];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello client");
    }

    #[tokio::test]
    async fn wrong_key_does_not_round_trip() {
        let (a, b) = duplex(256);
        let mut client = CryptoStream::new(a, "shared-secret");
        let mut server = CryptoStream::new(b, "different-secret");

        client.write_all(b"hello tunnel").await.unwrap();
        let mut buf = [0u8; 12];
        server.read_exact(&mut buf).await.unwrap();
        assert_ne!(&buf, b"hello tunnel");
    }
}
