use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

fn drain_write_out<T: AsyncWrite>(
    mut inner: Pin<&mut T>,
    cx: &mut Context<'_>,
    write_out: &mut Vec<u8>,
    write_out_pos: &mut usize,
) -> Poll<io::Result<()>> {
    while *write_out_pos < write_out.len() {
        match inner.as_mut().poll_write(cx, &write_out[*write_out_pos..]) {
            Poll::Ready(Ok(0)) => {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write compressed data")))
            }
            Poll::Ready(Ok(n)) => *write_out_pos += n,
            Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
            Poll::Pending => return Poll::Pending,
        }
    }
    write_out.clear();
    *write_out_pos = 0;
    Poll::Ready(Ok(()))
}

fn compress_write(compress: &mut Compress, write_out: &mut Vec<u8>, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    let mut out_buf = [0u8; 8192];
    while offset < data.len() {
        let before_in = compress.total_in();
        let before_out = compress.total_out();
        compress
            .compress(&data[offset..], &mut out_buf, FlushCompress::Sync)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;
        offset += (compress.total_in() - before_in) as usize;
        write_out.extend_from_slice(&out_buf[..(compress.total_out() - before_out) as usize]);
    }
    Ok(())
}

/// Flushes the compressor's trailer. Called once, from `poll_shutdown`,
/// since that's the only point a splice half is guaranteed to reach.
fn finish_compression(compress: &mut Compress, write_out: &mut Vec<u8>) -> io::Result<()> {
    let mut out_buf = [0u8; 8192];
    loop {
        let before_out = compress.total_out();
        let status = compress
            .compress(&[], &mut out_buf, FlushCompress::Finish)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;
        write_out.extend_from_slice(&out_buf[..(compress.total_out() - before_out) as usize]);
        if status == Status::StreamEnd {
            return Ok(());
        }
    }
}

fn decompress_chunk(decompress: &mut Decompress, decompress_out: &mut VecDeque<u8>, input: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    let mut out_buf = [0u8; 8192];
    while offset < input.len() {
        let before_in = decompress.total_in();
        let before_out = decompress.total_out();
        let status = decompress
            .decompress(&input[offset..], &mut out_buf, FlushDecompress::None)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;
        let consumed = (decompress.total_in() - before_in) as usize;
        let produced = (decompress.total_out() - before_out) as usize;
        decompress_out.extend(out_buf[..produced].iter().copied());
        offset += consumed;
        if consumed == 0 && produced == 0 {
            if status == Status::StreamEnd {
                break;
            }
            return Err(io::Error::new(io::ErrorKind::InvalidData, "decompressor made no progress"));
        }
    }
    Ok(())
}

pin_project! {
    /// Raw-deflate compresses everything written and decompresses
    /// everything read. Each `poll_write` call ends on a sync flush point
    /// so the peer's decompressor never has to wait for the stream to end
    /// before it can make progress.
    pub struct DeflateStream<T> {
        #[pin]
        inner: T,
        compress: Compress,
        decompress: Decompress,
        write_out: Vec<u8>,
        write_out_pos: usize,
        finished_compression: bool,
        decompress_out: VecDeque<u8>,
    }
}

impl<T> DeflateStream<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            compress: Compress::new(Compression::default(), false),
            decompress: Decompress::new(false),
            write_out: Vec::new(),
            write_out_pos: 0,
            finished_compression: false,
            decompress_out: VecDeque::new(),
        }
    }
}

impl<T: AsyncRead> AsyncRead for DeflateStream<T> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        loop {
            if !this.decompress_out.is_empty() {
                let n = std::cmp::min(buf.remaining(), this.decompress_out.len());
                let chunk: Vec<u8> = this.decompress_out.drain(..n).collect();
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            let mut scratch = [0u8; 8192];
            let mut scratch_buf = ReadBuf::new(&mut scratch);
            match this.inner.as_mut().poll_read(cx, &mut scratch_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = scratch_buf.filled();
                    if filled.is_empty() {
                        return Poll::Ready(Ok(()));
                    }
                    if let Err(error) = decompress_chunk(this.decompress, this.decompress_out, filled) {
                        return Poll::Ready(Err(error));
                    }
                }
                Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T: AsyncWrite> AsyncWrite for DeflateStream<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        let mut this = self.project();
        match drain_write_out(this.inner.as_mut(), cx, this.write_out, this.write_out_pos) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
            Poll::Pending => return Poll::Pending,
        }
        if let Err(error) = compress_write(this.compress, this.write_out, data) {
            return Poll::Ready(Err(error));
        }
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        match drain_write_out(this.inner.as_mut(), cx, this.write_out, this.write_out_pos) {
            Poll::Ready(Ok(())) => {}
            other => return other,
        }
        this.inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        match drain_write_out(this.inner.as_mut(), cx, this.write_out, this.write_out_pos) {
            Poll::Ready(Ok(())) => {}
            other => return other,
        }
        if !*this.finished_compression {
            if let Err(error) = finish_compression(this.compress, this.write_out) {
                return Poll::Ready(Err(error));
            }
            *this.finished_compression = true;
            match drain_write_out(this.inner.as_mut(), cx, this.write_out, this.write_out_pos) {
                Poll::Ready(Ok(())) => {}
                other => return other,
            }
        }
        this.inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn round_trips_compressed_bytes() {
        let (a, b) = duplex(4096);
        let mut writer = DeflateStream::new(a);
        let mut reader = DeflateStream::new(b);

        let payload = b"the quick brown fox jumps over the lazy dog".repeat(4);
        writer.write_all(&payload).await.unwrap();
        writer.flush().await.unwrap();

        let mut received = vec![0u8; payload.len()];
        reader.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);
    }
}
