use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A stream that replays bytes already taken off `inner` before reading
/// from it again. Writes go straight to `inner`.
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: BytesMut,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(inner: S, prefix: BytesMut) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.prefix.is_empty() && buf.remaining() > 0 {
            let len = cmp::min(this.prefix.len(), buf.remaining());
            let chunk = this.prefix.split_to(len);
            buf.put_slice(&chunk);

            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn replays_prefix_then_reads_inner() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"world").await.unwrap();
        drop(client);

        let mut rewind = Rewind::new(server, BytesMut::from(&b"hello "[..]));
        let mut read = Vec::new();
        rewind.read_to_end(&mut read).await.unwrap();

        assert_eq!(read, b"hello world");
    }

    #[tokio::test]
    async fn small_reads_drain_prefix_in_order() {
        let (_client, server) = tokio::io::duplex(64);
        let mut rewind = Rewind::new(server, BytesMut::from(&b"abcde"[..]));

        let mut chunk = [0u8; 2];
        rewind.read_exact(&mut chunk).await.unwrap();
        assert_eq!(&chunk, b"ab");
        assert_eq!(&rewind.prefix[..], b"cde");

        let mut rest = [0u8; 3];
        rewind.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"cde");
        assert!(rewind.prefix.is_empty());
    }

    #[tokio::test]
    async fn empty_prefix_reads_inner() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut rewind = Rewind::new(server, BytesMut::new());

        client.write_all(b"ping").await.unwrap();
        let mut read = [0u8; 4];
        rewind.read_exact(&mut read).await.unwrap();
        assert_eq!(&read, b"ping");

        rewind.write_all(b"pong").await.unwrap();
        client.read_exact(&mut read).await.unwrap();
        assert_eq!(&read, b"pong");
    }
}
