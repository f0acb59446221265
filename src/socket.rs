//! Buffered, timeout-bounded wrapper over an async byte stream.
//!
//! Grounded on `original_source/utils/buffered_socket.py::BufferedSocket`
//! for the read/read_line shape; ported to `tokio::io::AsyncRead` +
//! `AsyncWrite` so it works over both a plain `TcpStream` and a
//! `tokio_rustls` TLS stream.

use crate::buffer::ByteBuffer;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Raised when a read exceeds its configured timeout, or a line exceeds
/// its length limit without a terminating `\n`.
#[derive(Debug)]
pub enum SocketError {
    Timeout,
    LineTooLong,
    Io(std::io::Error),
}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        SocketError::Io(e)
    }
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketError::Timeout => write!(f, "read timed out"),
            SocketError::LineTooLong => write!(f, "line exceeded limit before newline"),
            SocketError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SocketError {}

/// Wraps an underlying connection with a [`ByteBuffer`] and a per-call
/// timeout. All blocking I/O for a connection goes through here.
pub struct BufferedSocket<S> {
    inner: S,
    buffer: ByteBuffer,
    pub timeout: Duration,
}

impl<S> BufferedSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: ByteBuffer::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Returns up to `n` bytes: from the buffer if non-empty, otherwise a
    /// single read of up to `n` bytes from the underlying stream.
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>, SocketError> {
        if !self.buffer.is_empty() {
            return Ok(self.buffer.pop(n));
        }
        let mut tmp = vec![0u8; n];
        let read = tokio::time::timeout(self.timeout, self.inner.read(&mut tmp))
            .await
            .map_err(|_| SocketError::Timeout)??;
        tmp.truncate(read);
        Ok(tmp)
    }

    /// Returns a line (without the trailing `\r\n`/`\n`), reading from the
    /// socket in `max(buffered_len, 1024)`-byte increments until `\n` is
    /// found or `limit` bytes have been consumed without one.
    pub async fn read_line(&mut self, limit: usize) -> Result<Vec<u8>, SocketError> {
        let mut line = self.buffer.pop_line();
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(line);
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut consumed = line.len();
        loop {
            if consumed >= limit {
                return Err(SocketError::LineTooLong);
            }
            let read_size = self.buffer.len().max(1024);
            let mut tmp = vec![0u8; read_size];
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(SocketError::Timeout)?;
            let n = tokio::time::timeout(remaining, self.inner.read(&mut tmp))
                .await
                .map_err(|_| SocketError::Timeout)??;
            if n == 0 {
                // Peer closed mid-line; treat whatever was read as the line.
                return Ok(line);
            }
            tmp.truncate(n);
            consumed += n;

            if let Some(pos) = memchr::memchr(b'\n', &tmp) {
                line.extend_from_slice(&tmp[..pos]);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.buffer.push(&tmp[pos + 1..]);
                return Ok(line);
            }
            line.extend_from_slice(&tmp);
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), SocketError> {
        self.inner.write_all(bytes).await?;
        Ok(())
    }

    pub async fn send_with_timeout(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), SocketError> {
        tokio::time::timeout(timeout, self.inner.write_all(bytes))
            .await
            .map_err(|_| SocketError::Timeout)??;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), SocketError> {
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn read_line_strips_crlf_and_keeps_remainder_buffered() {
        let (client, mut server) = duplex(64);
        server.write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap();
        let mut sock = BufferedSocket::new(client);
        let line = sock.read_line(1024).await.unwrap();
        assert_eq!(line, b"GET / HTTP/1.1");
        let line2 = sock.read_line(1024).await.unwrap();
        assert_eq!(line2, b"Host: h");
    }

    #[tokio::test]
    async fn read_line_too_long_errors() {
        let (client, mut server) = duplex(1024);
        server.write_all(&vec![b'a'; 100]).await.unwrap();
        let mut sock = BufferedSocket::new(client);
        let result = sock.read_line(10).await;
        assert!(matches!(result, Err(SocketError::LineTooLong)));
    }

    #[tokio::test]
    async fn read_returns_buffered_bytes_before_socket_read() {
        let (client, mut server) = duplex(64);
        server.write_all(b"hello\nworld").await.unwrap();
        let mut sock = BufferedSocket::new(client);
        let _ = sock.read_line(1024).await.unwrap();
        let rest = sock.read(5).await.unwrap();
        assert_eq!(rest, b"world");
    }
}
