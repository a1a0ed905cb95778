//! Newline-framed text codec
//!
//! The client wire protocol is newline-terminated UTF-8 lines, both for the
//! handshake and for chat payloads. `LineReader` and `LineWriter` wrap the
//! two halves of a connection with buffering, a hard length cap on inbound
//! lines, and explicit flush control for the drain path.

use tokio::io::{ AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter };

use crate::constants::MAX_LINE_LENGTH;
use crate::error::{ ChatError, Result };

/// Buffered line reader with a length cap.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap a read half
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::with_capacity(MAX_LINE_LENGTH),
        }
    }

    /// Read one `\n`-terminated line, stripped of the newline and one
    /// trailing `\r`.
    ///
    /// Returns `Ok(None)` on a clean EOF (including EOF in the middle of an
    /// unterminated line, which is discarded). A line longer than
    /// [`MAX_LINE_LENGTH`] is an error; the connection is not recoverable
    /// after it because framing is lost.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();

        // +1 so the terminator of a maximum-length line still fits
        let limit = (MAX_LINE_LENGTH + 1) as u64;
        let n = (&mut self.inner).take(limit).read_until(b'\n', &mut self.buf).await?;

        if n == 0 {
            return Ok(None);
        }

        match self.buf.last() {
            Some(b'\n') => {
                self.buf.pop();
            }
            // No terminator inside the cap: either the peer sent an
            // oversized line or hung up mid-line.
            _ if n as u64 == limit => {
                return Err(ChatError::LineTooLong(MAX_LINE_LENGTH));
            }
            _ => {
                return Ok(None);
            }
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Buffered line writer with explicit flush.
pub struct LineWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Wrap a write half
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Append one payload followed by `\n` to the write buffer
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        Ok(())
    }

    /// Flush buffered lines to the socket
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_lines() {
        let (client, server) = tokio::io::duplex(4096);
        let mut reader = LineReader::new(server);

        let mut client = client;
        client.write_all(b"first\nsecond\r\n").await.unwrap();
        drop(client);

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_discarded() {
        let (client, server) = tokio::io::duplex(4096);
        let mut reader = LineReader::new(server);

        let mut client = client;
        client.write_all(b"done\npartial").await.unwrap();
        drop(client);

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("done"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected() {
        let (client, server) = tokio::io::duplex(8192);
        let mut reader = LineReader::new(server);

        let mut client = client;
        let line = vec![b'x'; MAX_LINE_LENGTH + 1];
        client.write_all(&line).await.unwrap();
        client.write_all(b"\n").await.unwrap();
        drop(client);

        assert!(matches!(reader.read_line().await, Err(ChatError::LineTooLong(_))));
    }

    #[tokio::test]
    async fn test_max_length_line_is_accepted() {
        let (client, server) = tokio::io::duplex(8192);
        let mut reader = LineReader::new(server);

        let mut client = client;
        let line = vec![b'y'; MAX_LINE_LENGTH];
        client.write_all(&line).await.unwrap();
        client.write_all(b"\n").await.unwrap();
        drop(client);

        let got = reader.read_line().await.unwrap().unwrap();
        assert_eq!(got.len(), MAX_LINE_LENGTH);
    }

    #[tokio::test]
    async fn test_writer_appends_newline_and_flushes() {
        let (server, client) = tokio::io::duplex(4096);
        let mut writer = LineWriter::new(server);
        let mut reader = BufReader::new(client);

        writer.write_line("hello").await.unwrap();
        writer.write_line("world").await.unwrap();
        writer.flush().await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "hello\n");
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "world\n");
    }
}
