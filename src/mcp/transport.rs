//! Stdio transport
//!
//! Newline-delimited JSON-RPC 2.0 framing used on both sides of the proxy:
//! one message per line, LF or CRLF delimited, empty lines skipped on input,
//! writes flushed per message.

use super::protocol::JsonRpcMessage;
use crate::errors::{Result, SstartError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Reading half of a message stream
pub struct MessageReader<R> {
    lines: tokio::io::Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: BufReader::new(reader).lines() }
    }

    /// Read the next message. Returns `None` on EOF. Empty lines are
    /// skipped; a line that is not valid JSON-RPC is an error but leaves the
    /// stream readable.
    pub async fn read(&mut self) -> Result<Option<JsonRpcMessage>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| SstartError::io(e, "failed to read message line"))?;

            let Some(line) = line else {
                return Ok(None);
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: JsonRpcMessage = serde_json::from_str(trimmed)?;
            return Ok(Some(message));
        }
    }
}

/// Writing half of a message stream
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one message as a single line followed by LF, flushed
    pub async fn write(&mut self, message: &JsonRpcMessage) -> Result<()> {
        let mut data = serde_json::to_vec(message)?;
        data.push(b'\n');
        self.writer
            .write_all(&data)
            .await
            .map_err(|e| SstartError::io(e, "failed to write message"))?;
        self.writer
            .flush()
            .await
            .map_err(|e| SstartError::io(e, "failed to flush message"))?;
        Ok(())
    }
}
