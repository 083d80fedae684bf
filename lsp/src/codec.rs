//! Framing codec for LSP traffic: `Content-Length: N\r\n\r\n{json}`.
//!
//! [`FrameReader`] and [`FrameWriter`] know nothing about JSON-RPC
//! semantics; they turn a byte stream into a sequence of JSON values and
//! back. Clean EOF between frames is reported as `Ok(None)`; every other
//! irregularity is [`Error::Framing`].

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::Error;

/// Upper bound on a single frame body (16 MiB). clangd can produce large
/// workspace/symbol results, but anything beyond this is a broken stream.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads framed JSON-RPC messages from an async byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame, or `Ok(None)` if the stream ended cleanly
    /// between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, Error> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length == 0 {
            // JSON cannot be empty, so a zero-length body is never valid.
            return Err(Error::Framing("zero-length frame body".into()));
        }
        if content_length > MAX_FRAME_BYTES {
            return Err(Error::Framing(format!(
                "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|e| Error::Framing(format!("truncated frame body: {e}")))?;

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| Error::Framing(format!("invalid JSON in frame body: {e}")))
    }

    /// Consume the header block and return the `Content-Length` value.
    ///
    /// `Ok(None)` means EOF before any header byte; EOF after a partial
    /// header block is a framing error.
    async fn read_headers(&mut self) -> Result<Option<usize>, Error> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut mid_block = false;

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Framing(format!("reading header line: {e}")))?;

            if n == 0 {
                if mid_block {
                    return Err(Error::Framing("EOF inside header block".into()));
                }
                return Ok(None);
            }
            mid_block = true;

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }

            let Some((name, value)) = trimmed.split_once(':') else {
                return Err(Error::Framing(format!("header without colon: {trimmed:?}")));
            };
            // Header names are case-insensitive; Content-Type and anything
            // else we do not recognise is accepted and ignored.
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len = value.trim().parse::<usize>().map_err(|_| {
                    Error::Framing(format!("invalid Content-Length value: {:?}", value.trim()))
                })?;
                content_length = Some(len);
            }
        }

        content_length
            .map(Some)
            .ok_or_else(|| Error::Framing("missing Content-Length header".into()))
    }
}

/// Writes framed JSON-RPC messages to an async byte stream.
///
/// Each `write_frame` emits header and body back-to-back and flushes, so a
/// frame is on the wire before the call returns. Callers serialise frame
/// order; the writer itself holds no queue.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), Error> {
        let body = serde_json::to_vec(msg)
            .map_err(|e| Error::Protocol(format!("serializing frame: {e}")))?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
