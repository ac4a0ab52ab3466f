//! Buffered line/payload framing shared by the server and client roles.

use std::borrow::Cow;
use std::io::{self, Write};
use std::time::Duration;

use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use dapps_shared::constants::MAX_LINE_LEN;
use dapps_shared::PayloadFormat;

use crate::error::DeliveryError;

/// A byte stream read as `\n`-terminated control lines interleaved with
/// length-delimited payloads.
pub struct LineTransport<S> {
    stream: BufReader<S>,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read one line without its terminator.  `None` means the peer closed
    /// the stream before sending anything.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let limit = MAX_LINE_LEN as u64 + 1;
        (&mut self.stream)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await?;

        if buf.is_empty() {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        } else if buf.len() > MAX_LINE_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Read a payload announced as `len` decompressed bytes.
    ///
    /// `idle` bounds each wait for more input, not the whole transfer: a slow
    /// link that keeps delivering bytes is never cut off.  Expiry surfaces as
    /// [`io::ErrorKind::TimedOut`].
    pub async fn read_payload(
        &mut self,
        len: usize,
        format: PayloadFormat,
        idle: Option<Duration>,
    ) -> io::Result<Vec<u8>> {
        match format {
            PayloadFormat::Plain => self.read_plain(len, idle).await,
            PayloadFormat::Deflate => self.read_deflate(len, idle).await,
        }
    }

    /// Next chunk of buffered input, waiting at most `idle` for it to arrive.
    async fn fill(&mut self, idle: Option<Duration>) -> io::Result<&[u8]> {
        match idle {
            Some(limit) => tokio::time::timeout(limit, self.stream.fill_buf())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no input within idle limit"))?,
            None => self.stream.fill_buf().await,
        }
    }

    async fn read_plain(&mut self, len: usize, idle: Option<Duration>) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let input = self.fill(idle).await?;
            if input.is_empty() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "payload truncated"));
            }
            let take = input.len().min(len - out.len());
            out.extend_from_slice(&input[..take]);
            self.stream.consume(take);
        }
        Ok(out)
    }

    /// Inflate a raw deflate stream that must expand to exactly `len` bytes.
    ///
    /// Only the compressed stream is consumed; anything after its final block
    /// stays buffered for the next line read.
    async fn read_deflate(&mut self, len: usize, idle: Option<Duration>) -> io::Result<Vec<u8>> {
        let mut decoder = Decompress::new(false);
        // one spare byte so an oversized stream is detected instead of truncated
        let mut out = Vec::with_capacity(len + 1);

        loop {
            let (consumed, produced, status) = {
                let input = self.fill(idle).await?;
                if input.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "compressed payload truncated",
                    ));
                }
                let in_before = decoder.total_in();
                let out_before = out.len();
                let status = decoder
                    .decompress_vec(input, &mut out, FlushDecompress::None)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                (
                    (decoder.total_in() - in_before) as usize,
                    out.len() - out_before,
                    status,
                )
            };
            self.stream.consume(consumed);

            if out.len() > len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "compressed payload longer than announced",
                ));
            }
            match status {
                Status::StreamEnd => break,
                Status::BufError if consumed == 0 && produced == 0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "compressed payload stalled",
                    ));
                }
                _ => {}
            }
        }

        if out.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("compressed payload expanded to {} bytes, expected {len}", out.len()),
            ));
        }
        Ok(out)
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        self.write_raw(&framed).await
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await
    }

    /// Read raw bytes until the text seen so far satisfies `done`.
    ///
    /// Bytes are consumed one at a time so nothing past the match is lost.
    /// Only the most recent `MAX_LINE_LEN` bytes are kept for matching.
    pub async fn read_until_match(
        &mut self,
        done: impl Fn(&str) -> bool,
    ) -> io::Result<Option<String>> {
        let mut seen: Vec<u8> = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            if self.stream.read(&mut byte).await? == 0 {
                return Ok(None);
            }
            seen.push(byte[0]);
            if seen.len() > MAX_LINE_LEN {
                seen.drain(..seen.len() - MAX_LINE_LEN);
            }

            let text = String::from_utf8_lossy(&seen);
            if done(&text) {
                return Ok(Some(text.into_owned()));
            }
        }
    }

    /// [`read_until_match`](Self::read_until_match) bounded by `timeout`.
    pub async fn expect(
        &mut self,
        timeout: Duration,
        done: impl Fn(&str) -> bool,
    ) -> Result<String, DeliveryError> {
        match tokio::time::timeout(timeout, self.read_until_match(done)).await {
            Err(_) => Err(DeliveryError::Timeout(timeout)),
            Ok(Err(e)) => Err(DeliveryError::Transport(e)),
            Ok(Ok(None)) => Err(DeliveryError::Closed),
            Ok(Ok(Some(text))) => Ok(text),
        }
    }

    /// Next line bounded by `timeout`.
    pub async fn read_line_within(&mut self, timeout: Duration) -> Result<String, DeliveryError> {
        match tokio::time::timeout(timeout, self.read_line()).await {
            Err(_) => Err(DeliveryError::Timeout(timeout)),
            Ok(Err(e)) => Err(DeliveryError::Transport(e)),
            Ok(Ok(None)) => Err(DeliveryError::Closed),
            Ok(Ok(Some(line))) => Ok(line),
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.get_mut().shutdown().await
    }
}

/// Raw (headerless) deflate encoding of `payload`.
pub fn deflate(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

/// Choose the wire format for an outbound payload.
///
/// Payloads of at least `threshold` bytes are deflated, but only when that
/// actually makes them smaller.
pub fn encode_payload(payload: &[u8], threshold: Option<usize>) -> io::Result<(PayloadFormat, Cow<'_, [u8]>)> {
    match threshold {
        Some(min) if payload.len() >= min => {
            let compressed = deflate(payload)?;
            if compressed.len() < payload.len() {
                Ok((PayloadFormat::Deflate, Cow::Owned(compressed)))
            } else {
                Ok((PayloadFormat::Plain, Cow::Borrowed(payload)))
            }
        }
        _ => Ok((PayloadFormat::Plain, Cow::Borrowed(payload))),
    }
}
