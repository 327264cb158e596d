//! Frame encoding and the streaming frame reader.
//!
//! Encoding is a header followed immediately by the payload bytes; there
//! are no message boundary markers beyond the declared length. Decoding
//! must tolerate partial and coalesced reads: a header and the start of
//! its body routinely arrive in one read, and a declared length routinely
//! spans many reads.

use crate::error::{Error, Result};
use crate::{DEFAULT_BUFFER_SIZE, MAX_LINE_READ};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Encode a length-prefixed JSON envelope: `TAG:<len>:` + payload.
pub fn envelope(tag: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:{}:", tag, payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Encode a binary block header: `TAG:<len>`, no trailing colon. The raw
/// payload bytes follow in separate chunked writes.
pub fn block_header(tag: &str, len: usize) -> Vec<u8> {
    format!("{}:{}", tag, len).into_bytes()
}

/// Streaming frame reader over a byte stream.
///
/// Keeps a pending buffer of bytes that arrived past the end of the
/// previous frame, so callers can treat "one frame" and "exactly N
/// bytes" as primitives regardless of how the transport coalesced them.
pub struct FrameReader<R> {
    inner: R,
    buffer_size: usize,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream with the default chunk size.
    pub fn new(inner: R) -> Self {
        Self::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    /// Wrap a stream with an explicit chunk size for length-prefixed
    /// payload reads.
    pub fn with_buffer_size(inner: R, buffer_size: usize) -> Self {
        Self {
            inner,
            buffer_size,
            pending: Vec::new(),
        }
    }

    /// Return bytes to the front of the reader, to be consumed by the
    /// next read. Used when a parsed header turns out to be a chat line
    /// after all, or when a frame carried the start of a following one.
    pub fn push_back(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut buf = bytes.to_vec();
        buf.extend_from_slice(&self.pending);
        self.pending = buf;
    }

    /// Read one line frame: whatever the next read returns, capped at
    /// [`MAX_LINE_READ`]. Pending bytes are served first.
    ///
    /// Returns `Error::Connection` when the peer has closed the stream.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        if !self.pending.is_empty() {
            let take = self.pending.len().min(MAX_LINE_READ);
            return Ok(self.pending.drain(..take).collect());
        }
        let mut buf = vec![0u8; MAX_LINE_READ];
        let n = self.inner.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Connection("peer closed the stream".into()));
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Read exactly `len` bytes, draining pending bytes first and then
    /// looping bounded-chunk reads until the total is satisfied.
    ///
    /// A zero-length read mid-frame aborts with `Error::Transfer` rather
    /// than looping forever.
    pub async fn read_exact_frame(&mut self, len: usize) -> Result<Vec<u8>> {
        // `len` may come off the wire; do not pre-allocate it.
        let mut out = Vec::with_capacity(len.min(self.buffer_size));
        let take = self.pending.len().min(len);
        out.extend(self.pending.drain(..take));

        let mut buf = vec![0u8; self.buffer_size];
        while out.len() < len {
            let want = (len - out.len()).min(self.buffer_size);
            let n = self.inner.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(Error::Transfer(format!(
                    "stream closed after {} of {} bytes",
                    out.len(),
                    len
                )));
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Configured chunk size for length-prefixed payload reads.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
