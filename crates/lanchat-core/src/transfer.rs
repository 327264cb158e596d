//! Transfer pipeline: chunked send/receive of gzip-compressed file
//! bodies with progress accounting. Used by both the upload and the
//! download paths inside a session.

use crate::error::{Error, Result};
use crate::hub::SharedWriter;
use crate::protocol::frame::{self, FrameReader};
use crate::protocol::{DOWNLOAD_COMPLETE, FILE_DATA_START, FILE_INFO};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

/// Metadata sent ahead of a download body in the `FILE_INFO` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadInfo {
    /// Logical filename.
    pub filename: String,
    /// Original size in bytes.
    pub size: u64,
    /// Compressed body size in bytes, as it will appear on the wire.
    pub compressed_size: u64,
}

/// Gzip-compress a file body.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::Transfer(format!("compression failed: {}", e)))
}

/// Gzip-decompress a received body.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::Transfer(format!("decompression failed: {}", e)))?;
    Ok(out)
}

/// Upload receive path: accumulate exactly `declared_len` compressed
/// bytes in bounded chunks. The caller pushes any bytes that arrived
/// coalesced with the upload header back into the reader first.
pub async fn receive_body<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    declared_len: usize,
) -> Result<Vec<u8>> {
    let chunk_size = reader.buffer_size();
    // The declared length comes off the wire; allocation grows with
    // the bytes actually received, never with the declaration.
    let mut body = Vec::with_capacity(declared_len.min(chunk_size));
    while body.len() < declared_len {
        let want = (declared_len - body.len()).min(chunk_size);
        let chunk = reader.read_exact_frame(want).await?;
        body.extend_from_slice(&chunk);
        debug!(
            received = body.len(),
            total = declared_len,
            percent = body.len() * 100 / declared_len.max(1),
            "Upload progress"
        );
    }
    Ok(body)
}

/// Download send path: `FILE_INFO` envelope, wait for one
/// acknowledgement frame (content ignored, wait unbounded), then
/// `FILE_DATA_START:<clen>` followed by the compressed bytes in bounded
/// chunks and the literal `DOWNLOAD_COMPLETE`.
pub async fn send_body<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    writer: &SharedWriter,
    info: &DownloadInfo,
    compressed: &[u8],
) -> Result<()> {
    let json = serde_json::to_vec(info)?;
    {
        let mut w = writer.lock().await;
        w.write_all(&frame::envelope(FILE_INFO, &json)).await?;
    }

    // Any frame counts as "ready"; a stalled client blocks only this
    // session.
    let ack = reader.read_frame().await?;
    debug!(ack_len = ack.len(), file = %info.filename, "Download acknowledged");

    let chunk_size = reader.buffer_size();
    let mut w = writer.lock().await;
    w.write_all(&frame::block_header(FILE_DATA_START, compressed.len()))
        .await?;
    let mut sent = 0;
    for chunk in compressed.chunks(chunk_size) {
        w.write_all(chunk).await?;
        sent += chunk.len();
        debug!(
            sent,
            total = compressed.len(),
            percent = sent * 100 / compressed.len().max(1),
            "Download progress"
        );
    }
    w.write_all(DOWNLOAD_COMPLETE.as_bytes()).await?;
    Ok(())
}
