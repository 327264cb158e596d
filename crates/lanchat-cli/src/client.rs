//! Client-side protocol loop.
//!
//! Mirrors the server's framing: the handshake prompts (`NICK`, `PASS`)
//! and every later server message arrive as frames on one stream, and a
//! single frame may carry several coalesced messages, so every token is
//! matched by prefix and leftovers are pushed back into the reader.

use crate::Args;
use anyhow::{anyhow, bail, Context, Result};
use lanchat_core::protocol::{
    self, FrameReader, AUTH_FAILED, AUTH_SUCCESS, DOWNLOAD_COMPLETE, DOWNLOAD_ERROR,
    FILE_DATA_START, FILE_INFO, FILE_LIST, FILE_NOT_FOUND, NICK, PASS, UPLOAD_ERROR,
    UPLOAD_SUCCESS,
};
use lanchat_core::store::FileRecord;
use lanchat_core::transfer::{compress, decompress, DownloadInfo};
use lanchat_core::DEFAULT_BUFFER_SIZE;
use serde::Deserialize;
use std::io::Write as _;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Refuse to upload files larger than this before compression.
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

#[derive(Deserialize)]
struct FileListMessage {
    files: Vec<FileRecord>,
}

struct Client {
    args: Args,
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    files: Vec<FileRecord>,
    save_path: Option<PathBuf>,
    current_download: Option<DownloadInfo>,
}

/// Connect and run until the user quits or the server goes away.
pub async fn run(args: Args) -> Result<()> {
    let stream = TcpStream::connect(&args.server)
        .await
        .with_context(|| format!("cannot connect to {}", args.server))?;
    let (read_half, write_half) = stream.into_split();

    let mut client = Client {
        args,
        reader: FrameReader::new(read_half),
        writer: write_half,
        files: Vec::new(),
        save_path: None,
        current_download: None,
    };
    client.event_loop().await
}

impl Client {
    async fn event_loop(&mut self) -> Result<()> {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                frame = self.reader.read_frame() => {
                    let frame = frame.map_err(|e| anyhow!("disconnected from server: {}", e))?;
                    self.handle_frame(frame).await?;
                }
                line = stdin.next_line() => {
                    let Some(line) = line? else { return Ok(()) };
                    if !self.handle_input(line.trim()).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Dispatch one inbound frame, pushing back any coalesced trailing
    /// bytes for the next pass.
    async fn handle_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        // The handshake prompts arrive alone, before anything else can
        // coalesce with them; exact matches avoid eating chat lines
        // that merely start with NICK or PASS.
        if frame == NICK.as_bytes() {
            let nickname = self.args.nickname.clone();
            self.writer.write_all(nickname.as_bytes()).await?;
            return Ok(());
        }
        if frame == PASS.as_bytes() {
            let password = self.args.password.clone();
            self.writer
                .write_all(format!("{:04}", password.len()).as_bytes())
                .await?;
            if !password.is_empty() {
                self.writer.write_all(password.as_bytes()).await?;
            }
            return Ok(());
        }
        if self.take_token(&frame, AUTH_SUCCESS) {
            println!(
                "Connected to {} as {}",
                self.args.server, self.args.nickname
            );
            println!("Commands: /files, /upload <path>, /download <n|name> [dest], /quit");
            return Ok(());
        }
        if self.take_token(&frame, AUTH_FAILED) {
            bail!("server rejected the password");
        }
        if let Some((len, offset)) = parse_envelope_header(&frame, FILE_LIST) {
            let body = self.collect_body(&frame[offset..], len).await?;
            self.show_file_list(&body)?;
            return Ok(());
        }
        if let Some((len, offset)) = parse_envelope_header(&frame, FILE_INFO) {
            let body = self.collect_body(&frame[offset..], len).await?;
            let info: DownloadInfo =
                serde_json::from_slice(&body).context("bad FILE_INFO payload")?;
            println!(
                "Downloading {} ({})...",
                info.filename,
                format_file_size(info.compressed_size)
            );
            self.current_download = Some(info);
            self.writer.write_all(b"READY").await?;
            return Ok(());
        }
        if let Some((len, offset)) = parse_block_header(&frame, FILE_DATA_START) {
            let body = self.collect_body(&frame[offset..], len).await?;
            self.finish_download(&body)?;
            return Ok(());
        }
        for token in [
            UPLOAD_SUCCESS,
            UPLOAD_ERROR,
            DOWNLOAD_COMPLETE,
            DOWNLOAD_ERROR,
            FILE_NOT_FOUND,
        ] {
            if self.take_token(&frame, token) {
                match token {
                    UPLOAD_SUCCESS => println!("Upload complete."),
                    UPLOAD_ERROR => println!("Upload failed."),
                    DOWNLOAD_COMPLETE => {}
                    DOWNLOAD_ERROR => println!("Download failed."),
                    FILE_NOT_FOUND => println!("That file no longer exists on the server."),
                    _ => {}
                }
                return Ok(());
            }
        }

        // Anything else is chat.
        let text = String::from_utf8_lossy(&frame);
        println!("{}", text.trim_end());
        Ok(())
    }

    /// Match a literal token at the start of a frame; trailing bytes go
    /// back into the reader.
    fn take_token(&mut self, frame: &[u8], token: &str) -> bool {
        if !frame.starts_with(token.as_bytes()) {
            return false;
        }
        self.reader.push_back(&frame[token.len()..]);
        true
    }

    /// Accumulate a declared-length body whose first bytes may have
    /// arrived coalesced with its header.
    async fn collect_body(&mut self, initial: &[u8], len: usize) -> Result<Vec<u8>> {
        if initial.len() >= len {
            self.reader.push_back(&initial[len..]);
            return Ok(initial[..len].to_vec());
        }
        let mut body = initial.to_vec();
        let rest = self.reader.read_exact_frame(len - body.len()).await?;
        body.extend_from_slice(&rest);
        Ok(body)
    }

    fn show_file_list(&mut self, body: &[u8]) -> Result<()> {
        let msg: FileListMessage = serde_json::from_slice(body).context("bad FILE_LIST payload")?;
        self.files = msg.files;
        if self.files.is_empty() {
            println!("No files on the server.");
            return Ok(());
        }
        println!("Files on the server ({}):", self.files.len());
        for (i, f) in self.files.iter().enumerate() {
            println!(
                "  [{}] {} - {} ({}) [{}]",
                i + 1,
                f.filename,
                f.uploader,
                f.upload_time,
                format_file_size(f.size)
            );
        }
        Ok(())
    }

    fn finish_download(&mut self, compressed: &[u8]) -> Result<()> {
        let info = match self.current_download.take() {
            Some(info) => info,
            None => {
                debug!("file data without a pending download, ignoring");
                return Ok(());
            }
        };
        let data = decompress(compressed).context("decompress download")?;
        let path = self
            .save_path
            .take()
            .unwrap_or_else(|| self.args.download_dir.join(&info.filename));
        std::fs::write(&path, &data)
            .with_context(|| format!("cannot write {}", path.display()))?;
        let ratio = ratio_percent(info.size, info.compressed_size);
        println!(
            "Saved {} ({} raw, {} compressed, {:.1}% ratio)",
            path.display(),
            format_file_size(info.size),
            format_file_size(info.compressed_size),
            ratio
        );
        Ok(())
    }

    /// One line of user input. Returns false to quit.
    async fn handle_input(&mut self, line: &str) -> Result<bool> {
        if line.is_empty() {
            return Ok(true);
        }
        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.split_whitespace();
            match parts.next() {
                Some("files") | Some("list") => {
                    self.writer
                        .write_all(protocol::GET_FILE_LIST.as_bytes())
                        .await?;
                }
                Some("upload") => match parts.next() {
                    Some(path) => self.upload(PathBuf::from(path)).await?,
                    None => println!("usage: /upload <path>"),
                },
                Some("download") => match parts.next() {
                    Some(which) => {
                        let dest = parts.next().map(PathBuf::from);
                        self.download(which, dest).await?;
                    }
                    None => println!("usage: /download <n|stored_name> [dest]"),
                },
                Some("quit") | Some("exit") => return Ok(false),
                _ => println!("unknown command: /{}", rest),
            }
            return Ok(true);
        }

        let message = format!("{}: {}", self.args.nickname, line);
        self.writer.write_all(message.as_bytes()).await?;
        Ok(true)
    }

    async fn upload(&mut self, path: PathBuf) -> Result<()> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("not a file path: {}", path.display()))?
            .to_string();
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        if data.len() as u64 > MAX_FILE_SIZE {
            println!(
                "{} is {}, over the {} limit",
                filename,
                format_file_size(data.len() as u64),
                format_file_size(MAX_FILE_SIZE)
            );
            return Ok(());
        }

        let compressed = compress(&data).map_err(|e| anyhow!(e))?;
        let ratio = ratio_percent(data.len() as u64, compressed.len() as u64);
        self.writer
            .write_all(format!("{}{}:{}:", protocol::UPLOAD_FILE, filename, compressed.len()).as_bytes())
            .await?;

        let mut sent = 0;
        for chunk in compressed.chunks(DEFAULT_BUFFER_SIZE) {
            self.writer.write_all(chunk).await?;
            sent += chunk.len();
            print!("\rUploading: {}%", sent * 100 / compressed.len().max(1));
            let _ = std::io::stdout().flush();
        }
        println!(
            "\nSent {} ({} raw, {} compressed, {:.1}% ratio), waiting for the server...",
            filename,
            format_file_size(data.len() as u64),
            format_file_size(compressed.len() as u64),
            ratio
        );
        Ok(())
    }

    async fn download(&mut self, which: &str, dest: Option<PathBuf>) -> Result<()> {
        let stored_name = match which.parse::<usize>() {
            Ok(n) if n >= 1 && n <= self.files.len() => self.files[n - 1].unique_filename.clone(),
            Ok(_) => {
                println!("no such entry; run /files first");
                return Ok(());
            }
            Err(_) => which.to_string(),
        };
        self.save_path = dest;
        self.writer
            .write_all(format!("{}{}", protocol::DOWNLOAD_FILE, stored_name).as_bytes())
            .await?;
        Ok(())
    }
}

/// Parse `TAG:<len>:` at the start of a frame. Returns the declared
/// length and the offset of the first body byte.
fn parse_envelope_header(frame: &[u8], tag: &str) -> Option<(usize, usize)> {
    let prefix = format!("{}:", tag);
    let rest = frame.strip_prefix(prefix.as_bytes())?;
    let digits_end = rest.iter().position(|b| !b.is_ascii_digit())?;
    if digits_end == 0 || rest.get(digits_end) != Some(&b':') {
        return None;
    }
    let len = std::str::from_utf8(&rest[..digits_end]).ok()?.parse().ok()?;
    Some((len, prefix.len() + digits_end + 1))
}

/// Parse `TAG:<len>` (no trailing colon) at the start of a frame. The
/// digit run ends at the first non-digit byte; gzip bodies start with
/// 0x1f so the boundary is unambiguous.
fn parse_block_header(frame: &[u8], tag: &str) -> Option<(usize, usize)> {
    let prefix = format!("{}:", tag);
    let rest = frame.strip_prefix(prefix.as_bytes())?;
    let digits_end = rest
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let len = std::str::from_utf8(&rest[..digits_end]).ok()?.parse().ok()?;
    Some((len, prefix.len() + digits_end))
}

fn ratio_percent(size: u64, compressed: u64) -> f64 {
    if size == 0 {
        return 0.0;
    }
    (1.0 - compressed as f64 / size as f64) * 100.0
}

fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope_header() {
        let (len, offset) = parse_envelope_header(b"FILE_LIST:5:{...}", "FILE_LIST").expect("parse");
        assert_eq!(len, 5);
        assert_eq!(offset, "FILE_LIST:5:".len());
        assert!(parse_envelope_header(b"FILE_LIST:x:", "FILE_LIST").is_none());
        assert!(parse_envelope_header(b"OTHER:5:", "FILE_LIST").is_none());
    }

    #[test]
    fn test_parse_block_header() {
        // Body bytes coalesced with the header.
        let frame = b"FILE_DATA_START:12\x1f\x8bdata";
        let (len, offset) = parse_block_header(frame, "FILE_DATA_START").expect("parse");
        assert_eq!(len, 12);
        assert_eq!(&frame[offset..], b"\x1f\x8bdata");
        // Header alone, digits run to the end.
        let (len, offset) = parse_block_header(b"FILE_DATA_START:900", "FILE_DATA_START").expect("parse");
        assert_eq!(len, 900);
        assert_eq!(offset, "FILE_DATA_START:900".len());
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_ratio_percent() {
        assert_eq!(ratio_percent(100, 25), 75.0);
        assert_eq!(ratio_percent(0, 20), 0.0);
    }
}
