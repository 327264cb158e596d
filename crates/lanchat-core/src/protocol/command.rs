//! Inbound command dispatch.
//!
//! An authenticated session reads one frame at a time and classifies it
//! by prefix. Anything that does not parse as a known command is chat:
//! malformed command-shaped text (for example an `UPLOAD_FILE:` header
//! with too few fields) is broadcast verbatim as a chat line rather
//! than rejected.

use super::{DOWNLOAD_FILE, GET_FILE_LIST, UPLOAD_FILE};

/// One parsed inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// Plain chat text, broadcast verbatim (bytes untouched).
    Chat(&'a [u8]),
    /// `GET_FILE_LIST`.
    FileList,
    /// `UPLOAD_FILE:<name>:<clen>:` — `body` holds any payload bytes
    /// that arrived coalesced with the header.
    Upload {
        /// Logical filename as supplied by the uploader.
        filename: &'a str,
        /// Declared compressed payload length in bytes.
        compressed_len: usize,
        /// Payload bytes that followed the header in the same read.
        body: &'a [u8],
    },
    /// `DOWNLOAD_FILE:<stored_name>`.
    Download {
        /// On-disk stored filename being requested.
        stored_name: &'a str,
    },
}

impl<'a> Command<'a> {
    /// Classify one frame. Never fails: unparseable input is chat.
    pub fn parse(frame: &'a [u8]) -> Command<'a> {
        if let Ok(text) = std::str::from_utf8(frame) {
            if text.trim() == GET_FILE_LIST {
                return Command::FileList;
            }
        }
        if frame.starts_with(UPLOAD_FILE.as_bytes()) {
            if let Some(cmd) = parse_upload(frame) {
                return cmd;
            }
        }
        if frame.starts_with(DOWNLOAD_FILE.as_bytes()) {
            if let Some(cmd) = parse_download(frame) {
                return cmd;
            }
        }
        Command::Chat(frame)
    }
}

/// Parse `UPLOAD_FILE:<name>:<clen>:<body...>`. The header is UTF-8 up
/// to the third colon; the body may be arbitrary bytes.
fn parse_upload(frame: &[u8]) -> Option<Command<'_>> {
    let rest = &frame[UPLOAD_FILE.len()..];
    let name_end = rest.iter().position(|&b| b == b':')?;
    let filename = std::str::from_utf8(&rest[..name_end]).ok()?;
    if filename.is_empty() {
        return None;
    }

    let after_name = &rest[name_end + 1..];
    let len_end = after_name.iter().position(|&b| b == b':')?;
    let compressed_len = std::str::from_utf8(&after_name[..len_end])
        .ok()?
        .parse::<usize>()
        .ok()?;

    Some(Command::Upload {
        filename,
        compressed_len,
        body: &after_name[len_end + 1..],
    })
}

fn parse_download(frame: &[u8]) -> Option<Command<'_>> {
    let rest = std::str::from_utf8(&frame[DOWNLOAD_FILE.len()..]).ok()?;
    let stored_name = rest.trim();
    if stored_name.is_empty() {
        return None;
    }
    Some(Command::Download { stored_name })
}
