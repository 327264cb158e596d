//! Wire protocol: tokens, framing and inbound command parsing.
//!
//! The protocol interleaves three frame shapes on one byte stream:
//!
//! - a plain line: one read's worth of UTF-8 text, no delimiter;
//! - a JSON envelope: `TAG:<len>:` followed by exactly `<len>` bytes;
//! - a binary block: `TAG:<len>` (no trailing colon) followed by
//!   exactly `<len>` raw bytes.
//!
//! Readers must never assume one read equals one logical message; the
//! [`frame::FrameReader`] re-synchronizes on command prefixes and the
//! embedded length fields.

pub mod command;
pub mod frame;

pub use command::Command;
pub use frame::FrameReader;

/// Server asks for the nickname.
pub const NICK: &str = "NICK";
/// Server asks for the password.
pub const PASS: &str = "PASS";
/// Handshake accepted.
pub const AUTH_SUCCESS: &str = "AUTH_SUCCESS";
/// Handshake rejected, connection will close.
pub const AUTH_FAILED: &str = "AUTH_FAILED";
/// Client requests the file listing.
pub const GET_FILE_LIST: &str = "GET_FILE_LIST";
/// Envelope tag for the file listing.
pub const FILE_LIST: &str = "FILE_LIST";
/// Client upload header prefix, `UPLOAD_FILE:<name>:<clen>:`.
pub const UPLOAD_FILE: &str = "UPLOAD_FILE:";
/// Upload stored and indexed.
pub const UPLOAD_SUCCESS: &str = "UPLOAD_SUCCESS";
/// Upload failed; the session survives.
pub const UPLOAD_ERROR: &str = "UPLOAD_ERROR";
/// Client download request prefix, `DOWNLOAD_FILE:<stored_name>`.
pub const DOWNLOAD_FILE: &str = "DOWNLOAD_FILE:";
/// Envelope tag for download metadata.
pub const FILE_INFO: &str = "FILE_INFO";
/// Block tag for the download body.
pub const FILE_DATA_START: &str = "FILE_DATA_START";
/// Download body fully sent.
pub const DOWNLOAD_COMPLETE: &str = "DOWNLOAD_COMPLETE";
/// Download failed after it started.
pub const DOWNLOAD_ERROR: &str = "DOWNLOAD_ERROR";
/// Requested stored filename is not on disk.
pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";

/// The password length prefix is this many ASCII decimal digits.
pub const PASSWORD_LEN_DIGITS: usize = 4;
