//! Per-connection session: handshake, authentication and steady-state
//! command dispatch.
//!
//! Each session runs on its own task; the nickname/password exchange is
//! blocking I/O on that task only and never holds up other sessions.
//! Transfer failures are answered on the wire and leave the session
//! alive; read failures and peer closure are terminal.

use crate::error::{Error, Result};
use crate::hub::{shared_writer, SharedWriter};
use crate::logging::Redacted;
use crate::protocol::frame::{self, FrameReader};
use crate::protocol::{
    Command, AUTH_FAILED, AUTH_SUCCESS, DOWNLOAD_ERROR, FILE_LIST, FILE_NOT_FOUND, NICK, PASS,
    PASSWORD_LEN_DIGITS, UPLOAD_ERROR, UPLOAD_SUCCESS,
};
use crate::server::ServerState;
use crate::store::{self, FileRecord};
use crate::transfer::{self, DownloadInfo};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream accepted, nothing exchanged yet.
    Connecting,
    /// `NICK` sent, waiting for the nickname line.
    AwaitingNickname,
    /// `PASS` sent, waiting for the length-prefixed password.
    AwaitingPassword,
    /// Registered with the hub, dispatching frames.
    Authenticated,
    /// Terminal. The session object is discarded.
    Closed,
}

/// JSON payload of the `FILE_LIST` envelope.
#[derive(Serialize)]
struct FileListPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    files: &'a [FileRecord],
}

/// One server-side connection.
pub struct Session {
    server: Arc<ServerState>,
    peer: String,
    nickname: String,
    state: SessionState,
}

impl Session {
    /// Drive one connection from accept to close. Never returns an
    /// error: every failure is logged and terminates only this session.
    pub async fn run<S>(stream: S, peer: String, server: Arc<ServerState>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::with_buffer_size(read_half, server.config.buffer_size);
        let writer = shared_writer(write_half);

        let mut session = Session {
            server: Arc::clone(&server),
            peer,
            nickname: String::new(),
            state: SessionState::Connecting,
        };

        if let Err(e) = session.handshake(&mut reader, &writer).await {
            session.state = SessionState::Closed;
            match e {
                Error::Auth => info!(peer = %session.peer, "Authentication rejected"),
                e => debug!(peer = %session.peer, error = %e, "Handshake aborted"),
            }
            return;
        }

        let id = server.hub.register(&session.nickname, writer.clone()).await;
        session.state = SessionState::Authenticated;
        let online = server.hub.len().await;
        info!(
            peer = %session.peer,
            nickname = %session.nickname,
            online,
            "User connected"
        );
        server
            .hub
            .broadcast(format!("{} has joined the chat!", session.nickname).as_bytes())
            .await;

        let outcome = session.serve(&mut reader, &writer).await;

        server.hub.deregister(id).await;
        session.state = SessionState::Closed;
        server
            .hub
            .broadcast(format!("{} has left the chat!", session.nickname).as_bytes())
            .await;
        match outcome {
            Err(Error::Connection(reason)) => debug!(
                peer = %session.peer,
                nickname = %session.nickname,
                %reason,
                "Session closed"
            ),
            Err(e) => warn!(
                peer = %session.peer,
                nickname = %session.nickname,
                error = %e,
                "Session failed"
            ),
            Ok(()) => {}
        }
        let online = server.hub.len().await;
        info!(
            nickname = %session.nickname,
            online,
            "User disconnected"
        );
    }

    /// Nickname and password exchange.
    async fn handshake<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &SharedWriter,
    ) -> Result<()> {
        self.state = SessionState::AwaitingNickname;
        debug!(peer = %self.peer, state = ?self.state, "Handshake started");
        send(writer, NICK.as_bytes()).await?;
        let nickname = reader
            .read_frame()
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;
        self.nickname = String::from_utf8_lossy(&nickname).trim().to_string();

        self.state = SessionState::AwaitingPassword;
        debug!(peer = %self.peer, state = ?self.state, nickname = %self.nickname, "Nickname accepted");
        send(writer, PASS.as_bytes()).await?;
        let supplied = self.read_password(reader).await?;
        debug!(
            peer = %self.peer,
            nickname = %self.nickname,
            supplied = %Redacted(&supplied),
            "Password received"
        );

        if !self.server.config.password.is_empty() && supplied != self.server.config.password {
            send(writer, AUTH_FAILED.as_bytes()).await?;
            return Err(Error::Auth);
        }
        send(writer, AUTH_SUCCESS.as_bytes()).await?;
        Ok(())
    }

    /// Read the 4-ASCII-digit length prefix and that many password
    /// bytes. A timeout waiting for the prefix, or a malformed prefix,
    /// yields the empty password — a leniency for clients that predate
    /// authentication, not a security boundary. Bytes that did arrive
    /// are handed back to the reader so nothing is lost from the
    /// stream.
    async fn read_password<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut FrameReader<R>,
    ) -> Result<String> {
        let deadline = Instant::now() + self.server.config.password_timeout;
        // Accumulate whole frames; read_frame is a single read, so a
        // timeout cannot drop bytes mid-flight.
        let mut buf: Vec<u8> = Vec::new();
        while buf.len() < PASSWORD_LEN_DIGITS {
            match timeout_at(deadline, reader.read_frame()).await {
                Ok(Ok(bytes)) => buf.extend_from_slice(&bytes),
                Ok(Err(e)) => return Err(Error::Handshake(e.to_string())),
                Err(_) => {
                    reader.push_back(&buf);
                    debug!(peer = %self.peer, "No password length within timeout, assuming empty");
                    return Ok(String::new());
                }
            }
        }

        let prefix = &buf[..PASSWORD_LEN_DIGITS];
        let len = match std::str::from_utf8(prefix)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<usize>().ok())
        {
            Some(len) => len,
            None => {
                // Not a length field; hand everything back so it is
                // dispatched as a regular frame later.
                reader.push_back(&buf);
                debug!(peer = %self.peer, "Malformed password length, assuming empty");
                return Ok(String::new());
            }
        };
        reader.push_back(&buf[PASSWORD_LEN_DIGITS..]);
        if len == 0 {
            return Ok(String::new());
        }

        let body = reader
            .read_exact_frame(len)
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Steady-state frame dispatch. Returns when the stream dies.
    async fn serve<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &SharedWriter,
    ) -> Result<()> {
        loop {
            let frame = reader.read_frame().await?;
            match Command::parse(&frame) {
                Command::Chat(bytes) => {
                    debug!(nickname = %self.nickname, len = bytes.len(), "Chat broadcast");
                    self.server.hub.broadcast(bytes).await;
                }
                Command::FileList => self.send_file_list(writer).await?,
                Command::Upload {
                    filename,
                    compressed_len,
                    body,
                } => {
                    let filename = filename.to_string();
                    let body = body.to_vec();
                    self.handle_upload(reader, writer, filename, compressed_len, body)
                        .await?;
                }
                Command::Download { stored_name } => {
                    let stored_name = stored_name.to_string();
                    self.handle_download(reader, writer, &stored_name).await?;
                }
            }
        }
    }

    /// Reconcile and send the listing as a `FILE_LIST` envelope. A
    /// storage failure is logged and skipped; the session lives on.
    async fn send_file_list(&mut self, writer: &SharedWriter) -> Result<()> {
        let files = match self.server.store.list().await {
            Ok(files) => files,
            Err(e) => {
                warn!(nickname = %self.nickname, error = %e, "File listing failed");
                return Ok(());
            }
        };
        let payload = FileListPayload {
            kind: "file_list",
            files: &files,
        };
        let json = serde_json::to_vec(&payload)?;
        debug!(nickname = %self.nickname, files = files.len(), "Sending file list");
        send(writer, &frame::envelope(FILE_LIST, &json)).await
    }

    /// Upload receive path. Transfer and storage failures get
    /// `UPLOAD_ERROR`; connection failures are terminal.
    async fn handle_upload<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &SharedWriter,
        filename: String,
        compressed_len: usize,
        body: Vec<u8>,
    ) -> Result<()> {
        reader.push_back(&body);
        let outcome = self
            .receive_upload(reader, &filename, compressed_len)
            .await;
        match outcome {
            Ok(record) => {
                info!(
                    nickname = %self.nickname,
                    file = %record.unique_filename,
                    size = record.size,
                    compressed = record.compressed_size,
                    "Upload stored"
                );
                self.server
                    .hub
                    .broadcast(
                        format!("{} uploaded file: {}", self.nickname, record.filename)
                            .as_bytes(),
                    )
                    .await;
                send(writer, UPLOAD_SUCCESS.as_bytes()).await
            }
            Err(e @ Error::Connection(_)) => Err(e),
            Err(e) => {
                warn!(nickname = %self.nickname, file = %filename, error = %e, "Upload failed");
                send(writer, UPLOAD_ERROR.as_bytes()).await
            }
        }
    }

    async fn receive_upload<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut FrameReader<R>,
        filename: &str,
        compressed_len: usize,
    ) -> Result<FileRecord> {
        let compressed = transfer::receive_body(reader, compressed_len).await?;
        let data = transfer::decompress(&compressed)?;
        self.server
            .store
            .store(filename, &self.nickname, &data, compressed.len() as u64)
            .await
    }

    /// Download send path. A missing file gets `FILE_NOT_FOUND` before
    /// any `FILE_INFO`; later failures get `DOWNLOAD_ERROR`.
    async fn handle_download<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &SharedWriter,
        stored_name: &str,
    ) -> Result<()> {
        let data = match self.server.store.read(stored_name).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(nickname = %self.nickname, file = %stored_name, "Download of missing file");
                return send(writer, FILE_NOT_FOUND.as_bytes()).await;
            }
            Err(e) => {
                warn!(nickname = %self.nickname, file = %stored_name, error = %e, "Download read failed");
                return send(writer, DOWNLOAD_ERROR.as_bytes()).await;
            }
        };

        let outcome = self.send_download(reader, writer, stored_name, &data).await;
        match outcome {
            Ok(()) => {
                info!(
                    nickname = %self.nickname,
                    file = %stored_name,
                    size = data.len(),
                    "Download served"
                );
                Ok(())
            }
            Err(e @ Error::Connection(_)) => Err(e),
            Err(e) => {
                warn!(nickname = %self.nickname, file = %stored_name, error = %e, "Download failed");
                send(writer, DOWNLOAD_ERROR.as_bytes()).await
            }
        }
    }

    async fn send_download<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &SharedWriter,
        stored_name: &str,
        data: &[u8],
    ) -> Result<()> {
        let compressed = transfer::compress(data)?;
        let filename = match self.server.store.lookup(stored_name).await {
            Some(record) => record.filename,
            None => store::strip_timestamp_prefix(stored_name).to_string(),
        };
        let info = DownloadInfo {
            filename,
            size: data.len() as u64,
            compressed_size: compressed.len() as u64,
        };
        transfer::send_body(reader, writer, &info, &compressed).await
    }
}

async fn send(writer: &SharedWriter, bytes: &[u8]) -> Result<()> {
    let mut w = writer.lock().await;
    w.write_all(bytes).await?;
    Ok(())
}
