//! End-to-end tests driving a real server over TCP: handshake and
//! authentication, chat fan-out, file listing, upload/download
//! round-trips and index reconciliation.

use lanchat_core::server::{serve, ServerState};
use lanchat_core::transfer::{compress, decompress};
use lanchat_core::ServerConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn start_server(password: &str, tmp: &TempDir) -> SocketAddr {
    let config = ServerConfig {
        password: password.to_string(),
        upload_dir: tmp.path().join("uploads"),
        password_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let state = ServerState::new(config).await.expect("server state");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(serve(listener, state));
    addr
}

/// Test client with a scan buffer, since the protocol has no message
/// delimiters and the server's writes may coalesce on the wire.
struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    async fn connect_raw(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Client {
            stream,
            buf: Vec::new(),
        }
    }

    /// Full handshake, consuming `AUTH_SUCCESS` and the join broadcast.
    async fn connect(addr: SocketAddr, nickname: &str, password: &str) -> Self {
        let mut client = Self::connect_raw(addr).await;
        client.handshake(nickname, password).await;
        client.expect(b"AUTH_SUCCESS").await;
        client
            .expect(format!("{} has joined the chat!", nickname).as_bytes())
            .await;
        client
    }

    async fn handshake(&mut self, nickname: &str, password: &str) {
        self.expect(b"NICK").await;
        self.send(nickname.as_bytes()).await;
        self.expect(b"PASS").await;
        self.send(format!("{:04}", password.len()).as_bytes()).await;
        if !password.is_empty() {
            self.send(password.as_bytes()).await;
        }
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("send");
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await.expect("read");
        assert!(n > 0, "server closed the stream unexpectedly");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    /// Assert the next bytes on the stream are exactly `expected`.
    async fn expect(&mut self, expected: &[u8]) {
        while self.buf.len() < expected.len() {
            self.fill().await;
        }
        let got: Vec<u8> = self.buf.drain(..expected.len()).collect();
        assert_eq!(
            got,
            expected,
            "expected {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(&got)
        );
    }

    /// Discard bytes up to and including `needle`.
    async fn skip_until(&mut self, needle: &[u8]) {
        loop {
            if let Some(pos) = self
                .buf
                .windows(needle.len())
                .position(|window| window == needle)
            {
                self.buf.drain(..pos + needle.len());
                return;
            }
            self.fill().await;
        }
    }

    async fn take(&mut self, n: usize) -> Vec<u8> {
        while self.buf.len() < n {
            self.fill().await;
        }
        self.buf.drain(..n).collect()
    }

    /// Scan for a `TAG:<len>:` envelope and return its payload.
    async fn envelope(&mut self, tag: &str) -> Vec<u8> {
        self.skip_until(format!("{}:", tag).as_bytes()).await;
        let mut digits = Vec::new();
        loop {
            let byte = self.take(1).await[0];
            if byte == b':' {
                break;
            }
            assert!(byte.is_ascii_digit(), "bad envelope length byte {}", byte);
            digits.push(byte);
        }
        let len: usize = String::from_utf8(digits)
            .expect("utf8 digits")
            .parse()
            .expect("length");
        self.take(len).await
    }

    async fn upload(&mut self, filename: &str, data: &[u8]) -> usize {
        let compressed = compress(data).expect("compress");
        self.send(format!("UPLOAD_FILE:{}:{}:", filename, compressed.len()).as_bytes())
            .await;
        self.send(&compressed).await;
        compressed.len()
    }

    /// Run the download sequence for `stored_name`, returning the
    /// decompressed bytes.
    async fn download(&mut self, stored_name: &str) -> Vec<u8> {
        self.send(format!("DOWNLOAD_FILE:{}", stored_name).as_bytes())
            .await;
        let info: serde_json::Value =
            serde_json::from_slice(&self.envelope("FILE_INFO").await).expect("file info");
        let clen = info["compressed_size"].as_u64().expect("compressed_size") as usize;

        self.send(b"READY").await;
        self.expect(format!("FILE_DATA_START:{}", clen).as_bytes())
            .await;
        let body = self.take(clen).await;
        self.expect(b"DOWNLOAD_COMPLETE").await;
        decompress(&body).expect("decompress download")
    }
}

#[tokio::test]
async fn auth_accepts_matching_password() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("secret", &tmp).await;
    let mut client = Client::connect_raw(addr).await;
    client.handshake("alice", "secret").await;
    client.expect(b"AUTH_SUCCESS").await;
}

#[tokio::test]
async fn auth_rejects_wrong_password() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("secret", &tmp).await;
    let mut client = Client::connect_raw(addr).await;
    client.handshake("mallory", "Secret").await;
    client.expect(b"AUTH_FAILED").await;
}

#[tokio::test]
async fn empty_server_password_accepts_any_client_password() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect_raw(addr).await;
    client.handshake("alice", "anything at all").await;
    client.expect(b"AUTH_SUCCESS").await;
}

#[tokio::test]
async fn zero_length_prefix_means_empty_password() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect_raw(addr).await;
    client.expect(b"NICK").await;
    client.send(b"alice").await;
    client.expect(b"PASS").await;
    client.send(b"0000").await;
    client.expect(b"AUTH_SUCCESS").await;
}

#[tokio::test]
async fn silent_client_times_out_to_empty_password() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("secret", &tmp).await;
    let mut client = Client::connect_raw(addr).await;
    client.expect(b"NICK").await;
    client.send(b"oldclient").await;
    client.expect(b"PASS").await;
    // Send nothing: after the timeout the password defaults to empty,
    // which does not match a non-empty server password.
    client.expect(b"AUTH_FAILED").await;
}

#[tokio::test]
async fn malformed_password_prefix_is_treated_as_empty() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect_raw(addr).await;
    client.expect(b"NICK").await;
    client.send(b"alice").await;
    client.expect(b"PASS").await;
    // Not a length field: falls back to the empty password, and the
    // bytes are not swallowed.
    client.send(b"abcd").await;
    client.expect(b"AUTH_SUCCESS").await;
    client.expect(b"alice has joined the chat!").await;
    client.expect(b"abcd").await;
}

#[tokio::test]
async fn partial_password_prefix_survives_the_timeout() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect_raw(addr).await;
    client.expect(b"NICK").await;
    client.send(b"alice").await;
    client.expect(b"PASS").await;
    // Half a length prefix, then silence past the timeout: the
    // password defaults to empty and the two bytes surface as the
    // first chat frame instead of vanishing.
    client.send(b"00").await;
    client.expect(b"AUTH_SUCCESS").await;
    client.expect(b"alice has joined the chat!").await;
    client.expect(b"00").await;
}

#[tokio::test]
async fn chat_is_broadcast_to_everyone_including_sender() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut alice = Client::connect(addr, "alice", "").await;
    let mut bob = Client::connect(addr, "bob", "").await;
    alice.expect(b"bob has joined the chat!").await;

    alice.send(b"alice: hello bob").await;
    alice.expect(b"alice: hello bob").await;
    bob.expect(b"alice: hello bob").await;
}

#[tokio::test]
async fn disconnect_broadcasts_leave_notification() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut alice = Client::connect(addr, "alice", "").await;
    let bob = Client::connect(addr, "bob", "").await;
    alice.expect(b"bob has joined the chat!").await;

    drop(bob);
    alice.expect(b"bob has left the chat!").await;
}

#[tokio::test]
async fn empty_directory_lists_no_files() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    client.send(b"GET_FILE_LIST").await;
    // The declared length must match the payload byte-for-byte.
    let payload = br#"{"type":"file_list","files":[]}"#;
    client
        .expect(format!("FILE_LIST:{}:", payload.len()).as_bytes())
        .await;
    client.expect(payload).await;
}

#[tokio::test]
async fn upload_then_download_round_trips() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    client.upload("pattern.bin", &data).await;
    client.expect(b"alice uploaded file: pattern.bin").await;
    client.expect(b"UPLOAD_SUCCESS").await;

    client.send(b"GET_FILE_LIST").await;
    let listing: serde_json::Value =
        serde_json::from_slice(&client.envelope("FILE_LIST").await).expect("listing");
    let files = listing["files"].as_array().expect("files array");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["filename"], "pattern.bin");
    assert_eq!(files[0]["uploader"], "alice");
    assert_eq!(files[0]["size"], data.len() as u64);
    let stored = files[0]["unique_filename"].as_str().expect("stored name");

    let downloaded = client.download(stored).await;
    assert_eq!(downloaded, data);
}

#[tokio::test]
async fn empty_file_round_trips() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    client.upload("empty.txt", b"").await;
    client.expect(b"alice uploaded file: empty.txt").await;
    client.expect(b"UPLOAD_SUCCESS").await;

    client.send(b"GET_FILE_LIST").await;
    let listing: serde_json::Value =
        serde_json::from_slice(&client.envelope("FILE_LIST").await).expect("listing");
    let stored = listing["files"][0]["unique_filename"]
        .as_str()
        .expect("stored name")
        .to_string();

    let downloaded = client.download(&stored).await;
    assert!(downloaded.is_empty());
}

#[tokio::test]
async fn download_of_missing_file_reports_not_found() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    client.send(b"DOWNLOAD_FILE:20240101_120000_ghost.txt").await;
    // Exactly FILE_NOT_FOUND; no FILE_INFO precedes it.
    client.expect(b"FILE_NOT_FOUND").await;
}

#[tokio::test]
async fn bad_upload_body_reports_error_and_session_survives() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    // Declares 10 bytes but sends garbage that is not gzip.
    client.send(b"UPLOAD_FILE:broken.bin:10:0123456789").await;
    client.expect(b"UPLOAD_ERROR").await;

    // The session is still alive and chatting.
    client.send(b"alice: still here").await;
    client.expect(b"alice: still here").await;
}

#[tokio::test]
async fn huge_declared_upload_length_does_not_kill_the_server() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    // A header declaring a petabyte body must not be allocated up
    // front; the session dies when the stream closes short, and the
    // server keeps accepting connections.
    client
        .send(format!("UPLOAD_FILE:bomb.bin:{}:", 1u64 << 50).as_bytes())
        .await;
    drop(client);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut bob = Client::connect(addr, "bob", "").await;
    bob.send(b"bob: still serving").await;
    bob.expect(b"bob: still serving").await;
}

#[tokio::test]
async fn malformed_upload_header_falls_back_to_chat() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    client.send(b"UPLOAD_FILE:too_few_fields").await;
    client.expect(b"UPLOAD_FILE:too_few_fields").await;
}

#[tokio::test]
async fn out_of_band_deletion_is_reconciled_on_listing() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    client.upload("keep.txt", b"keep me").await;
    client.skip_until(b"UPLOAD_SUCCESS").await;
    client.upload("lose.txt", b"lose me").await;
    client.skip_until(b"UPLOAD_SUCCESS").await;

    client.send(b"GET_FILE_LIST").await;
    let listing: serde_json::Value =
        serde_json::from_slice(&client.envelope("FILE_LIST").await).expect("listing");
    assert_eq!(listing["files"].as_array().expect("files").len(), 2);
    let lost = listing["files"]
        .as_array()
        .expect("files")
        .iter()
        .find(|f| f["filename"] == "lose.txt")
        .expect("lose.txt listed")["unique_filename"]
        .as_str()
        .expect("stored name")
        .to_string();

    std::fs::remove_file(tmp.path().join("uploads").join(&lost)).expect("out-of-band delete");

    client.send(b"GET_FILE_LIST").await;
    let listing: serde_json::Value =
        serde_json::from_slice(&client.envelope("FILE_LIST").await).expect("listing");
    let files = listing["files"].as_array().expect("files");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["filename"], "keep.txt");

    // The persisted index shrank by exactly one record.
    let index: Vec<serde_json::Value> = serde_json::from_slice(
        &std::fs::read(tmp.path().join("uploads_index.json")).expect("index file"),
    )
    .expect("index json");
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn concurrent_same_name_uploads_keep_both_files() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut alice = Client::connect(addr, "alice", "").await;
    let mut bob = Client::connect(addr, "bob", "").await;

    tokio::join!(
        async {
            alice.upload("report.txt", b"from alice").await;
            alice.skip_until(b"UPLOAD_SUCCESS").await;
        },
        async {
            bob.upload("report.txt", b"from bob").await;
            bob.skip_until(b"UPLOAD_SUCCESS").await;
        }
    );

    let mut carol = Client::connect(addr, "carol", "").await;
    carol.send(b"GET_FILE_LIST").await;
    let listing: serde_json::Value =
        serde_json::from_slice(&carol.envelope("FILE_LIST").await).expect("listing");
    let files = listing["files"].as_array().expect("files");
    assert_eq!(files.len(), 2, "one upload was lost: {}", listing);

    let names: Vec<&str> = files
        .iter()
        .map(|f| f["unique_filename"].as_str().expect("stored name"))
        .collect();
    assert_ne!(names[0], names[1]);

    let mut bodies: Vec<Vec<u8>> = Vec::new();
    for name in names {
        bodies.push(carol.download(name).await);
    }
    bodies.sort();
    assert_eq!(bodies, vec![b"from alice".to_vec(), b"from bob".to_vec()]);
}

#[tokio::test]
async fn listing_twice_is_idempotent() {
    let tmp = TempDir::new().expect("tempdir");
    let addr = start_server("", &tmp).await;
    let mut client = Client::connect(addr, "alice", "").await;

    client.upload("stable.txt", b"stable contents").await;
    client.skip_until(b"UPLOAD_SUCCESS").await;

    client.send(b"GET_FILE_LIST").await;
    let first = client.envelope("FILE_LIST").await;
    client.send(b"GET_FILE_LIST").await;
    let second = client.envelope("FILE_LIST").await;
    assert_eq!(first, second);
}
