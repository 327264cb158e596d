//! Upload directory and file metadata index.
//!
//! The persisted index is the single source of truth for logical
//! metadata (who uploaded what, when, how big); the directory listing is
//! the single source of truth for physical existence. The two are
//! reconciled lazily — on open and on every listing — because uploads
//! and deletions may happen out of band.

use crate::error::{Error, Result};
use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Stored-filename timestamp prefix, e.g. `20240101_120000_`.
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Human-readable upload time shown to clients.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Metadata for one stored upload.
///
/// Serialized field names are the wire and index format; do not rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Logical filename as supplied by the uploader. Not unique.
    pub filename: String,
    /// On-disk filename, `<YYYYMMDD_HHMMSS>_<filename>`. Unique.
    pub unique_filename: String,
    /// Uploader nickname. May be stale if the uploader disconnected,
    /// `"unknown"` for files found on disk without an index entry.
    pub uploader: String,
    /// Upload time at second resolution.
    pub upload_time: String,
    /// Original (decompressed) size in bytes.
    pub size: u64,
    /// Size of the compressed body as received on the wire.
    pub compressed_size: u64,
}

/// Upload directory plus its sibling JSON index.
pub struct FileStore {
    dir: PathBuf,
    index_path: PathBuf,
    records: Mutex<Vec<FileRecord>>,
}

impl FileStore {
    /// Open the store, creating the upload directory if needed, loading
    /// the persisted index and reconciling it against the directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Storage(format!("failed to create upload dir: {}", e)))?;

        let index_path = sibling_index_path(&dir);
        let records = match tokio::fs::read(&index_path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<FileRecord>>(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = ?index_path, error = %e, "Index unreadable, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::Storage(format!("failed to read index: {}", e))),
        };

        let store = Self {
            dir,
            index_path,
            records: Mutex::new(records),
        };
        store.reconcile().await?;
        Ok(store)
    }

    /// Path of the upload directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop every index record whose stored file is no longer on disk,
    /// persisting the index if anything was dropped.
    pub async fn reconcile(&self) -> Result<()> {
        let existing = self.stored_names().await?;
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| existing.contains(&r.unique_filename));
        if records.len() != before {
            info!(
                dropped = before - records.len(),
                "Pruned index records for missing files"
            );
            self.persist(&records).await?;
        }
        Ok(())
    }

    /// Produce the client-visible listing: reconcile, then report every
    /// file physically present, synthesizing records (uploader
    /// `"unknown"`) for files the index does not know about. Sorted by
    /// upload time, newest first.
    pub async fn list(&self) -> Result<Vec<FileRecord>> {
        let existing = self.stored_names().await?;
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| existing.contains(&r.unique_filename));
        if records.len() != before {
            self.persist(&records).await?;
        }

        let mut out = records.clone();
        let indexed: HashSet<&str> = records.iter().map(|r| r.unique_filename.as_str()).collect();
        for name in &existing {
            if indexed.contains(name.as_str()) {
                continue;
            }
            let size = tokio::fs::metadata(self.dir.join(name))
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            out.push(FileRecord {
                filename: strip_timestamp_prefix(name).to_string(),
                unique_filename: name.clone(),
                uploader: "unknown".to_string(),
                upload_time: time_from_stored_name(name).unwrap_or_default(),
                size,
                compressed_size: 0,
            });
        }
        out.sort_by(|a, b| b.upload_time.cmp(&a.upload_time));
        Ok(out)
    }

    /// Write a completed upload to disk and upsert its record.
    ///
    /// The stored name is derived from the upload timestamp; while the
    /// derived name is already taken (two same-second uploads of the
    /// same logical name) the timestamp is bumped by one second, so
    /// concurrent uploads never clobber each other.
    pub async fn store(
        &self,
        filename: &str,
        uploader: &str,
        data: &[u8],
        compressed_size: u64,
    ) -> Result<FileRecord> {
        let mut records = self.records.lock().await;

        let mut stamp = Local::now().naive_local();
        let unique_filename = loop {
            let candidate = format!("{}_{}", stamp.format(STAMP_FORMAT), filename);
            let taken = records.iter().any(|r| r.unique_filename == candidate)
                || tokio::fs::try_exists(self.dir.join(&candidate))
                    .await
                    .map_err(|e| Error::Storage(e.to_string()))?;
            if !taken {
                break candidate;
            }
            stamp += Duration::seconds(1);
        };

        tokio::fs::write(self.dir.join(&unique_filename), data)
            .await
            .map_err(|e| Error::Storage(format!("failed to write {}: {}", unique_filename, e)))?;

        let record = FileRecord {
            filename: filename.to_string(),
            unique_filename: unique_filename.clone(),
            uploader: uploader.to_string(),
            upload_time: stamp.format(TIME_FORMAT).to_string(),
            size: data.len() as u64,
            compressed_size,
        };

        // Re-upload with the same stored name replaces the prior record.
        records.retain(|r| r.unique_filename != unique_filename);
        records.push(record.clone());
        self.persist(&records).await?;

        debug!(
            file = %record.unique_filename,
            uploader = %record.uploader,
            size = record.size,
            "Stored upload"
        );
        Ok(record)
    }

    /// Read a stored file's bytes. `Ok(None)` when the name is unknown,
    /// not a plain name, or the file is gone.
    pub async fn read(&self, stored_name: &str) -> Result<Option<Vec<u8>>> {
        if !is_plain_name(stored_name) {
            return Ok(None);
        }
        match tokio::fs::read(self.dir.join(stored_name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!(
                "failed to read {}: {}",
                stored_name, e
            ))),
        }
    }

    /// Look up the index record for a stored name, if any.
    pub async fn lookup(&self, stored_name: &str) -> Option<FileRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.unique_filename == stored_name)
            .cloned()
    }

    /// Set of filenames physically present in the upload directory.
    async fn stored_names(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Storage(format!("failed to list upload dir: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                if let Ok(name) = entry.file_name().into_string() {
                    names.insert(name);
                }
            }
        }
        Ok(names)
    }

    async fn persist(&self, records: &[FileRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&self.index_path, json)
            .await
            .map_err(|e| Error::Storage(format!("failed to write index: {}", e)))
    }
}

/// Index file lives next to the upload directory so it never shows up
/// in the directory listing it is reconciled against.
fn sibling_index_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "uploads".to_string());
    dir.with_file_name(format!("{}_index.json", name))
}

/// Reject anything that is not a bare filename.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Recover a logical filename from a stored one by stripping the
/// leading `YYYYMMDD_HHMMSS_` prefix. Falls back to stripping a single
/// leading digit group, then to the name as-is.
pub fn strip_timestamp_prefix(stored_name: &str) -> &str {
    let mut parts = stored_name.splitn(3, '_');
    if let (Some(date), Some(time), Some(rest)) = (parts.next(), parts.next(), parts.next()) {
        if date.len() == 8
            && time.len() == 6
            && date.bytes().all(|b| b.is_ascii_digit())
            && time.bytes().all(|b| b.is_ascii_digit())
        {
            return rest;
        }
    }
    match stored_name.split_once('_') {
        Some((head, rest)) if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) => rest,
        _ => stored_name,
    }
}

/// Parse the display timestamp back out of a stored name, if it carries
/// the standard prefix.
fn time_from_stored_name(stored_name: &str) -> Option<String> {
    let (date, rest) = stored_name.split_once('_')?;
    let (time, _) = rest.split_once('_')?;
    let stamp = NaiveDateTime::parse_from_str(&format!("{}_{}", date, time), STAMP_FORMAT).ok()?;
    Some(stamp.format(TIME_FORMAT).to_string())
}
