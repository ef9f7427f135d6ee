//! Async disk persistence for namespace partitions.
//!
//! Each namespace is one directory under the storage root; each entry is one
//! file named by its zero-padded insertion sequence, so a directory listing
//! sorted by name is already in insertion order.
//!
//! Record layout before compression:
//! `[u32 LE header length][JSON header][body bytes]`.

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::cache::compressor::{CompressionError, Compressor};
use crate::cache::entry::{CacheEntry, CachedResponse, RequestKey};
use crate::config::StorageConfig;

const ENTRY_EXTENSION: &str = "entry";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid partition name: {0:?}")]
    InvalidName(String),

    #[error("Corrupt entry file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// Header of an entry record.
#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    seq: u64,
    stored_at: DateTime<Utc>,
}

/// A partition as found on disk.
#[derive(Debug)]
pub struct StoredPartition {
    pub name: String,
    /// Entries from oldest to newest.
    pub entries: Vec<CacheEntry>,
}

/// Disk engine for reading and writing namespace partitions.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    compressor: Compressor,
}

impl DiskStore {
    /// Open (and create if needed) the storage root.
    pub async fn new(root: PathBuf, config: &StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            compressor: Compressor::new(config),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a partition. Names are restricted so they can never escape the root.
    fn partition_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn entry_path(&self, name: &str, seq: u64) -> Result<PathBuf, StorageError> {
        Ok(self
            .partition_path(name)?
            .join(format!("{seq:020}.{ENTRY_EXTENSION}")))
    }

    /// Persist one entry of a partition.
    pub async fn write_entry(&self, name: &str, entry: &CacheEntry) -> Result<PathBuf, StorageError> {
        let path = self.entry_path(name, entry.seq)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let record = encode_record(entry)?;
        let data = self.compressor.compress(&record)?;
        fs::write(&path, &data).await?;

        debug!(
            partition = name,
            seq = entry.seq,
            size = data.len(),
            "Wrote entry to disk"
        );

        Ok(path)
    }

    /// Remove one entry file. Missing files are ignored.
    pub async fn remove_entry(&self, name: &str, seq: u64) -> Result<(), StorageError> {
        let path = self.entry_path(name, seq)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(partition = name, seq, "Deleted entry file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a whole partition. Missing partitions are ignored.
    pub async fn delete_partition(&self, name: &str) -> Result<(), StorageError> {
        let path = self.partition_path(name)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(partition = name, "Deleted partition");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every partition under the root.
    ///
    /// Unreadable entry files are skipped with a warning rather than failing
    /// the whole load.
    pub async fn load_partitions(&self) -> Result<Vec<StoredPartition>, StorageError> {
        let mut partitions = Vec::new();
        let mut dirs = fs::read_dir(&self.root).await?;

        while let Some(dir) = dirs.next_entry().await? {
            if !dir.metadata().await?.is_dir() {
                continue;
            }
            let name = dir.file_name().to_string_lossy().into_owned();
            if self.partition_path(&name).is_err() {
                warn!(partition = %name, "Skipping directory with invalid partition name");
                continue;
            }

            let mut files = Vec::new();
            let mut entries = fs::read_dir(dir.path()).await?;
            while let Some(file) = entries.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                    files.push(path);
                }
            }
            files.sort();

            let mut loaded = Vec::with_capacity(files.len());
            for path in files {
                match self.read_entry(&path).await {
                    Ok(entry) => loaded.push(entry),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable entry"),
                }
            }
            loaded.sort_by_key(|e| e.seq);

            partitions.push(StoredPartition {
                name,
                entries: loaded,
            });
        }

        partitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(partitions)
    }

    async fn read_entry(&self, path: &Path) -> Result<CacheEntry, StorageError> {
        let data = fs::read(path).await?;
        let record = self.compressor.decompress(&data)?;
        decode_record(Bytes::from(record)).map_err(|reason| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })
    }
}

fn encode_record(entry: &CacheEntry) -> Result<Vec<u8>, StorageError> {
    let header = RecordHeader {
        key: entry.key.clone(),
        status: entry.response.status,
        headers: entry.response.headers.clone(),
        seq: entry.seq,
        stored_at: entry.stored_at,
    };
    let header = serde_json::to_vec(&header).map_err(|e| StorageError::Corrupt {
        path: PathBuf::new(),
        reason: e.to_string(),
    })?;

    let mut buf = BytesMut::with_capacity(4 + header.len() + entry.response.body.len());
    buf.put_u32_le(header.len() as u32);
    buf.put_slice(&header);
    buf.put_slice(&entry.response.body);
    Ok(buf.to_vec())
}

fn decode_record(mut data: Bytes) -> Result<CacheEntry, String> {
    if data.remaining() < 4 {
        return Err("record shorter than its length prefix".to_string());
    }
    let header_len = data.get_u32_le() as usize;
    if data.remaining() < header_len {
        return Err(format!(
            "header length {header_len} exceeds record size {}",
            data.remaining()
        ));
    }
    let header_bytes = data.split_to(header_len);
    let header: RecordHeader = serde_json::from_slice(&header_bytes).map_err(|e| e.to_string())?;

    Ok(CacheEntry {
        key: header.key,
        response: CachedResponse::new(header.status, header.headers, data),
        seq: header.seq,
        stored_at: header.stored_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, seq: u64, body: &str) -> CacheEntry {
        let url = reqwest::Url::parse(&format!("https://app.example{path}")).unwrap();
        CacheEntry {
            key: RequestKey::from_url(&url),
            response: CachedResponse::new(
                200,
                vec![("content-type".to_string(), "text/plain".to_string())],
                body.to_string(),
            ),
            seq,
            stored_at: Utc::now(),
        }
    }

    async fn store(tmp: &TempDir, compression: bool) -> DiskStore {
        let config = StorageConfig {
            path: None,
            compression,
            zstd_level: 3,
        };
        DiskStore::new(tmp.path().join("store"), &config).await.unwrap()
    }

    #[tokio::test]
    async fn test_write_and_load_partition() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, true).await;

        store.write_entry("app-static-v1", &entry("/b", 7, "bee")).await.unwrap();
        store.write_entry("app-static-v1", &entry("/a", 3, "ay")).await.unwrap();

        let partitions = store.load_partitions().await.unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].name, "app-static-v1");

        let entries = &partitions[0].entries;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 3);
        assert_eq!(entries[0].response.body, "ay");
        assert_eq!(entries[1].response.content_type(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_remove_entry_and_partition() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, false).await;

        store.write_entry("app-images-v1", &entry("/a.png", 0, "a")).await.unwrap();
        store.write_entry("app-images-v1", &entry("/b.png", 1, "b")).await.unwrap();
        store.remove_entry("app-images-v1", 0).await.unwrap();
        // Removing twice is fine.
        store.remove_entry("app-images-v1", 0).await.unwrap();

        let partitions = store.load_partitions().await.unwrap();
        assert_eq!(partitions[0].entries.len(), 1);
        assert_eq!(partitions[0].entries[0].seq, 1);

        store.delete_partition("app-images-v1").await.unwrap();
        store.delete_partition("app-images-v1").await.unwrap();
        assert!(store.load_partitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_escaping_names() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, false).await;

        let result = store.write_entry("../evil", &entry("/x", 0, "x")).await;
        assert!(matches!(result, Err(StorageError::InvalidName(_))));
        assert!(matches!(
            store.delete_partition("a/b").await,
            Err(StorageError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, false).await;

        store.write_entry("app-dynamic-v1", &entry("/ok", 0, "ok")).await.unwrap();
        let bad = store.root().join("app-dynamic-v1").join(format!("{:020}.entry", 1));
        tokio::fs::write(&bad, [0u8, 0xff, 0xff, 0xff, 0x7f]).await.unwrap();

        let partitions = store.load_partitions().await.unwrap();
        assert_eq!(partitions[0].entries.len(), 1);
        assert_eq!(partitions[0].entries[0].response.body, "ok");
    }
}
