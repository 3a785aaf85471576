//! Shared positional-write handle over a segment backing file
//!
//! All chunk workers of a segment share one handle; writes go through
//! `write_at` so there is no file-cursor state to contend on. Writes run on
//! the blocking pool and report the time spent inside the syscall, which
//! feeds the disk-write-speed stat.

use crate::error::EngineError;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone)]
pub struct SegmentFile {
    file: Arc<File>,
    path: PathBuf,
}

impl SegmentFile {
    /// Open (or create) the backing file for a segment of `len` bytes,
    /// preallocated by truncation. A file whose size matches neither zero
    /// nor `len` is stale: its content is discarded and the caller must not
    /// trust any resume record for it. Returns the handle and whether that
    /// happened.
    pub async fn open(path: PathBuf, len: u64) -> Result<(Self, bool), EngineError> {
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|source| EngineError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            let size = file
                .metadata()
                .map_err(|source| EngineError::OpenFile {
                    path: path.clone(),
                    source,
                })?
                .len();

            let mut discarded = false;
            if size != 0 && size != len {
                warn!(?path, size, expected = len, "stale segment file, recreating");
                file.set_len(0).map_err(|source| EngineError::Truncate {
                    path: path.clone(),
                    source,
                })?;
                discarded = true;
            }
            file.set_len(len).map_err(|source| EngineError::Truncate {
                path: path.clone(),
                source,
            })?;

            Ok((
                Self {
                    file: Arc::new(file),
                    path,
                },
                discarded,
            ))
        })
        .await
        .map_err(|e| EngineError::DownloadFailed(format!("blocking open failed: {e}")))?
    }

    /// Write the whole buffer at `offset`. Returns the buffer for reuse and
    /// the wall time spent in the write.
    pub async fn write_at(
        &self,
        buf: Vec<u8>,
        offset: u64,
    ) -> Result<(Vec<u8>, Duration), EngineError> {
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            write_all_at(&file, &buf, offset)
                .map_err(|source| EngineError::Write { path, source })?;
            Ok((buf, started.elapsed()))
        })
        .await
        .map_err(|e| EngineError::DownloadFailed(format!("blocking write failed: {e}")))?
    }

    pub async fn sync(&self) -> Result<(), EngineError> {
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            file.sync_all()
                .map_err(|source| EngineError::Write { path, source })
        })
        .await
        .map_err(|e| EngineError::DownloadFailed(format!("blocking sync failed: {e}")))?
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_land_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.seg");
        let (file, discarded) = SegmentFile::open(path.clone(), 8).await.unwrap();
        assert!(!discarded);

        // out of order, as concurrent workers would
        file.write_at(vec![5, 6, 7, 8], 4).await.unwrap();
        file.write_at(vec![1, 2, 3, 4], 0).await.unwrap();
        file.sync().await.unwrap();

        assert_eq!(
            std::fs::read(&path).unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[tokio::test]
    async fn open_preallocates_and_discards_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.seg");

        let (_, discarded) = SegmentFile::open(path.clone(), 16).await.unwrap();
        assert!(!discarded);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);

        // same size: content kept
        let (_, discarded) = SegmentFile::open(path.clone(), 16).await.unwrap();
        assert!(!discarded);

        // different geometry: treated as fresh
        let (_, discarded) = SegmentFile::open(path.clone(), 32).await.unwrap();
        assert!(discarded);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32);
    }
}
