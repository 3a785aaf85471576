//! On-disk layout for a download
//!
//! Destination file preallocated under a category subfolder with a temp
//! suffix, one backing file per segment in a per-download temp directory,
//! ordered merge into the destination and the final rename.

use crate::engine::resume::STATE_FILE;
use crate::error::EngineError;
use parget_types::{ByteSpan, Category, EngineConfig, SEG_EXT, TEMP_EXT};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

/// Paths owned by one download.
#[derive(Debug, Clone)]
pub struct DownloadLayout {
    pub dest_dir: PathBuf,
    /// Destination carrying the temp suffix until completion.
    pub dest_tmp: PathBuf,
    pub final_path: PathBuf,
    pub temp_dir: PathBuf,
}

impl DownloadLayout {
    pub fn new(cfg: &EngineConfig, filename: &str, download_id: &Uuid) -> Self {
        let category = Category::for_filename(filename);
        let dest_dir = cfg.download_root.join(category.subfolder());
        Self {
            dest_tmp: dest_dir.join(format!("{filename}{TEMP_EXT}")),
            final_path: dest_dir.join(filename),
            temp_dir: cfg.temp_root.join(download_id.to_string()),
            dest_dir,
        }
    }

    pub fn segment_path(&self, id: u64) -> PathBuf {
        self.temp_dir.join(format!("{id}{SEG_EXT}"))
    }

    pub fn state_path(&self) -> PathBuf {
        self.temp_dir.join(STATE_FILE)
    }

    /// Create both directories and preallocate the destination to `size`
    /// bytes by truncation.
    pub async fn prepare(&self, size: u64) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.dest_dir)
            .await
            .map_err(|source| EngineError::CreateDir {
                path: self.dest_dir.clone(),
                source,
            })?;
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|source| EngineError::CreateDir {
                path: self.temp_dir.clone(),
                source,
            })?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.dest_tmp)
            .await
            .map_err(|source| EngineError::CreateFile {
                path: self.dest_tmp.clone(),
                source,
            })?;
        file.set_len(size)
            .await
            .map_err(|source| EngineError::Truncate {
                path: self.dest_tmp.clone(),
                source,
            })?;
        Ok(())
    }

    /// Copy every segment file, in order, into the preallocated destination
    /// at its segment's absolute start offset. `spans` is indexed by
    /// segment id.
    pub async fn merge(&self, spans: &[ByteSpan]) -> Result<(), EngineError> {
        // Verify every part before touching the destination.
        for id in 0..spans.len() as u64 {
            let path = self.segment_path(id);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(EngineError::SegmentFileMissing { path });
            }
        }
        if !tokio::fs::try_exists(&self.dest_tmp).await.unwrap_or(false) {
            return Err(EngineError::DestinationFileMissing {
                path: self.dest_tmp.clone(),
            });
        }

        info!(
            total_segments = spans.len(),
            "merging segments into {:?}", self.dest_tmp
        );

        let mut dest = OpenOptions::new()
            .write(true)
            .open(&self.dest_tmp)
            .await
            .map_err(|source| EngineError::OpenFile {
                path: self.dest_tmp.clone(),
                source,
            })?;

        let mut buffer = vec![0u8; 1024 * 1024];
        for (id, span) in spans.iter().enumerate() {
            let id = id as u64;
            let path = self.segment_path(id);
            let mut part = File::open(&path)
                .await
                .map_err(|source| EngineError::OpenFile { path, source })?;

            dest.seek(SeekFrom::Start(span.start))
                .await
                .map_err(EngineError::Merge)?;

            let expected = span.len();
            let mut copied: u64 = 0;
            loop {
                let n = part.read(&mut buffer).await.map_err(EngineError::Merge)?;
                if n == 0 {
                    break;
                }
                dest.write_all(&buffer[..n])
                    .await
                    .map_err(EngineError::Merge)?;
                copied += n as u64;
            }
            if copied != expected {
                return Err(EngineError::Merge(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("segment {id} holds {copied} bytes, expected {expected}"),
                )));
            }
        }

        dest.flush().await.map_err(EngineError::Merge)?;
        dest.sync_all().await.map_err(EngineError::Merge)?;
        Ok(())
    }

    /// Rename the finished file into place and drop the temp directory.
    pub async fn finalize(&self) -> Result<PathBuf, EngineError> {
        tokio::fs::rename(&self.dest_tmp, &self.final_path)
            .await
            .map_err(|source| EngineError::Rename {
                from: self.dest_tmp.clone(),
                to: self.final_path.clone(),
                source,
            })?;
        if let Err(e) = tokio::fs::remove_dir_all(&self.temp_dir).await {
            warn!("failed to remove temp dir {:?}: {e}", self.temp_dir);
        }
        info!("download finished: {:?}", self.final_path);
        Ok(self.final_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parget_types::EngineConfig;

    fn test_config(root: &std::path::Path) -> EngineConfig {
        EngineConfig {
            download_root: root.join("downloads"),
            temp_root: root.join("tmp"),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn paths_follow_category_and_id() {
        let cfg = test_config(std::path::Path::new("/x"));
        let id = Uuid::nil();
        let layout = DownloadLayout::new(&cfg, "movie.mkv", &id);
        assert_eq!(
            layout.final_path,
            PathBuf::from("/x/downloads/Video/movie.mkv")
        );
        assert_eq!(
            layout.dest_tmp,
            PathBuf::from("/x/downloads/Video/movie.mkv.tmpDownload")
        );
        assert!(layout.segment_path(3).ends_with("3.seg"));
    }

    #[tokio::test]
    async fn prepare_preallocates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let layout = DownloadLayout::new(&cfg, "data.txt", &Uuid::new_v4());

        layout.prepare(4096).await.unwrap();

        let meta = tokio::fs::metadata(&layout.dest_tmp).await.unwrap();
        assert_eq!(meta.len(), 4096);
        assert!(layout.dest_tmp.parent().unwrap().ends_with("Document"));
    }

    #[tokio::test]
    async fn merge_concatenates_segments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let layout = DownloadLayout::new(&cfg, "data.bin", &Uuid::new_v4());

        let segment_size = 4u64;
        let total_size = 10u64;
        layout.prepare(total_size).await.unwrap();

        let body: Vec<u8> = (0..total_size as u8).collect();
        for (id, part) in body.chunks(segment_size as usize).enumerate() {
            tokio::fs::write(layout.segment_path(id as u64), part)
                .await
                .unwrap();
        }

        let spans = [
            ByteSpan::new(0, 4),
            ByteSpan::new(4, 8),
            ByteSpan::new(8, 10),
        ];
        layout.merge(&spans).await.unwrap();
        let path = layout.finalize().await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), body);
        assert!(!tokio::fs::try_exists(&layout.temp_dir).await.unwrap());
    }

    #[tokio::test]
    async fn merge_rejects_missing_segment() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let layout = DownloadLayout::new(&cfg, "data.bin", &Uuid::new_v4());
        layout.prepare(8).await.unwrap();

        tokio::fs::write(layout.segment_path(0), [1, 2, 3, 4])
            .await
            .unwrap();

        let spans = [ByteSpan::new(0, 4), ByteSpan::new(4, 8)];
        let err = layout.merge(&spans).await.unwrap_err();
        assert!(matches!(err, EngineError::SegmentFileMissing { .. }));
    }

    #[tokio::test]
    async fn merge_rejects_short_segment() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let layout = DownloadLayout::new(&cfg, "data.bin", &Uuid::new_v4());
        layout.prepare(8).await.unwrap();

        tokio::fs::write(layout.segment_path(0), [1, 2, 3, 4])
            .await
            .unwrap();
        tokio::fs::write(layout.segment_path(1), [5, 6])
            .await
            .unwrap();

        let spans = [ByteSpan::new(0, 4), ByteSpan::new(4, 8)];
        let err = layout.merge(&spans).await.unwrap_err();
        assert!(matches!(err, EngineError::Merge(_)));
    }
}
