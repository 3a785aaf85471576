//! Shared types for parget
//!
//! This crate contains the plain data structures used across the core
//! engine and the CLI: byte spans, resource metadata, engine configuration,
//! progress statistics and broadcast events.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Suffix carried by the destination file until the download completes.
pub const TEMP_EXT: &str = ".tmpDownload";

/// Extension of per-segment backing files in the temp directory.
pub const SEG_EXT: &str = ".seg";

// ============================================================================
// Byte spans
// ============================================================================

/// A half-open byte interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

impl ByteSpan {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "span start must not exceed end");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `other` starts exactly where this span ends.
    pub fn adjoins(&self, other: &ByteSpan) -> bool {
        self.end == other.start
    }
}

// ============================================================================
// Resource metadata
// ============================================================================

/// Immutable description of the remote resource, produced by the HEAD probe.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub url: Url,
    pub filename: String,
    /// Total byte size from `Content-Length`.
    pub size: u64,
    /// Whether the origin advertised `Accept-Ranges: bytes`.
    pub supports_ranges: bool,
}

// ============================================================================
// Download categories
// ============================================================================

/// Destination subfolder class, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Video,
    Music,
    Program,
    Document,
    Compressed,
    General,
}

const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mov", ".mkv", ".wmv", ".flv", ".webm", ".mpeg", ".mpg",
    ".3gp", ".m4v", ".ts",
];

const MUSIC_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".aac", ".ogg", ".flac", ".m4a", ".wma", ".aiff", ".opus",
    ".mid",
];

const PROGRAM_EXTENSIONS: &[&str] = &[
    ".exe", ".msi", ".apk", ".dmg", ".deb", ".rpm", ".bin", ".jar", ".py",
    ".sh", ".bat",
];

const DOCUMENT_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx", ".txt", ".csv",
    ".rtf", ".md",
];

const COMPRESSED_EXTENSIONS: &[&str] = &[
    ".zip", ".tar", ".gz", ".bz2", ".7z", ".rar", ".xz", ".tgz", ".tbz",
    ".zipx",
];

impl Category {
    /// Classify by file extension, including the leading dot. Matching is
    /// case-sensitive; anything unrecognized falls back to `General`.
    pub fn for_extension(ext: &str) -> Self {
        if VIDEO_EXTENSIONS.contains(&ext) {
            Category::Video
        } else if MUSIC_EXTENSIONS.contains(&ext) {
            Category::Music
        } else if PROGRAM_EXTENSIONS.contains(&ext) {
            Category::Program
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            Category::Document
        } else if COMPRESSED_EXTENSIONS.contains(&ext) {
            Category::Compressed
        } else {
            Category::General
        }
    }

    /// Classify a filename by its extension.
    pub fn for_filename(filename: &str) -> Self {
        match filename.rfind('.') {
            Some(idx) => Self::for_extension(&filename[idx..]),
            None => Category::General,
        }
    }

    /// Name of the subfolder under the download root.
    pub fn subfolder(&self) -> &'static str {
        match self {
            Category::Video => "Video",
            Category::Music => "Music",
            Category::Program => "Program",
            Category::Document => "Document",
            Category::Compressed => "Compressed",
            Category::General => "General",
        }
    }
}

// ============================================================================
// Engine configuration
// ============================================================================

/// Tunables for a download. `Default` carries the stock values; the CLI
/// overrides individual fields from flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Root under which category subfolders are created.
    pub download_root: PathBuf,
    /// Root for per-download temp directories.
    pub temp_root: PathBuf,
    /// Fixed segment size in bytes.
    pub segment_size: u64,
    /// In-memory buffer a chunk worker fills before each positional write.
    pub buffer_size: usize,
    /// Upper bound on a single claimed chunk.
    pub max_chunk_size: u64,
    /// Admission bound for the segment pool.
    pub max_concurrent_segments: usize,
    /// Admission bound for chunk workers within one segment.
    pub max_concurrent_chunks: usize,
    /// Transient failures tolerated per claimed range before the download fails.
    pub chunk_retry_limit: u32,
    /// Sampler tick interval.
    pub stats_tick: Duration,
    /// Hard pacing ceiling in bytes/sec.
    pub max_bandwidth: u64,
    /// Optional user ceiling in bytes/sec, below `max_bandwidth`.
    pub max_download_speed: Option<u64>,
    /// Per-request timeout on the HTTP client.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Overall wall-clock deadline for the whole download.
    pub download_deadline: Option<Duration>,
    pub user_agent: String,
}

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X x.y; rv:10.0) Gecko/20100101 Firefox/10.0";

impl Default for EngineConfig {
    fn default() -> Self {
        let download_root = dirs::download_dir().unwrap_or_else(|| PathBuf::from("."));
        let temp_root = download_root.join(".temp");
        Self {
            download_root,
            temp_root,
            segment_size: 5 * 1024 * 1024,
            buffer_size: 1024 * 1024,
            max_chunk_size: 1024 * 1024,
            max_concurrent_segments: 20,
            max_concurrent_chunks: 2,
            chunk_retry_limit: 3,
            stats_tick: Duration::from_secs(1),
            max_bandwidth: 50 * 1024 * 1024,
            max_download_speed: None,
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            download_deadline: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

// ============================================================================
// Statistics & events
// ============================================================================

/// Snapshot computed by the stats sampler once per tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStats {
    pub bytes_downloaded: u64,
    pub bytes_written: u64,
    pub total_size: u64,
    /// Bytes/sec received over the last tick.
    pub download_speed: f64,
    /// Bytes/sec written, measured against accumulated write-syscall time.
    pub disk_write_speed: f64,
    /// Fraction of `total_size` received, in `[0, 1]`.
    pub progress: f32,
    /// Progress counted from fully completed segments only, resistant to
    /// in-flight rollback.
    pub consistent_progress: f32,
    pub completed_segments: u64,
    pub total_segments: u64,
    pub elapsed: Duration,
    pub eta: Option<Duration>,
}

/// Events broadcast by the engine while a download runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Progress { stats: DownloadStats },
    SegmentStarted { id: u64 },
    SegmentCompleted { id: u64 },
    Completed { path: PathBuf },
    Failed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_len_and_adjacency() {
        let a = ByteSpan::new(0, 10);
        let b = ByteSpan::new(10, 10);
        assert_eq!(a.len(), 10);
        assert!(b.is_empty());
        assert!(a.adjoins(&b));
    }

    #[test]
    fn category_mapping() {
        assert_eq!(Category::for_extension(".mkv"), Category::Video);
        assert_eq!(Category::for_extension(".flac"), Category::Music);
        assert_eq!(Category::for_extension(".deb"), Category::Program);
        assert_eq!(Category::for_extension(".pdf"), Category::Document);
        assert_eq!(Category::for_extension(".tar"), Category::Compressed);
        assert_eq!(Category::for_extension(".iso"), Category::General);
        // case-sensitive by design
        assert_eq!(Category::for_extension(".MP4"), Category::General);
    }

    #[test]
    fn category_from_filename() {
        assert_eq!(Category::for_filename("movie.final.mp4"), Category::Video);
        assert_eq!(Category::for_filename("README"), Category::General);
        assert_eq!(Category::for_filename("archive.tar"), Category::Compressed);
    }

    #[test]
    fn config_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.segment_size, 5 * 1024 * 1024);
        assert_eq!(cfg.buffer_size, 1024 * 1024);
        assert_eq!(cfg.max_concurrent_segments, 20);
        assert_eq!(cfg.max_concurrent_chunks, 2);
        assert_eq!(cfg.stats_tick, Duration::from_secs(1));
        assert_eq!(cfg.max_bandwidth, 50 * 1024 * 1024);
    }
}
