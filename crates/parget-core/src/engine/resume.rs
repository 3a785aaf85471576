//! Resume metadata
//!
//! A `state.json` sidecar in the per-download temp directory records the
//! completed intervals of every segment. On restart the temp root is
//! scanned for a sidecar matching the URL so the same temp directory (and
//! its segment files) can be reused.

use parget_types::ByteSpan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeState {
    pub url: String,
    pub size: u64,
    pub segment_size: u64,
    /// Completed intervals per segment id, in absolute resource offsets.
    #[serde(default)]
    pub segments: BTreeMap<u64, Vec<ByteSpan>>,
}

impl ResumeState {
    pub fn new(url: &str, size: u64, segment_size: u64) -> Self {
        Self {
            url: url.to_string(),
            size,
            segment_size,
            segments: BTreeMap::new(),
        }
    }

    /// A sidecar is only reusable for the same resource cut the same way.
    pub fn matches(&self, url: &str, size: u64, segment_size: u64) -> bool {
        self.url == url && self.size == size && self.segment_size == segment_size
    }

    pub fn completed_for(&self, segment: u64) -> Vec<ByteSpan> {
        self.segments.get(&segment).cloned().unwrap_or_default()
    }

    /// Persist via write-then-rename so a crash never leaves a torn sidecar.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await
    }

    pub async fn load(path: &Path) -> Option<Self> {
        let data = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&data).ok()
    }
}

/// Look under `temp_root` for a previous run of the same download. Returns
/// the download id to use and, when found, the recorded state.
pub async fn discover(
    temp_root: &Path,
    url: &str,
    size: u64,
    segment_size: u64,
) -> (Uuid, Option<ResumeState>) {
    let mut entries = match tokio::fs::read_dir(temp_root).await {
        Ok(entries) => entries,
        Err(_) => return (Uuid::new_v4(), None),
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| Uuid::parse_str(name).ok())
        else {
            continue;
        };
        if let Some(state) = ResumeState::load(&entry.path().join(STATE_FILE)).await {
            if state.matches(url, size, segment_size) {
                debug!(%id, "found resumable state");
                return (id, Some(state));
            }
        }
    }

    (Uuid::new_v4(), None)
}
