//! parget core - segmented download engine
//!
//! Downloads one resource over HTTP/1.1 by splitting it into fixed-size
//! segments and each segment into dynamically claimed chunks, fetched by a
//! bounded pool of workers with adaptive bandwidth pacing. Segments are
//! written to per-segment backing files and merged into the preallocated
//! destination once every segment is complete.

pub mod engine;
mod error;
mod fs_layout;
mod probe;

pub use engine::{Downloader, ResumeState};
pub use error::EngineError;
pub use fs_layout::DownloadLayout;
pub use probe::probe;
