//! The segmented download engine
//!
//! Three levels of fan-out: a downloader owns a bounded pool of segments,
//! each segment owns a bounded pool of chunk workers, and every chunk is
//! one ranged HTTP request. Accounting and pacing run as a single-owner
//! task fed by worker messages.

pub mod accounting;
mod chunk_worker;
pub mod downloader;
pub mod range_layout;
pub mod rate;
pub mod resume;
mod segment;
mod segment_file;

pub use accounting::{Counters, ProgressUpdate};
pub use downloader::Downloader;
pub use rate::{RateController, RateHandle};
pub use resume::ResumeState;
