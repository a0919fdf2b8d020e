//! archive-sweeper - retention-driven compression of report artifacts
//!
//! A merge-tracking pipeline keeps writing `.changes`, `.patch` and
//! `.slipped-patch` reports under a data root. Once one of those files is older
//! than the retention threshold, the sweeper replaces it with a bzip2 sibling
//! (`<name>.bz2`) so the archive stays browsable but small.
//!
//! ## Layout
//!
//! - `patterns`: which subdirectories and file names are swept
//! - `time`: the retention threshold and age check
//! - `compress`: the atomic write-then-remove compression of one file
//! - `sweeper`: enumeration, strict-abort loop and the run report
//! - `config`: TOML / environment / CLI settings
//! - `lock`: optional advisory lock against overlapping runs

pub mod compress;
pub mod config;
pub mod error;
pub mod lock;
pub mod patterns;
pub mod sweeper;
pub mod time;

// Re-export commonly used items
pub use compress::{compressed_path, Bzip2Compressor, CompressOutcome, Compressor, COMPRESSED_SUFFIX};
pub use config::{Overrides, SweepConfig};
pub use error::{Result, SweepError};
pub use lock::RootLock;
pub use patterns::{default_categories, parse_categories, FileCategory};
pub use sweeper::{
    find_candidates, scan_category, sweep, validate_root, Candidate, CategoryReport, CategoryScan,
    SweepOptions, SweepReport,
};
pub use time::{parse_duration, AgeStats, RetentionFilter, DEFAULT_RETENTION_DAYS};
