//! Candidate discovery and the compression sweep.
//!
//! A sweep walks each category's subdirectory in declaration order, keeps the
//! regular files whose names match the category globs and whose mtime is past
//! the retention cutoff, and compresses them. Compressed siblings no longer
//! match any glob, which is the only thing that makes a second sweep a no-op;
//! there is no state store.
//!
//! The first failure ends the run: nothing new is started, work already done
//! stays done, and the error names the offending path.

use crate::compress::{is_staging_name, CompressOutcome, Compressor};
use crate::error::{Result, SweepError};
use crate::lock::RootLock;
use crate::patterns::FileCategory;
use crate::time::{AgeStats, RetentionFilter};

use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Staging files younger than this may belong to a run still in progress.
pub const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// Runtime flags for one sweep
#[derive(Debug, Clone, Copy)]
pub struct SweepOptions {
    /// Files compressed at once within a category; 1 is strictly sequential.
    pub jobs: usize,
    pub dry_run: bool,
    /// Hold an advisory lock on the root for the whole run.
    pub lock: bool,
    pub progress: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        SweepOptions {
            jobs: 1,
            dry_run: false,
            lock: false,
            progress: false,
        }
    }
}

/// A file old enough to compress
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Counts for one category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryReport {
    pub directory: PathBuf,
    /// Files compressed, or that would be in a dry run.
    pub compressed: usize,
    pub skipped_young: usize,
    /// Staging files left by an interrupted run and removed (or that would be).
    pub reclaimed_partials: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// What one walk of a category directory found
#[derive(Debug, Clone, Default)]
pub struct CategoryScan {
    pub candidates: Vec<Candidate>,
    pub stale_partials: Vec<PathBuf>,
}

/// Result of a successful sweep
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub categories: Vec<CategoryReport>,
    pub cutoff: SystemTime,
    pub dry_run: bool,
}

impl SweepReport {
    pub fn total_compressed(&self) -> usize {
        self.categories.iter().map(|c| c.compressed).sum()
    }

    pub fn total_skipped_young(&self) -> usize {
        self.categories.iter().map(|c| c.skipped_young).sum()
    }

    pub fn total_reclaimed_partials(&self) -> usize {
        self.categories.iter().map(|c| c.reclaimed_partials).sum()
    }

    pub fn total_bytes_in(&self) -> u64 {
        self.categories.iter().map(|c| c.bytes_in).sum()
    }

    pub fn total_bytes_out(&self) -> u64 {
        self.categories.iter().map(|c| c.bytes_out).sum()
    }

    pub fn category(&self, directory: impl AsRef<Path>) -> Option<&CategoryReport> {
        self.categories
            .iter()
            .find(|c| c.directory == directory.as_ref())
    }
}

/// Check that the archive root exists and is a directory
pub fn validate_root(root: &Path) -> Result<PathBuf> {
    let metadata = fs::metadata(root).map_err(|e| {
        SweepError::config(format!(
            "archive root {} is not accessible: {}",
            root.display(),
            e
        ))
    })?;
    if !metadata.is_dir() {
        return Err(SweepError::config(format!(
            "archive root {} is not a directory",
            root.display()
        )));
    }
    Ok(root.to_path_buf())
}

/// Collect the candidates of one category, in walk order (sorted by file
/// name at each level). Matching files that are too young only bump `stats`.
pub fn find_candidates(
    root: &Path,
    category: &FileCategory,
    filter: &RetentionFilter,
    stats: &mut AgeStats,
) -> Result<Vec<Candidate>> {
    scan_category(root, category, filter, stats).map(|scan| scan.candidates)
}

/// Walk one category directory for candidates and for staging files an
/// interrupted run left behind.
pub fn scan_category(
    root: &Path,
    category: &FileCategory,
    filter: &RetentionFilter,
    stats: &mut AgeStats,
) -> Result<CategoryScan> {
    let dir = root.join(category.directory());

    match fs::metadata(&dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(SweepError::access(
                &dir,
                io::Error::new(io::ErrorKind::InvalidInput, "category path is not a directory"),
            ));
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(directory = %dir.display(), "category directory does not exist, nothing to sweep");
            return Ok(CategoryScan::default());
        }
        Err(err) => return Err(SweepError::access(&dir, err)),
    }

    let walker = WalkBuilder::new(&dir)
        .hidden(false)
        // Report trees carry no ignore files worth honoring
        .parents(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let stale_before = SystemTime::now()
        .checked_sub(STALE_STAGING_AGE)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut scan = CategoryScan::default();
    for result in walker {
        let entry = result.map_err(|err| walk_error(&dir, err))?;

        // Symlinks and directories are never compressed
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let path = entry.path();
        if is_staging_name(entry.file_name()) {
            let modified = fs::symlink_metadata(path)
                .and_then(|m| m.modified())
                .map_err(|e| SweepError::access(path, e))?;
            if modified < stale_before {
                scan.stale_partials.push(path.to_path_buf());
            }
            continue;
        }
        if !category.matches(path) {
            continue;
        }

        let metadata = fs::symlink_metadata(path).map_err(|e| SweepError::access(path, e))?;
        let modified = metadata.modified().map_err(|e| SweepError::access(path, e))?;

        stats.matched += 1;
        if filter.passes(modified) {
            stats.eligible += 1;
            scan.candidates.push(Candidate {
                path: path.to_path_buf(),
                size: metadata.len(),
                modified,
            });
        } else {
            stats.too_young += 1;
            debug!(path = %path.display(), "younger than retention threshold, skipping");
        }
    }

    Ok(scan)
}

/// Map a walk failure to the entry it happened on, falling back to the
/// category directory.
fn walk_error(dir: &Path, err: ignore::Error) -> SweepError {
    let path = walk_error_path(&err).unwrap_or(dir).to_path_buf();
    let message = err.to_string();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, message));
    SweepError::access(&path, source)
}

fn walk_error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            walk_error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}

/// Remove staging files from interrupted runs. A failure here ends the run
/// like any other access error.
fn reclaim_partials(partials: &[PathBuf], dry_run: bool) -> Result<usize> {
    for partial in partials {
        if dry_run {
            info!(path = %partial.display(), "would remove stale staging file");
            continue;
        }
        match fs::remove_file(partial) {
            Ok(()) => info!(path = %partial.display(), "removed stale staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SweepError::access(partial, e)),
        }
    }
    Ok(partials.len())
}

/// Sweep every category under `root`.
pub fn sweep<C: Compressor>(
    root: &Path,
    categories: &[FileCategory],
    filter: &RetentionFilter,
    options: SweepOptions,
    compressor: &C,
) -> Result<SweepReport> {
    let root = validate_root(root)?;
    if options.jobs == 0 {
        return Err(SweepError::config("jobs must be at least 1"));
    }

    let _lock = if options.lock && !options.dry_run {
        Some(RootLock::acquire(&root)?)
    } else {
        None
    };

    let pool = if options.jobs > 1 {
        Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(options.jobs)
                .build()
                .map_err(|e| SweepError::config(format!("cannot start worker pool: {}", e)))?,
        )
    } else {
        None
    };

    let progress = if options.progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        bar
    } else {
        ProgressBar::hidden()
    };

    info!(
        root = %root.display(),
        threshold_days = filter.threshold_days(),
        cutoff = %filter.cutoff_display(),
        dry_run = options.dry_run,
        "starting sweep"
    );

    let mut reports = Vec::with_capacity(categories.len());
    for category in categories {
        progress.set_message(format!("Scanning {}", category.directory().display()));

        let mut stats = AgeStats::default();
        let CategoryScan {
            candidates,
            stale_partials,
        } = scan_category(&root, category, filter, &mut stats)?;

        let mut report = CategoryReport {
            directory: category.directory().to_path_buf(),
            skipped_young: stats.too_young,
            reclaimed_partials: reclaim_partials(&stale_partials, options.dry_run)?,
            ..CategoryReport::default()
        };

        if options.dry_run {
            for candidate in &candidates {
                info!(path = %candidate.path.display(), "would compress");
                report.compressed += 1;
                report.bytes_in += candidate.size;
            }
        } else if !candidates.is_empty() {
            progress.set_message(format!(
                "Compressing {} files in {}",
                candidates.len(),
                category.directory().display()
            ));
            let outcomes = match &pool {
                Some(pool) => compress_parallel(pool, &candidates, compressor, &progress)?,
                None => compress_sequential(&candidates, compressor, &progress)?,
            };
            for outcome in outcomes {
                report.compressed += 1;
                report.bytes_in += outcome.bytes_in;
                report.bytes_out += outcome.bytes_out;
            }
        }

        info!(
            category = %report.directory.display(),
            compressed = report.compressed,
            skipped_young = report.skipped_young,
            "category swept"
        );
        reports.push(report);
    }

    progress.finish_and_clear();

    Ok(SweepReport {
        categories: reports,
        cutoff: filter.cutoff(),
        dry_run: options.dry_run,
    })
}

fn compress_sequential<C: Compressor>(
    candidates: &[Candidate],
    compressor: &C,
    progress: &ProgressBar,
) -> Result<Vec<CompressOutcome>> {
    let mut outcomes = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let outcome = compressor.compress(&candidate.path).map_err(|err| {
            warn!(path = %candidate.path.display(), error = %err, "aborting sweep");
            err
        })?;
        progress.inc(1);
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Compress with bounded parallelism. Once any file fails no further file is
/// started; files already in flight finish. The reported error is the one of
/// the earliest candidate that failed.
fn compress_parallel<C: Compressor>(
    pool: &rayon::ThreadPool,
    candidates: &[Candidate],
    compressor: &C,
    progress: &ProgressBar,
) -> Result<Vec<CompressOutcome>> {
    let stop = AtomicBool::new(false);

    let results: Vec<Option<Result<CompressOutcome>>> = pool.install(|| {
        candidates
            .par_iter()
            .map(|candidate| {
                if stop.load(Ordering::SeqCst) {
                    return None;
                }
                let result = compressor.compress(&candidate.path);
                if result.is_err() {
                    stop.store(true, Ordering::SeqCst);
                }
                progress.inc(1);
                Some(result)
            })
            .collect()
    });

    let mut outcomes = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results.into_iter().flatten() {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) if first_error.is_none() => first_error = Some(err),
            Err(err) => debug!(error = %err, "additional failure after abort"),
        }
    }

    match first_error {
        Some(err) => {
            warn!(error = %err, "aborting sweep");
            Err(err)
        }
        None => Ok(outcomes),
    }
}
