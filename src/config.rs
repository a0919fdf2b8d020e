//! Sweep configuration: embedded defaults, an optional TOML file, and
//! command-line / environment overrides, in increasing precedence.

use crate::compress::{Bzip2Compressor, DEFAULT_LEVEL};
use crate::error::{Result, SweepError};
use crate::patterns::{build_categories, default_categories, CategoryConfig, FileCategory};
use crate::sweeper::{sweep, SweepOptions, SweepReport};
use crate::time::{parse_duration, RetentionFilter, DEFAULT_RETENTION_DAYS};

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retention may be written as a bare number of days or a duration string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RetentionValue {
    Days(i64),
    Text(String),
}

impl RetentionValue {
    fn to_duration(&self) -> Result<Duration> {
        match self {
            RetentionValue::Days(days) if *days > 0 => parse_duration(&days.to_string()),
            RetentionValue::Days(days) => Err(SweepError::config(format!(
                "retention must be a positive number of days, got {}",
                days
            ))),
            RetentionValue::Text(text) => parse_duration(text),
        }
    }
}

/// Layout of the optional TOML config file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    root: Option<PathBuf>,
    retention: Option<RetentionValue>,
    jobs: Option<usize>,
    level: Option<u32>,
    verify: Option<bool>,
    lock: Option<bool>,
    category: Option<Vec<CategoryConfig>>,
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub retention: Option<String>,
    pub jobs: Option<usize>,
    pub level: Option<u32>,
    pub no_verify: bool,
    pub lock: bool,
}

/// Fully resolved settings for a run
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub root: PathBuf,
    pub retention: Duration,
    pub categories: Vec<FileCategory>,
    pub jobs: usize,
    pub level: u32,
    pub verify: bool,
    pub lock: bool,
}

impl SweepConfig {
    /// Settings with the built-in category table and a 182 day retention.
    pub fn with_defaults(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(SweepConfig {
            root: root.into(),
            retention: parse_duration(&DEFAULT_RETENTION_DAYS.to_string())?,
            categories: default_categories()?,
            jobs: 1,
            level: DEFAULT_LEVEL,
            verify: true,
            lock: false,
        })
    }

    /// Resolve settings from an optional config file plus overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let file = match config_path {
            Some(path) => read_config_file(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, overrides)
    }

    /// Same as `load`, with the config file given as TOML text.
    pub fn from_toml(text: &str, overrides: Overrides) -> Result<Self> {
        let file: FileConfig = toml::from_str(text)
            .map_err(|e| SweepError::config(format!("invalid config: {}", e)))?;
        Self::resolve(file, overrides)
    }

    fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self> {
        let root = overrides.root.or(file.root).ok_or_else(|| {
            SweepError::config(
                "no archive root configured; set ARCHIVE_SWEEPER_ROOT, --root, or `root` in the config file",
            )
        })?;

        let retention = match (overrides.retention, file.retention) {
            (Some(text), _) => parse_duration(&text)?,
            (None, Some(value)) => value.to_duration()?,
            (None, None) => parse_duration(&DEFAULT_RETENTION_DAYS.to_string())?,
        };
        // Reject sub-day and zero thresholds here rather than at sweep time
        RetentionFilter::new(retention)?;

        let categories = match file.category {
            Some(tables) => build_categories(tables)?,
            None => default_categories()?,
        };

        let jobs = overrides.jobs.or(file.jobs).unwrap_or(1);
        if jobs == 0 {
            return Err(SweepError::config("jobs must be at least 1"));
        }

        let level = overrides.level.or(file.level).unwrap_or(DEFAULT_LEVEL);
        let verify = !overrides.no_verify && file.verify.unwrap_or(true);
        let lock = overrides.lock || file.lock.unwrap_or(false);

        let config = SweepConfig {
            root,
            retention,
            categories,
            jobs,
            level,
            verify,
            lock,
        };
        config.compressor()?;
        Ok(config)
    }

    pub fn filter(&self) -> Result<RetentionFilter> {
        RetentionFilter::new(self.retention)
    }

    pub fn compressor(&self) -> Result<Bzip2Compressor> {
        Bzip2Compressor::new(self.level, self.verify)
    }

    pub fn options(&self, dry_run: bool, progress: bool) -> SweepOptions {
        SweepOptions {
            jobs: self.jobs,
            dry_run,
            lock: self.lock,
            progress,
        }
    }

    /// Sweep the configured root with the bzip2 compressor.
    pub fn run(&self, dry_run: bool, progress: bool) -> Result<SweepReport> {
        let filter = self.filter()?;
        let compressor = self.compressor()?;
        sweep(
            &self.root,
            &self.categories,
            &filter,
            self.options(dry_run, progress),
            &compressor,
        )
    }
}

fn read_config_file(path: &Path) -> Result<FileConfig> {
    let text = fs::read_to_string(path).map_err(|e| {
        SweepError::config(format!("cannot read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&text)
        .map_err(|e| SweepError::config(format!("invalid config file {}: {}", path.display(), e)))
}
