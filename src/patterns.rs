//! File categories and name-pattern matching, loaded from categories.toml.

use crate::compress::COMPRESSED_SUFFIX;
use crate::error::{Result, SweepError};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

// Embed the TOML file directly in the binary at compile time
const CATEGORIES_TOML: &str = include_str!("../categories.toml");

/// One class of report artifact: a subdirectory of the archive root and the
/// file-name globs that mark an uncompressed artifact in it.
#[derive(Debug, Clone)]
pub struct FileCategory {
    directory: PathBuf,
    patterns: Vec<String>,
    matcher: GlobSet,
}

/// Category as written in TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    pub directory: String,
    pub patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryTable {
    #[serde(default)]
    category: Vec<CategoryConfig>,
}

impl FileCategory {
    pub fn new<S: AsRef<str>>(directory: impl Into<PathBuf>, patterns: &[S]) -> Result<Self> {
        let directory = directory.into();
        validate_directory(&directory)?;

        if patterns.is_empty() {
            return Err(SweepError::config(format!(
                "category '{}' has no patterns",
                directory.display()
            )));
        }

        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    SweepError::config(format!(
                        "category '{}': invalid pattern '{}': {}",
                        directory.display(),
                        pattern,
                        e
                    ))
                })?;
            if could_match_compressed(pattern, &glob.compile_matcher()) {
                return Err(SweepError::config(format!(
                    "category '{}': pattern '{}' would also match compressed '{}' files",
                    directory.display(),
                    pattern,
                    COMPRESSED_SUFFIX
                )));
            }
            builder.add(glob);
            kept.push(pattern.to_string());
        }

        let matcher = builder.build().map_err(|e| {
            SweepError::config(format!(
                "category '{}': cannot build pattern set: {}",
                directory.display(),
                e
            ))
        })?;

        Ok(FileCategory {
            directory,
            patterns: kept,
            matcher,
        })
    }

    /// Subdirectory of the archive root, always relative.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check a file name (not a path) against the category's globs
    pub fn matches_name(&self, file_name: &str) -> bool {
        self.matcher.is_match(file_name)
    }

    /// Check the final component of `path` against the category's globs
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.matcher.is_match(Path::new(name)))
            .unwrap_or(false)
    }
}

impl TryFrom<CategoryConfig> for FileCategory {
    type Error = SweepError;

    fn try_from(config: CategoryConfig) -> Result<Self> {
        FileCategory::new(config.directory, config.patterns.as_slice())
    }
}

fn validate_directory(directory: &Path) -> Result<()> {
    if directory.as_os_str().is_empty() {
        return Err(SweepError::config("category directory must not be empty"));
    }
    for component in directory.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(SweepError::config(format!(
                    "category directory '{}' must be a relative path inside the archive root",
                    directory.display()
                )));
            }
        }
    }
    Ok(())
}

/// A glob that can match an already-compressed name would recompress archives
/// forever. A trailing `*` and globs matching a sample compressed name are
/// rejected; `?` and classes only ever match one character, never `.bz2`.
fn could_match_compressed(pattern: &str, matcher: &globset::GlobMatcher) -> bool {
    if pattern.ends_with('*') {
        return true;
    }
    ["report", "report.changes", "report.patch"]
        .iter()
        .any(|base| matcher.is_match(format!("{}{}", base, COMPRESSED_SUFFIX)))
}

/// Convert deserialized category tables, keeping declaration order.
pub fn build_categories(configs: Vec<CategoryConfig>) -> Result<Vec<FileCategory>> {
    if configs.is_empty() {
        return Err(SweepError::config("no categories configured"));
    }
    let categories = configs
        .into_iter()
        .map(FileCategory::try_from)
        .collect::<Result<Vec<_>>>()?;

    for (i, category) in categories.iter().enumerate() {
        if categories[..i]
            .iter()
            .any(|earlier| earlier.directory == category.directory)
        {
            return Err(SweepError::config(format!(
                "category directory '{}' is declared twice",
                category.directory.display()
            )));
        }
    }
    Ok(categories)
}

/// Parse `[[category]]` tables from TOML text
pub fn parse_categories(toml_text: &str) -> Result<Vec<FileCategory>> {
    let table: CategoryTable = toml::from_str(toml_text)
        .map_err(|e| SweepError::config(format!("failed to parse category table: {}", e)))?;
    build_categories(table.category)
}

/// The built-in changes/diffs/patches table
pub fn default_categories() -> Result<Vec<FileCategory>> {
    parse_categories(CATEGORIES_TOML)
}
