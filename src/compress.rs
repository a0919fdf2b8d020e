//! In-place bzip2 compression of a single artifact.
//!
//! The compressed sibling is written to a temporary file in the same
//! directory, synced, optionally verified, and renamed over `<name>.bz2`.
//! The original is removed only after that rename succeeds.

use crate::error::{Result, SweepError};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use filetime::FileTime;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Suffix appended to compressed siblings.
pub const COMPRESSED_SUFFIX: &str = ".bz2";

/// Same default as the bzip2 command line tool.
pub const DEFAULT_LEVEL: u32 = 9;

/// Staging files are named `.archive-sweeper-XXXXXX.partial`.
pub const STAGING_PREFIX: &str = ".archive-sweeper-";
pub const STAGING_SUFFIX: &str = ".partial";

const VERIFY_CHUNK: usize = 64 * 1024;

/// Sizes of one successful compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressOutcome {
    pub output: PathBuf,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Turns one uncompressed file into its compressed sibling.
///
/// Implementations must leave the original untouched on failure and remove it
/// only once the sibling is completely written.
pub trait Compressor: Sync {
    fn compress(&self, path: &Path) -> Result<CompressOutcome>;
}

/// Path of the compressed sibling of `path`.
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(COMPRESSED_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Clone, Copy)]
pub struct Bzip2Compressor {
    level: u32,
    verify: bool,
}

impl Default for Bzip2Compressor {
    fn default() -> Self {
        Bzip2Compressor {
            level: DEFAULT_LEVEL,
            verify: true,
        }
    }
}

impl Bzip2Compressor {
    pub fn new(level: u32, verify: bool) -> Result<Self> {
        if !(1..=9).contains(&level) {
            return Err(SweepError::config(format!(
                "compression level must be between 1 and 9, got {}",
                level
            )));
        }
        Ok(Bzip2Compressor { level, verify })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    fn encode(&self, path: &Path, source: &File, staging: &NamedTempFile) -> Result<u64> {
        let mut reader = BufReader::new(source);
        let writer = BufWriter::new(staging.as_file());
        let mut encoder = BzEncoder::new(writer, Compression::new(self.level));

        let copied = copy_encoding(&mut reader, &mut encoder, path, staging.path())?;

        let writer = encoder
            .finish()
            .map_err(|e| SweepError::compression(path, e.to_string()))?;
        writer
            .into_inner()
            .map_err(|e| SweepError::access_via(path, staging.path(), e.into_error()))?;
        staging
            .as_file()
            .sync_all()
            .map_err(|e| SweepError::access_via(path, staging.path(), e))?;

        Ok(copied)
    }

    /// Verify the staged archive, give it the original's metadata, rename it
    /// over the sibling and remove the original. Dropping `staging` on any
    /// error deletes it.
    fn install(
        &self,
        path: &Path,
        metadata: &fs::Metadata,
        staging: NamedTempFile,
        parent: &Path,
    ) -> Result<PathBuf> {
        if self.verify {
            verify_archive(path, staging.path())?;
        }

        fs::set_permissions(staging.path(), metadata.permissions())
            .map_err(|e| SweepError::access_via(path, staging.path(), e))?;
        let mtime = FileTime::from_last_modification_time(metadata);
        filetime::set_file_mtime(staging.path(), mtime)
            .map_err(|e| SweepError::access_via(path, staging.path(), e))?;

        // Rename replaces an existing sibling, so a half-finished earlier run
        // is overwritten rather than reported.
        let output = compressed_path(path);
        staging
            .persist(&output)
            .map_err(|e| SweepError::access_via(path, &output, e.error))?;
        sync_dir(parent).map_err(|e| SweepError::access_via(path, parent, e))?;

        fs::remove_file(path).map_err(|e| SweepError::access(path, e))?;
        Ok(output)
    }
}

impl Compressor for Bzip2Compressor {
    fn compress(&self, path: &Path) -> Result<CompressOutcome> {
        let source = File::open(path).map_err(|e| SweepError::access(path, e))?;
        let metadata = source.metadata().map_err(|e| SweepError::access(path, e))?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let staging = staging_file(parent).map_err(|e| SweepError::access_via(path, parent, e))?;
        let bytes_in = self.encode(path, &source, &staging)?;
        drop(source);

        let output = self.install(path, &metadata, staging, parent)?;
        let bytes_out = fs::metadata(&output)
            .map_err(|e| SweepError::access_via(path, &output, e))?
            .len();
        debug!(
            path = %path.display(),
            bytes_in,
            bytes_out,
            "compressed"
        );

        Ok(CompressOutcome {
            output,
            bytes_in,
            bytes_out,
        })
    }
}

/// Whether `name` is a staging file left by this tool.
pub fn is_staging_name(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

fn staging_file(dir: &Path) -> io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)
}

/// Persist a rename by syncing the directory that holds it.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Like `io::copy`, but keeps read errors (the original) apart from write
/// errors (the encoder and staging file).
fn copy_encoding<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    source: &Path,
    staging: &Path,
) -> Result<u64> {
    let mut buf = vec![0u8; VERIFY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SweepError::access(source, e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| SweepError::access_via(source, staging, e))?;
        total += n as u64;
    }
    Ok(total)
}

/// Decode `archive` and compare it with `original`, chunk by chunk. Errors
/// name `original`.
pub fn verify_archive(original: &Path, archive: &Path) -> Result<()> {
    let original_file = File::open(original).map_err(|e| SweepError::access(original, e))?;
    let archive_file =
        File::open(archive).map_err(|e| SweepError::access_via(original, archive, e))?;
    let mut expected = BufReader::new(original_file);
    let mut decoded = BzDecoder::new(BufReader::new(archive_file));

    let mut want = vec![0u8; VERIFY_CHUNK];
    let mut got = vec![0u8; VERIFY_CHUNK];
    let mut offset = 0u64;
    loop {
        let n = read_full(&mut expected, &mut want).map_err(|e| SweepError::access(original, e))?;
        let m = read_full(&mut decoded, &mut got)
            .map_err(|e| SweepError::compression(original, format!("archive does not decode: {}", e)))?;
        if n != m || want[..n] != got[..m] {
            return Err(SweepError::compression(
                original,
                format!("archive content differs from original near byte {}", offset),
            ));
        }
        if n == 0 {
            return Ok(());
        }
        offset += n as u64;
    }
}

/// Fill `buf` as far as the reader allows; returns fewer bytes only at EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
