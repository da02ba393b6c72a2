//! Append-only output with size-based rollover.
//!
//! The active file is held open with an exclusive advisory lock for the
//! sink's lifetime. When the cumulative size reaches the configured
//! threshold, the file's contents are compressed into a numbered
//! `<path>.<N>.zst` archive (written to a temp file, then renamed, so
//! readers never see a partial archive), the active file is truncated in
//! place, and the oldest archives are pruned down to the retention bound.
//!
//! Rollover never touches the input tailer's checkpoint; bounded archive
//! retention replaces the upstream-coupled reset.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Errors produced by the rotating sink.
#[derive(Debug)]
pub enum SinkError {
    /// Could not create the output directory or open the output file.
    Setup {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Another process holds the output file lock.
    Locked { path: PathBuf },
    /// A write or rollover step failed.
    Io { source: std::io::Error },
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Setup { path, source } => {
                write!(f, "failed to set up output file {}: {}", path.display(), source)
            }
            SinkError::Locked { path } => {
                write!(
                    f,
                    "output file {} is locked by another process",
                    path.display()
                )
            }
            SinkError::Io { source } => write!(f, "I/O error on output file: {source}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Setup { source, .. } => Some(source),
            SinkError::Locked { .. } => None,
            SinkError::Io { source } => Some(source),
        }
    }
}

/// Append-only writer with size-based rollover and bounded retention.
pub struct RotatingSink {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    keep_archives: usize,
}

impl RotatingSink {
    /// Open (creating parent directories and the file as needed) and take
    /// the exclusive lock. Setup failures here are meant to be fatal at
    /// startup.
    pub fn open(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        keep_archives: usize,
    ) -> Result<Self, SinkError> {
        let path = path.into();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| SinkError::Setup {
                    path: path.clone(),
                    source: e,
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::Setup {
                path: path.clone(),
                source: e,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| SinkError::Locked { path: path.clone() })?;

        let written = file
            .metadata()
            .map_err(|e| SinkError::Setup {
                path: path.clone(),
                source: e,
            })?
            .len();

        Ok(Self {
            path,
            file,
            written,
            max_bytes,
            keep_archives,
        })
    }

    /// Write one document plus the record separator. Rolls over before
    /// returning once the size threshold is reached, so no later append
    /// straddles the boundary.
    pub fn append(&mut self, document: &str) -> Result<(), SinkError> {
        self.file
            .write_all(document.as_bytes())
            .and_then(|()| self.file.write_all(b"\n"))
            .map_err(|e| SinkError::Io { source: e })?;
        self.written += document.len() as u64 + 1;

        if self.written >= self.max_bytes {
            self.rollover()?;
        }
        Ok(())
    }

    /// Bytes in the active file.
    #[allow(dead_code)]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Archive the active file and truncate it in place. The append handle
    /// (and its lock) stays open across the rollover.
    fn rollover(&mut self) -> Result<(), SinkError> {
        let ordinal = next_ordinal(&self.path);
        let archive = archive_path(&self.path, ordinal);

        let contents = fs::read(&self.path).map_err(|e| SinkError::Io { source: e })?;
        let compressed =
            zstd::encode_all(contents.as_slice(), 3).map_err(|e| SinkError::Io { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output");
        let tmp = dir.join(format!(".{}.zst.tmp.{}", file_name, std::process::id()));
        fs::write(&tmp, compressed).map_err(|e| SinkError::Io { source: e })?;
        fs::rename(&tmp, &archive).map_err(|e| SinkError::Io { source: e })?;

        self.file
            .set_len(0)
            .map_err(|e| SinkError::Io { source: e })?;
        self.written = 0;

        tracing::info!(
            archive = %archive.display(),
            bytes = contents.len(),
            "rolled over output file"
        );

        self.prune_archives();
        Ok(())
    }

    /// Delete oldest archives until at most `keep_archives` remain.
    /// Individual deletion failures are logged and skipped.
    fn prune_archives(&self) {
        if self.keep_archives == 0 {
            return;
        }
        let archives = existing_archives(&self.path);
        if archives.len() <= self.keep_archives {
            return;
        }
        let excess = archives.len() - self.keep_archives;
        for (ordinal, path) in archives.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(
                    error = %e,
                    archive = %path.display(),
                    "failed to prune archive"
                );
            } else {
                tracing::debug!(ordinal, archive = %path.display(), "pruned archive");
            }
        }
    }
}

fn archive_path(base: &Path, ordinal: u64) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{ordinal}.zst"));
    PathBuf::from(name)
}

/// Next archive ordinal: one past the highest existing.
fn next_ordinal(base: &Path) -> u64 {
    existing_archives(base)
        .last()
        .map(|(n, _)| n + 1)
        .unwrap_or(1)
}

/// All `<base>.<N>.zst` archives, sorted by ordinal ascending.
fn existing_archives(base: &Path) -> Vec<(u64, PathBuf)> {
    let pattern = format!("{}.*.zst", base.display());
    let mut found = Vec::new();
    match glob::glob(&pattern) {
        Ok(paths) => {
            for path in paths.flatten() {
                if let Some(ordinal) = archive_ordinal(base, &path) {
                    found.push((ordinal, path));
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, pattern = %pattern, "bad archive glob pattern");
        }
    }
    found.sort_by_key(|(ordinal, _)| *ordinal);
    found
}

/// Parse the ordinal out of `<base>.<N>.zst`, if `candidate` has that shape.
fn archive_ordinal(base: &Path, candidate: &Path) -> Option<u64> {
    let base_name = base.file_name()?.to_str()?;
    let name = candidate.file_name()?.to_str()?;
    name.strip_prefix(base_name)?
        .strip_prefix('.')?
        .strip_suffix(".zst")?
        .parse()
        .ok()
}
