//! Checkpointed line source: the lazy, restartable sequence of newly
//! appended lines the driver loop polls each cycle.
//!
//! The read position is persisted as a byte offset next to the input file
//! (`<input>.offset` by default), so a restarted process resumes where it
//! left off. If the input file shrinks below the stored offset (upstream
//! rotation), reading restarts from the top; duplicate delivery after such
//! a reset is tolerated downstream.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Anything the driver loop can pull batches of new lines from.
pub trait LineSource {
    /// Every complete line appended since the last call. A read failure is
    /// transient: the caller retries the whole cycle later.
    fn next_batch(&mut self) -> std::io::Result<Vec<String>>;
}

/// File tailer with a persisted byte-offset checkpoint.
pub struct CheckpointedTail {
    path: PathBuf,
    checkpoint: PathBuf,
}

impl CheckpointedTail {
    /// Tail `path`, keeping the checkpoint at `<path>.offset`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut name = path.as_os_str().to_os_string();
        name.push(".offset");
        let checkpoint = PathBuf::from(name);
        Self { path, checkpoint }
    }

    /// Tail `path` with an explicit checkpoint location.
    pub fn with_checkpoint(path: impl Into<PathBuf>, checkpoint: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            checkpoint: checkpoint.into(),
        }
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint
    }

    /// A missing or malformed checkpoint file means "start from the top".
    fn load_offset(&self) -> u64 {
        fs::read_to_string(&self.checkpoint)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Atomic checkpoint write: temp file in the same directory, then rename.
    fn store_offset(&self, offset: u64) -> std::io::Result<()> {
        let dir = self.checkpoint.parent().unwrap_or(Path::new("."));
        let name = self
            .checkpoint
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("offset");
        let tmp = dir.join(format!(".{}.tmp.{}", name, std::process::id()));
        fs::write(&tmp, offset.to_string())?;
        fs::rename(&tmp, &self.checkpoint)
    }
}

impl LineSource for CheckpointedTail {
    fn next_batch(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();

        let stored = self.load_offset();
        let mut offset = stored;
        if len < offset {
            tracing::warn!(
                input = %self.path.display(),
                stored_offset = offset,
                file_len = len,
                "input file shrank below checkpoint, re-reading from start"
            );
            offset = 0;
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        // Only complete lines are consumed; a trailing fragment without a
        // newline stays in place for the next poll.
        let mut lines = Vec::new();
        let mut consumed = 0usize;
        for chunk in data.split_inclusive(|&b| b == b'\n') {
            if chunk.ends_with(b"\n") {
                consumed += chunk.len();
                let line = &chunk[..chunk.len() - 1];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
        }

        let new_offset = offset + consumed as u64;
        if new_offset != stored {
            self.store_offset(new_offset)?;
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn append(path: &Path, text: &str) {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn reads_all_lines_on_first_poll() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("mail.log");
        append(&input, "line one\nline two\n");

        let mut tail = CheckpointedTail::new(&input);
        assert_eq!(tail.next_batch().unwrap(), vec!["line one", "line two"]);
    }

    #[test]
    fn second_poll_sees_only_new_lines() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("mail.log");
        append(&input, "old\n");

        let mut tail = CheckpointedTail::new(&input);
        tail.next_batch().unwrap();

        append(&input, "new\n");
        assert_eq!(tail.next_batch().unwrap(), vec!["new"]);
    }

    #[test]
    fn empty_poll_when_nothing_appended() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("mail.log");
        append(&input, "only\n");

        let mut tail = CheckpointedTail::new(&input);
        tail.next_batch().unwrap();
        assert!(tail.next_batch().unwrap().is_empty());
    }

    #[test]
    fn offset_survives_a_new_instance() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("mail.log");
        append(&input, "before restart\n");

        CheckpointedTail::new(&input).next_batch().unwrap();

        append(&input, "after restart\n");
        let mut restarted = CheckpointedTail::new(&input);
        assert_eq!(restarted.next_batch().unwrap(), vec!["after restart"]);
    }

    #[test]
    fn partial_line_is_deferred_until_complete() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("mail.log");
        append(&input, "complete\npart");

        let mut tail = CheckpointedTail::new(&input);
        assert_eq!(tail.next_batch().unwrap(), vec!["complete"]);
        assert!(tail.next_batch().unwrap().is_empty());

        append(&input, "ial\n");
        assert_eq!(tail.next_batch().unwrap(), vec!["partial"]);
    }

    #[test]
    fn truncated_input_resets_to_start() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("mail.log");
        append(&input, "first generation, long enough\n");

        let mut tail = CheckpointedTail::new(&input);
        tail.next_batch().unwrap();

        fs::write(&input, "fresh\n").unwrap();
        assert_eq!(tail.next_batch().unwrap(), vec!["fresh"]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempdir().unwrap();
        let mut tail = CheckpointedTail::new(dir.path().join("absent.log"));
        assert!(tail.next_batch().is_err());
    }

    #[test]
    fn default_checkpoint_sits_next_to_input() {
        let tail = CheckpointedTail::new("/var/log/mail/mail.log");
        assert_eq!(
            tail.checkpoint_path(),
            Path::new("/var/log/mail/mail.log.offset")
        );
    }

    #[test]
    fn explicit_checkpoint_location_is_used() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("mail.log");
        let checkpoint = dir.path().join("state/offsets");
        fs::create_dir_all(dir.path().join("state")).unwrap();
        append(&input, "a\n");

        let mut tail = CheckpointedTail::with_checkpoint(&input, &checkpoint);
        tail.next_batch().unwrap();
        assert!(checkpoint.exists());
        assert_eq!(fs::read_to_string(&checkpoint).unwrap(), "2");
    }

    #[test]
    fn crlf_line_endings_are_stripped() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("mail.log");
        append(&input, "windows line\r\n");

        let mut tail = CheckpointedTail::new(&input);
        assert_eq!(tail.next_batch().unwrap(), vec!["windows line"]);
    }
}
