//! Transcript Reader: byte-offset tailing of a JSONL file.
//!
//! A read starts at a stored offset and yields each complete line appended
//! since, lazily. The offset only ever advances past a line's terminating
//! newline, so a partial trailing line is left for the next read and no byte
//! is delivered twice.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

/// One decoded transcript line and the offset just past it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub value: Value,
    pub end_offset: u64,
}

/// Lazy iterator over the complete lines after a start offset.
#[derive(Debug)]
pub struct TranscriptLines {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    offset: u64,
    reset: bool,
    buf: Vec<u8>,
}

impl TranscriptLines {
    /// Open `path` at `start_offset`.
    ///
    /// - Missing file: empty, offset unchanged.
    /// - File shorter than `start_offset` (truncated or replaced): restart
    ///   from 0 and report [`was_reset`](Self::was_reset).
    pub fn open(path: &Path, start_offset: u64) -> Self {
        let mut lines = Self {
            path: path.to_path_buf(),
            reader: None,
            offset: start_offset,
            reset: false,
            buf: Vec::new(),
        };

        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "transcript not readable");
                return lines;
            }
        };
        let len = match file.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to stat transcript");
                return lines;
            }
        };

        if start_offset > len {
            warn!(
                path = %path.display(),
                old_offset = start_offset,
                new_file_len = len,
                "transcript shorter than stored offset, resetting to start"
            );
            lines.offset = 0;
            lines.reset = true;
        }
        if lines.offset == len {
            return lines;
        }

        if let Err(e) = file.seek(SeekFrom::Start(lines.offset)) {
            warn!(path = %path.display(), offset = lines.offset, error = %e, "failed to seek transcript");
            return lines;
        }
        lines.reader = Some(BufReader::new(file));
        lines
    }

    /// Offset just past the last complete line consumed so far.
    pub fn end_offset(&self) -> u64 {
        self.offset
    }

    pub fn was_reset(&self) -> bool {
        self.reset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for TranscriptLines {
    type Item = RawLine;

    fn next(&mut self) -> Option<RawLine> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();
            let n = match reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "error reading transcript");
                    self.reader = None;
                    return None;
                }
            };
            if n == 0 || self.buf.last() != Some(&b'\n') {
                // EOF, or a partial line still being written.
                self.reader = None;
                return None;
            }
            self.offset += n as u64;

            let line = self.buf.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Value>(line) {
                Ok(value) => {
                    return Some(RawLine {
                        value,
                        end_offset: self.offset,
                    });
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        end_offset = self.offset,
                        error = %e,
                        "skipping malformed transcript line"
                    );
                }
            }
        }
    }
}

/// Current length of a file, or `None` when it cannot be stat'ed.
pub fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;

    fn append(path: &Path, s: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("test");
        f.write_all(s.as_bytes()).expect("test");
    }

    #[test]
    fn reads_complete_lines_and_advances() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("s.jsonl");
        append(&path, "{\"a\":1}\n{\"a\":2}\n");

        let mut lines = TranscriptLines::open(&path, 0);
        let got: Vec<_> = lines.by_ref().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].value["a"], 1);
        assert_eq!(got[0].end_offset, 8);
        assert_eq!(lines.end_offset(), 16);
        assert!(!lines.was_reset());
    }

    #[test]
    fn offsets_cover_growing_file_exactly() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("grow.jsonl");
        let mut offset = 0;
        let mut seen = Vec::new();

        for i in 0..5 {
            append(&path, &format!("{{\"i\":{i}}}\n"));
            let mut lines = TranscriptLines::open(&path, offset);
            seen.extend(lines.by_ref().map(|l| l.value["i"].as_i64().expect("test")));
            assert!(lines.end_offset() >= offset);
            offset = lines.end_offset();
        }

        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(offset, fs::metadata(&path).expect("test").len());
    }

    #[test]
    fn partial_line_is_not_consumed() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("partial.jsonl");
        append(&path, "{\"a\":1}\n{\"a\":");

        let mut lines = TranscriptLines::open(&path, 0);
        assert_eq!(lines.by_ref().count(), 1);
        let offset = lines.end_offset();
        assert_eq!(offset, 8);

        append(&path, "2}\n");
        let got: Vec<_> = TranscriptLines::open(&path, offset).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value["a"], 2);
    }

    #[test]
    fn malformed_line_is_skipped_and_counted() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("bad.jsonl");
        append(&path, "not json\n{\"ok\":true}\n");

        let mut lines = TranscriptLines::open(&path, 0);
        let got: Vec<_> = lines.by_ref().collect();
        assert_eq!(got.len(), 1);
        assert_eq!(lines.end_offset(), 9 + 12);
    }

    #[test]
    fn missing_file_keeps_offset() {
        let dir = tempfile::tempdir().expect("test");
        let mut lines = TranscriptLines::open(&dir.path().join("nope.jsonl"), 42);
        assert!(lines.next().is_none());
        assert_eq!(lines.end_offset(), 42);
    }

    #[test]
    fn truncated_file_resets_to_zero() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("t.jsonl");
        append(&path, "{\"new\":1}\n");

        let mut lines = TranscriptLines::open(&path, 500);
        let got: Vec<_> = lines.by_ref().collect();
        assert!(lines.was_reset());
        assert_eq!(got.len(), 1);
        assert_eq!(lines.end_offset(), 10);
    }

    #[test]
    fn reading_is_lazy() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("lazy.jsonl");
        append(&path, "{\"a\":1}\n{\"a\":2}\n");

        let mut lines = TranscriptLines::open(&path, 0);
        assert!(lines.next().is_some());
        assert_eq!(lines.end_offset(), 8);
    }
}
