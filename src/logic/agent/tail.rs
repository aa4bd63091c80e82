//! Offset-tracking log reader
//!
//! A cursor remembers the file identity and byte offset already consumed.
//! A new inode or a file shorter than the offset means rotation, and the
//! file is read again from the start. Only complete lines are consumed,
//! except a line longer than one read window: its first window is emitted
//! and the rest is discarded up to the next newline.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Upper bound on bytes consumed per read
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailCursor {
    pub file_id: u64,
    pub offset: u64,
    /// Inside the tail end of an oversized line
    #[serde(default)]
    pub skipping: bool,
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> u64 {
    0
}

/// Lines appended since `cursor`. With no cursor the file is joined at its end.
pub fn read_new_lines(path: &Path, cursor: &mut Option<TailCursor>) -> io::Result<Vec<String>> {
    let meta = std::fs::metadata(path)?;
    let id = file_id(&meta);
    let len = meta.len();

    let mut current = match *cursor {
        None => {
            *cursor = Some(TailCursor { file_id: id, offset: len, skipping: false });
            return Ok(Vec::new());
        }
        Some(c) if c.file_id != id || len < c.offset => TailCursor {
            file_id: id,
            offset: 0,
            skipping: false,
        },
        Some(c) => c,
    };

    if len == current.offset {
        *cursor = Some(current);
        return Ok(Vec::new());
    }

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(current.offset))?;
    let mut buf = Vec::new();
    file.take(MAX_READ_BYTES).read_to_end(&mut buf)?;

    let window_full = buf.len() as u64 == MAX_READ_BYTES;

    let mut start = 0;
    if current.skipping {
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                start = pos + 1;
                current.skipping = false;
            }
            None => {
                current.offset += buf.len() as u64;
                *cursor = Some(current);
                return Ok(Vec::new());
            }
        }
    }

    let consumed = match buf[start..].iter().rposition(|&b| b == b'\n') {
        Some(pos) => start + pos + 1,
        None if window_full && start == 0 => {
            log::warn!(
                "{}: line exceeds {} bytes, truncating",
                path.display(),
                MAX_READ_BYTES
            );
            current.skipping = true;
            buf.len()
        }
        None => start,
    };

    let lines = String::from_utf8_lossy(&buf[start..consumed])
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect();

    current.offset += consumed as u64;
    *cursor = Some(current);
    Ok(lines)
}

/// A path plus its cursor
#[derive(Debug, Clone)]
pub struct LogTailer {
    path: PathBuf,
    cursor: Option<TailCursor>,
}

impl LogTailer {
    pub fn new(path: PathBuf) -> Self {
        Self { path, cursor: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// New complete lines; a missing or unreadable file yields none
    pub fn poll(&mut self) -> Vec<String> {
        match read_new_lines(&self.path, &mut self.cursor) {
            Ok(lines) => lines,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    log::debug!("Tail {} failed: {}", self.path.display(), e);
                }
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_starts_at_end_then_follows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.log");
        append(&path, "old line\n");

        let mut tailer = LogTailer::new(path.clone());
        assert!(tailer.poll().is_empty());

        append(&path, "new one\nnew two\n");
        assert_eq!(tailer.poll(), vec!["new one", "new two"]);
        assert!(tailer.poll().is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eve.json");
        append(&path, "");

        let mut cursor = None;
        read_new_lines(&path, &mut cursor).unwrap();

        append(&path, "{\"half\":");
        assert!(read_new_lines(&path, &mut cursor).unwrap().is_empty());
        append(&path, " 1}\n");
        assert_eq!(read_new_lines(&path, &mut cursor).unwrap(), vec!["{\"half\": 1}"]);
    }

    #[test]
    fn test_truncation_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "aaaaaaaaaaaaaaaaaaaa\n");

        let mut cursor = None;
        read_new_lines(&path, &mut cursor).unwrap();

        std::fs::write(&path, "fresh\n").unwrap();
        assert_eq!(read_new_lines(&path, &mut cursor).unwrap(), vec!["fresh"]);
    }

    #[test]
    fn test_oversized_line_is_truncated_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.log");
        append(&path, "");

        let mut tailer = LogTailer::new(path.clone());
        tailer.poll();

        let huge = "A".repeat(MAX_READ_BYTES as usize + 10);
        append(&path, &format!("GET /{} from 203.0.113.9\n", huge));
        append(&path, "block in from 198.51.100.7 port 22\n");

        let mut lines = Vec::new();
        for _ in 0..5 {
            lines.extend(tailer.poll());
        }

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_READ_BYTES as usize);
        assert!(lines[0].starts_with("GET /AAAA"));
        assert_eq!(lines[1], "block in from 198.51.100.7 port 22");
        assert!(tailer.poll().is_empty());
    }

    #[test]
    fn test_missing_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = LogTailer::new(dir.path().join("absent.log"));
        assert!(tailer.poll().is_empty());
    }
}
