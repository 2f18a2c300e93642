use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Resumable position of a tailed file, persisted across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TailPosition {
    pub offset: u64,
    pub file_id: u64,
}

/// Incremental line tailer for one file.
///
/// Rotation is detected by identity change (inode on unix, creation time
/// hash elsewhere) or by the file shrinking below the stored offset; either
/// way the reader reopens at the start of the new file.
#[derive(Debug)]
pub struct TailReader {
    path: PathBuf,
    offset: u64,
    file_id: u64,
    partial: Vec<u8>,
}

impl TailReader {
    /// Start tailing at the end of the current file (skip history).
    pub fn from_end(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let (offset, file_id) = match std::fs::metadata(&path) {
            Ok(meta) => (meta.len(), file_identity(&meta)),
            Err(_) => (0, 0),
        };
        Ok(Self {
            path,
            offset,
            file_id,
            partial: Vec::new(),
        })
    }

    /// Resume from a stored position; replays from offset 0 when the file
    /// was rotated since the position was taken.
    pub fn resume(path: impl Into<PathBuf>, position: TailPosition) -> Self {
        Self {
            path: path.into(),
            offset: position.offset,
            file_id: position.file_id,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> TailPosition {
        TailPosition {
            offset: self.offset,
            file_id: self.file_id,
        }
    }

    /// Read any complete new lines. Returns `(lines, rotated)`.
    pub fn poll(&mut self) -> std::io::Result<(Vec<Vec<u8>>, bool)> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            // File vanished (mid-rotation); report quiet, keep state
            Err(_) => return Ok((Vec::new(), false)),
        };

        let current_id = file_identity(&meta);
        let mut rotated = false;
        if (self.file_id != 0 && current_id != self.file_id) || meta.len() < self.offset {
            self.offset = 0;
            self.partial.clear();
            rotated = true;
        }
        self.file_id = current_id;

        if meta.len() == self.offset {
            return Ok((Vec::new(), rotated));
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk)?;
        self.offset += chunk.len() as u64;

        self.partial.extend_from_slice(&chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }

        Ok((lines, rotated))
    }
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_identity(meta: &std::fs::Metadata) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if let Ok(created) = meta.created() {
        created.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn reads_appended_lines_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old line\n").unwrap();

        let mut reader = TailReader::from_end(&path).unwrap();
        let (lines, _) = reader.poll().unwrap();
        assert!(lines.is_empty());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "new line").unwrap();
        drop(f);

        let (lines, rotated) = reader.poll().unwrap();
        assert!(!rotated);
        assert_eq!(lines, vec![b"new line".to_vec()]);
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut reader = TailReader::from_end(&path).unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "no newline yet").unwrap();
        f.flush().unwrap();
        assert!(reader.poll().unwrap().0.is_empty());

        writeln!(f, " done").unwrap();
        let (lines, _) = reader.poll().unwrap();
        assert_eq!(lines, vec![b"no newline yet done".to_vec()]);
    }

    #[test]
    fn rotation_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first\n").unwrap();

        let mut reader = TailReader::from_end(&path).unwrap();
        reader.poll().unwrap();

        // Rotate: move old file away, create a fresh one at the same path
        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        std::fs::write(&path, "after rotate\n").unwrap();

        let (lines, rotated) = reader.poll().unwrap();
        assert!(rotated);
        assert_eq!(lines, vec![b"after rotate".to_vec()]);
    }

    #[test]
    fn resume_replays_when_identity_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let stale = TailPosition { offset: 999, file_id: 12345 };
        let mut reader = TailReader::resume(&path, stale);
        let (lines, rotated) = reader.poll().unwrap();
        assert!(rotated);
        assert_eq!(lines.len(), 2);
    }
}
