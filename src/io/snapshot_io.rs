use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::transport::Snapshot;

/// Error type for snapshot files
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("could not read {path}: {source}")]
    ReadError { path: PathBuf, source: io::Error },
    #[error("could not write {path}: {source}")]
    WriteError { path: PathBuf, source: io::Error },
    #[error("{path} is not a valid snapshot: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("could not serialize snapshot: {0}")]
    SerializeError(#[from] serde_json::Error),
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot, SnapshotError> {
    let text = fs::read_to_string(path).map_err(|e| SnapshotError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| SnapshotError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write via a temp file in the same directory and rename over the target.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let mut content = serde_json::to_string_pretty(snapshot)?;
    content.push('\n');
    atomic_write(path, content.as_bytes()).map_err(|e| SnapshotError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::{TaskId, TaskNode};
    use crate::model::tree::TaskTree;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn write_then_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tasks.json");
        let mut tree = TaskTree::new();
        tree.insert(TaskNode::new(TaskId(1), 2, "Root"), None).unwrap();
        tree.insert(TaskNode::new(TaskId(2), 2, "Child"), Some(TaskId(1))).unwrap();
        let snapshot = Snapshot::from_tree(2, 5, &tree);

        write_snapshot(&path, &snapshot).unwrap();
        assert_eq!(read_snapshot(&path).unwrap(), snapshot);
    }

    #[test]
    fn unreadable_and_invalid_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tasks.json");
        assert!(matches!(read_snapshot(&path), Err(SnapshotError::ReadError { .. })));
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read_snapshot(&path), Err(SnapshotError::ParseError { .. })));
    }
}
