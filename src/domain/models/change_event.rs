use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One event from the external file-watching collaborator. The core reacts
/// to this stream; it does not own file watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub kind: FileChangeKind,
    pub path: PathBuf,
}

impl FileChangeEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FileChangeKind::Created,
            path: path.into(),
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FileChangeKind::Modified,
            path: path.into(),
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FileChangeKind::Deleted,
            path: path.into(),
        }
    }
}
