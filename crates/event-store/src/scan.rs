use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::model::ArtifactState;

pub(crate) const ZST_SUFFIX: &str = ".zst";
pub(crate) const TMP_SUFFIX: &str = ".zst.tmp";
/// Any partial write, ours or a writer's (`shot.png.tmp`).
const PARTIAL_SUFFIX: &str = ".tmp";

pub(crate) enum FileKind {
    Raw,
    Compressed,
    Temp,
}

pub(crate) struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub kind: FileKind,
}

impl FileEntry {
    pub fn state(&self) -> Option<ArtifactState> {
        match self.kind {
            FileKind::Raw => Some(ArtifactState::Raw),
            FileKind::Compressed => Some(ArtifactState::Compressed),
            FileKind::Temp => None,
        }
    }
}

pub(crate) fn classify(path: &Path) -> FileKind {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.ends_with(PARTIAL_SUFFIX) {
        FileKind::Temp
    } else if name.ends_with(ZST_SUFFIX) {
        FileKind::Compressed
    } else {
        FileKind::Raw
    }
}

/// `name.log` -> `name.log.zst`
pub(crate) fn compressed_path(raw: &Path) -> PathBuf {
    let mut os = raw.as_os_str().to_os_string();
    os.push(ZST_SUFFIX);
    PathBuf::from(os)
}

pub(crate) fn temp_path(raw: &Path) -> PathBuf {
    let mut os = raw.as_os_str().to_os_string();
    os.push(TMP_SUFFIX);
    PathBuf::from(os)
}

/// Recursively collect regular files under `path`.
///
/// Entries that vanish mid-walk are skipped; a missing root yields nothing.
pub(crate) fn gather_entries(path: &Path, out: &mut Vec<FileEntry>) -> io::Result<()> {
    if !path.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        let entry_path = entry.path();
        if metadata.is_dir() {
            gather_entries(&entry_path, out)?;
            continue;
        }
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        out.push(FileEntry {
            kind: classify(&entry_path),
            path: entry_path,
            size: metadata.len(),
            modified,
        });
    }
    Ok(())
}

/// Remove empty directories below `path`. The root itself is kept.
/// Returns the number of directories removed.
pub(crate) fn prune_dirs(path: &Path, is_root: bool) -> io::Result<usize> {
    if !path.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    let mut is_empty = true;
    let entries: Vec<_> = fs::read_dir(path)?.collect();
    for entry in entries {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            removed += prune_dirs(&entry_path, false)?;
            if entry_path.exists() {
                is_empty = false;
            }
        } else {
            is_empty = false;
        }
    }
    if !is_root && is_empty && fs::remove_dir(path).is_ok() {
        removed += 1;
    }
    Ok(removed)
}
