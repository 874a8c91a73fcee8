use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of a filesystem entry found by [`walk_sorted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File { executable: bool },
}

/// One entry of a deterministic directory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the walk root, always `/`-separated.
    pub relative: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Size in bytes (0 for directories).
    pub len: u64,
}

/// Write `bytes` to `path` so readers see either the old or the new content.
///
/// The data goes to a uniquely named sibling temp file which is then renamed
/// over `path`, so concurrent writers to one target never share a temp file.
/// Parent directories are created when missing.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;

    // Dropping the temp file on error removes it
    temp.persist(path)?;
    Ok(())
}

/// Walk `root` and return every directory and regular file below it, sorted
/// by relative path.
///
/// Symlinks are never followed and are left out of the result, as are
/// special files. The root itself is not included.
///
/// # Errors
/// Returns an error if any part of the tree cannot be read.
pub fn walk_sorted(root: &Path) -> io::Result<Vec<WalkEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = entry.map_err(io::Error::from)?;
        if entry.depth() == 0 {
            continue;
        }

        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File {
                executable: is_executable(&entry.metadata().map_err(io::Error::from)?),
            }
        } else {
            continue;
        };

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .to_string_lossy()
            .replace('\\', "/");
        let len = match kind {
            EntryKind::Dir => 0,
            EntryKind::File { .. } => entry.metadata().map_err(io::Error::from)?.len(),
        };

        entries.push(WalkEntry {
            relative,
            path: entry.path().to_path_buf(),
            kind,
            len,
        });
    }

    // Sibling-wise sorting is not the same as full-path sorting ("a-b" vs "a/b")
    entries.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(entries)
}

/// Remove a directory tree if it exists.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
