//! Storage backend capability and the local-disk backend.
//!
//! Every protocol (local disk, SFTP, ADB, archives...) exposes its files as
//! [`StorageFile`]s. A job only talks to this trait: it opens read and write
//! streams, asks for sizes, and asks the source for a [`TransferHint`] to
//! decide between a native copy and manual streaming.

use std::fmt;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// How a source prefers to be copied to a given destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferHint {
    /// A native copy is available and cheaper than streaming
    DirectCopySupported,
    /// Only a native copy is possible; the backend offers no streams
    DirectCopyRequired,
    /// Bytes must be streamed by the job
    StreamOnly,
}

/// A file or directory on some storage backend.
pub trait StorageFile: Send + Sync + fmt::Debug {
    /// Name of the file, without its parent path
    fn name(&self) -> String;

    /// Full path, for display and logging
    fn path(&self) -> String;

    /// Size in bytes, or -1 if unknown or the file does not exist
    fn size(&self) -> i64;

    fn exists(&self) -> bool;

    fn is_dir(&self) -> bool;

    /// Opens the file for reading, starting at `offset`.
    fn open_read(&self, offset: u64) -> io::Result<Box<dyn Read + Send>>;

    /// Opens the file for writing, creating it if needed. When `append` is
    /// false any existing content is truncated.
    fn open_write(&self, append: bool) -> io::Result<Box<dyn Write + Send>>;

    /// Entries of a directory, in a stable order.
    fn children(&self) -> io::Result<Vec<Arc<dyn StorageFile>>>;

    /// Handle to the entry `name` inside this directory (which need not exist).
    fn child(&self, name: &str) -> io::Result<Arc<dyn StorageFile>>;

    /// Creates this directory. Succeeds if it already exists as a directory.
    fn mkdir(&self) -> io::Result<()>;

    /// Deletes this file or empty directory.
    fn delete(&self) -> io::Result<()>;

    /// Local filesystem path, for backends that have one.
    fn local_path(&self) -> Option<&Path> {
        None
    }

    /// True if `other` is this file, or lies inside this directory.
    ///
    /// The default compares canonical local paths; backends without one never
    /// enclose anything.
    fn encloses(&self, other: &dyn StorageFile) -> bool {
        match (
            self.local_path().and_then(resolve_local),
            other.local_path().and_then(resolve_local),
        ) {
            (Some(this), Some(other)) => other.starts_with(this),
            _ => false,
        }
    }

    /// Tells whether a copy to `dest` should go through [`StorageFile::copy_to`].
    fn transfer_hint(&self, _dest: &dyn StorageFile) -> TransferHint {
        TransferHint::StreamOnly
    }

    /// Native copy of this file to `dest`.
    fn copy_to(&self, dest: &dyn StorageFile) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} cannot be copied natively to {}", self.path(), dest.path()),
        ))
    }
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        LocalFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Convenience constructor returning a shared trait object.
    pub fn shared<P: AsRef<Path>>(path: P) -> Arc<dyn StorageFile> {
        Arc::new(Self::new(path))
    }
}

impl StorageFile for LocalFile {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn path(&self) -> String {
        self.path.display().to_string()
    }

    fn size(&self) -> i64 {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.is_dir() => 0,
            Ok(metadata) => i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            Err(_) => -1,
        }
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn is_dir(&self) -> bool {
        self.path.is_dir()
    }

    fn open_read(&self, offset: u64) -> io::Result<Box<dyn Read + Send>> {
        let mut file = fs::File::open(&self.path)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Box::new(file))
    }

    fn open_write(&self, append: bool) -> io::Result<Box<dyn Write + Send>> {
        ensure_parent_dir_exists(&self.path)?;
        let mut options = fs::OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        Ok(Box::new(options.open(&self.path)?))
    }

    fn children(&self) -> io::Result<Vec<Arc<dyn StorageFile>>> {
        let mut paths = fs::read_dir(&self.path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        paths.sort();
        Ok(paths.into_iter().map(LocalFile::shared).collect())
    }

    fn child(&self, name: &str) -> io::Result<Arc<dyn StorageFile>> {
        if name.is_empty() || name.contains(std::path::MAIN_SEPARATOR) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name: {:?}", name),
            ));
        }
        Ok(LocalFile::shared(self.path.join(name)))
    }

    fn mkdir(&self) -> io::Result<()> {
        match fs::create_dir(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && self.path.is_dir() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete(&self) -> io::Result<()> {
        if self.path.is_dir() {
            fs::remove_dir(&self.path)
        } else {
            fs::remove_file(&self.path)
        }
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn transfer_hint(&self, dest: &dyn StorageFile) -> TransferHint {
        if dest.local_path().is_some() && !self.is_dir() {
            TransferHint::DirectCopySupported
        } else {
            TransferHint::StreamOnly
        }
    }

    fn copy_to(&self, dest: &dyn StorageFile) -> io::Result<()> {
        let Some(dst) = dest.local_path() else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is not on the local filesystem", dest.path()),
            ));
        };
        ensure_parent_dir_exists(dst)?;
        fs::copy(&self.path, dst)?;

        // Preserve modification time if available
        if let Ok(mtime) = fs::metadata(&self.path).and_then(|m| m.modified()) {
            if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
                tracing::debug!(path = %dst.display(), error = %e, "could not preserve mtime");
            }
        }
        Ok(())
    }
}

/// Canonical form of `path`. A final component that does not exist yet is
/// resolved through its parent.
fn resolve_local(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = fs::canonicalize(path) {
        return Some(resolved);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::canonicalize(parent).ok().map(|parent| parent.join(name))
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("parent path exists but is not a directory: {}", parent.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(parent),
        Err(e) => Err(e),
    }
}
