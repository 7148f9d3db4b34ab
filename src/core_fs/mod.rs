//! Filesystem façade.
//!
//! Everything the command handlers and the transfer worker need from the
//! disk goes through here, including the platform-specific pieces
//! (permission bits, owner/group names). The rest of the server never
//! conditionally compiles on the host platform.

pub mod resolver;

use crate::constants::MAX_DIR_RECURSION;
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum FsError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("directory recursion limit exceeded under {0}")]
    TooDeep(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Unknown,
}

/// A single directory entry with everything the LIST formatter needs.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub mtime: SystemTime,
    pub mode_bits: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub link_target: Option<PathBuf>,
}

pub fn join(base: &Path, name: &str) -> PathBuf {
    base.join(name)
}

pub async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

pub async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

pub async fn size(path: &Path) -> Result<u64, FsError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| FsError::NotFound(path.to_path_buf()))?;
    Ok(meta.len())
}

pub async fn mtime(path: &Path) -> Result<SystemTime, FsError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| FsError::NotFound(path.to_path_buf()))?;
    Ok(meta.modified()?)
}

/// Collects metadata for one path, without following a symlink.
pub async fn stat(path: &Path) -> Result<FileInfo, FsError> {
    let name = filename_of(path).unwrap_or_default().to_string();
    let meta = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|_| FsError::NotFound(path.to_path_buf()))?;
    file_info_from_metadata(path, name, &meta).await
}

/// Lists a directory, sorted by name. `.` and `..` are not included.
pub async fn list(path: &Path) -> Result<Vec<FileInfo>, FsError> {
    if !is_dir(path).await {
        return Err(FsError::NotADirectory(path.to_path_buf()));
    }

    let mut entries = tokio::fs::read_dir(path).await?;
    let mut infos = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(err) => {
                log::debug!("Skipping unreadable entry {:?}: {}", entry.path(), err);
                continue;
            }
        };
        infos.push(file_info_from_metadata(&entry.path(), name, &meta).await?);
    }

    infos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(infos)
}

/// Reads up to `buf.len()` bytes at `offset`. Returns the number of bytes
/// read; zero means end of file.
pub async fn read_range(path: &Path, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
    let mut file = OpenOptions::new().read(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..]).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Writes `data` at `offset`, creating the file if it does not exist.
pub async fn write_range(path: &Path, offset: u64, data: &[u8]) -> Result<(), FsError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

/// Truncates (or extends with zeros) the file to `len`, creating it if
/// missing. STOR uses this so the stored file never keeps a stale tail.
pub async fn truncate(path: &Path, len: u64) -> Result<(), FsError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .await?;
    file.set_len(len).await?;
    Ok(())
}

pub async fn create_dir(path: &Path) -> Result<(), FsError> {
    tokio::fs::create_dir(path).await?;
    Ok(())
}

pub async fn create_dir_all(path: &Path) -> Result<(), FsError> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

pub async fn delete_file(path: &Path) -> Result<(), FsError> {
    tokio::fs::remove_file(path).await?;
    Ok(())
}

/// Removes a directory. Without `recursive` the directory must be empty.
/// Recursive removal never follows symbolic links (the link itself is
/// removed) and stops at a depth of [`MAX_DIR_RECURSION`].
pub async fn delete_dir(path: &Path, recursive: bool) -> Result<(), FsError> {
    if recursive {
        remove_tree(path, 0).await
    } else {
        tokio::fs::remove_dir(path).await?;
        Ok(())
    }
}

fn remove_tree(path: &Path, depth: usize) -> Pin<Box<dyn Future<Output = Result<(), FsError>> + Send + '_>> {
    Box::pin(async move {
        if depth >= MAX_DIR_RECURSION {
            return Err(FsError::TooDeep(path.to_path_buf()));
        }

        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            // file_type() does not follow symlinks, so a link to a
            // directory is unlinked rather than descended into.
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                remove_tree(&entry_path, depth + 1).await?;
            } else {
                tokio::fs::remove_file(&entry_path).await?;
            }
        }

        tokio::fs::remove_dir(path).await?;
        Ok(())
    })
}

pub async fn rename(from: &Path, to: &Path) -> Result<(), FsError> {
    tokio::fs::rename(from, to).await?;
    Ok(())
}

pub fn parent_of(path: &Path) -> Option<&Path> {
    path.parent()
}

pub fn filename_of(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

async fn file_info_from_metadata(
    path: &Path,
    name: String,
    meta: &std::fs::Metadata,
) -> Result<FileInfo, FsError> {
    let kind = if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else if meta.is_dir() {
        FileKind::Dir
    } else if meta.is_file() {
        FileKind::File
    } else {
        FileKind::Unknown
    };

    let link_target = if kind == FileKind::Symlink {
        tokio::fs::read_link(path).await.ok()
    } else {
        None
    };

    let (mode_bits, nlink, uid, gid) = ownership_bits(meta, kind);

    Ok(FileInfo {
        name,
        kind,
        size: meta.len(),
        mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        mode_bits,
        nlink,
        uid,
        gid,
        link_target,
    })
}

#[cfg(unix)]
fn ownership_bits(meta: &std::fs::Metadata, _kind: FileKind) -> (u32, u64, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.mode(), meta.nlink(), meta.uid(), meta.gid())
}

#[cfg(not(unix))]
fn ownership_bits(meta: &std::fs::Metadata, kind: FileKind) -> (u32, u64, u32, u32) {
    // Synthetic permission bits so the listing formatter stays
    // platform-agnostic.
    let mode = if kind == FileKind::Dir { 0o755 } else { 0o644 };
    let _ = meta;
    (mode, 1, 0, 0)
}

#[cfg(unix)]
pub fn owner_name(uid: u32) -> String {
    uzers::get_user_by_uid(uid)
        .map(|u| u.name().to_string_lossy().to_string())
        .unwrap_or_else(|| uid.to_string())
}

#[cfg(unix)]
pub fn group_name(gid: u32) -> String {
    uzers::get_group_by_gid(gid)
        .map(|g| g.name().to_string_lossy().to_string())
        .unwrap_or_else(|| gid.to_string())
}

#[cfg(not(unix))]
pub fn owner_name(_uid: u32) -> String {
    "ftp".to_string()
}

#[cfg(not(unix))]
pub fn group_name(_gid: u32) -> String {
    "ftp".to_string()
}
