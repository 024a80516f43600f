use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

#[cfg(unix)]
const CROSS_DEVICE_CODE: Option<i32> = Some(18);
#[cfg(windows)]
const CROSS_DEVICE_CODE: Option<i32> = Some(17);
#[cfg(not(any(unix, windows)))]
const CROSS_DEVICE_CODE: Option<i32> = None;

#[derive(Debug, Error)]
#[error("Failed to {op} {}: {source}", path.display())]
pub struct FsError {
    pub op: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

pub(crate) trait IoResultExt<T> {
    fn at(self, op: &'static str, path: &Path) -> Result<T, FsError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, op: &'static str, path: &Path) -> Result<T, FsError> {
        self.map_err(|source| FsError {
            op,
            path: path.to_path_buf(),
            source,
        })
    }
}

/// What an lstat found at a path. Symlinks are never followed.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Symlink => "symlink",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MoveMethod {
    Renamed,
    Copied,
}

pub fn entry_kind(path: &Path) -> Result<Option<EntryKind>, FsError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            let file_type = meta.file_type();
            if file_type.is_symlink() {
                Ok(Some(EntryKind::Symlink))
            } else if file_type.is_dir() {
                Ok(Some(EntryKind::Dir))
            } else {
                Ok(Some(EntryKind::File))
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(FsError {
            op: "inspect",
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

/// True when something (including a dangling symlink) sits at `path`.
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

/// Resolves the link text of `link` against its parent directory.
pub fn resolve_link(link: &Path) -> Result<PathBuf, FsError> {
    let text = fs::read_link(link).at("read symlink", link)?;
    if text.is_absolute() {
        return Ok(normalize(&text));
    }
    let parent = link.parent().unwrap_or_else(|| Path::new(""));
    Ok(normalize(&parent.join(text)))
}

/// Lexically removes `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    Ok(normalize(&std::env::current_dir()?.join(path)))
}

pub fn ensure_parent(path: &Path) -> Result<(), FsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).at("create directory", parent)?;
        }
    }
    Ok(())
}

/// Creates the missing parents of `path` and returns the shallowest
/// directory that did not exist before, if any.
pub fn create_parent_dirs(path: &Path) -> Result<Option<PathBuf>, FsError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(None);
    };
    let mut shallowest = None;
    let mut current = Some(parent);
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || path_exists(dir) {
            break;
        }
        shallowest = Some(dir.to_path_buf());
        current = dir.parent();
    }
    fs::create_dir_all(parent).at("create directory", parent)?;
    Ok(shallowest)
}

/// Creates `link` pointing at `source`. `dir` selects directory-link
/// semantics where the platform distinguishes them.
pub fn create_symlink(source: &Path, link: &Path, dir: bool) -> Result<(), FsError> {
    symlink_impl(source, link, dir).at("create symlink", link)
}

#[cfg(unix)]
fn symlink_impl(source: &Path, link: &Path, _dir: bool) -> io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn symlink_impl(source: &Path, link: &Path, dir: bool) -> io::Result<()> {
    if dir {
        std::os::windows::fs::symlink_dir(source, link)
    } else {
        std::os::windows::fs::symlink_file(source, link)
    }
}

/// Whether the symlink at `link` should be recreated as a directory link.
pub fn symlink_targets_dir(link: &Path) -> bool {
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileTypeExt;
        if let Ok(meta) = fs::symlink_metadata(link) {
            return meta.file_type().is_symlink_dir();
        }
    }
    fs::metadata(link).map(|meta| meta.is_dir()).unwrap_or(false)
}

pub fn remove_path(path: &Path) -> Result<(), FsError> {
    match entry_kind(path)? {
        None => Ok(()),
        Some(EntryKind::Dir) => fs::remove_dir_all(path).at("remove directory", path),
        Some(EntryKind::Symlink) => remove_symlink(path),
        Some(EntryKind::File) => fs::remove_file(path).at("remove file", path),
    }
}

fn remove_symlink(path: &Path) -> Result<(), FsError> {
    #[cfg(windows)]
    {
        if symlink_targets_dir(path) {
            return fs::remove_dir(path).at("remove symlink", path);
        }
    }
    fs::remove_file(path).at("remove symlink", path)
}

/// EXDEV on unix, ERROR_NOT_SAME_DEVICE on windows.
pub fn is_cross_device(err: &io::Error) -> bool {
    err.kind() == ErrorKind::CrossesDevices
        || (CROSS_DEVICE_CODE.is_some() && err.raw_os_error() == CROSS_DEVICE_CODE)
}

/// Moves `from` to `to`, creating the destination parent first. Falls back
/// to copy + delete only when the rename crosses devices.
pub fn move_path(from: &Path, to: &Path) -> Result<MoveMethod, FsError> {
    move_path_with(from, to, |a, b| fs::rename(a, b))
}

pub(crate) fn move_path_with<F>(from: &Path, to: &Path, rename: F) -> Result<MoveMethod, FsError>
where
    F: Fn(&Path, &Path) -> io::Result<()>,
{
    ensure_parent(to)?;
    match rename(from, to) {
        Ok(()) => Ok(MoveMethod::Renamed),
        Err(err) if is_cross_device(&err) => {
            tracing::debug!(from = %from.display(), to = %to.display(), "rename crossed devices; copying");
            copy_path(from, to)?;
            remove_path(from)?;
            Ok(MoveMethod::Copied)
        }
        Err(err) => Err(FsError {
            op: "move",
            path: from.to_path_buf(),
            source: err,
        }),
    }
}

/// Copies a file, directory tree or symlink. Symlinks are copied as links.
pub fn copy_path(src: &Path, dst: &Path) -> Result<(), FsError> {
    match entry_kind(src)? {
        None => Err(FsError {
            op: "copy",
            path: src.to_path_buf(),
            source: io::Error::new(ErrorKind::NotFound, "source does not exist"),
        }),
        Some(EntryKind::Symlink) => copy_symlink(src, dst),
        Some(EntryKind::File) => {
            ensure_parent(dst)?;
            fs::copy(src, dst).at("copy", src)?;
            Ok(())
        }
        Some(EntryKind::Dir) => {
            fs::create_dir_all(dst).at("create directory", dst)?;
            for entry in WalkDir::new(src).min_depth(1) {
                let entry = entry.map_err(|err| {
                    let path = err.path().unwrap_or(src).to_path_buf();
                    FsError {
                        op: "walk",
                        path,
                        source: err.into(),
                    }
                })?;
                let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
                let out = dst.join(rel);
                let file_type = entry.file_type();
                if file_type.is_symlink() {
                    copy_symlink(entry.path(), &out)?;
                } else if file_type.is_dir() {
                    fs::create_dir_all(&out).at("create directory", &out)?;
                } else {
                    ensure_parent(&out)?;
                    fs::copy(entry.path(), &out).at("copy", entry.path())?;
                }
            }
            Ok(())
        }
    }
}

/// Recreates the symlink at `src` as an identical link at `dst`.
pub fn copy_symlink(src: &Path, dst: &Path) -> Result<(), FsError> {
    let text = fs::read_link(src).at("read symlink", src)?;
    let dir = symlink_targets_dir(src);
    ensure_parent(dst)?;
    remove_path(dst)?;
    create_symlink(&text, dst, dir)
}

pub fn count_entries(dir: &Path) -> Result<usize, FsError> {
    Ok(fs::read_dir(dir).at("read directory", dir)?.count())
}
