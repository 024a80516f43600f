//! Backup sessions: every path an operation destroys or creates is recorded
//! here, and the manifest written at finalize is what makes undo possible.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fsops::{self, absolutize, entry_kind, EntryKind, FsError, IoResultExt, MoveMethod};
use crate::roots::{Scope, BACKUP_DIR_NAME};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("Failed to serialize backup manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BackupEntry {
    /// The original existed and now lives at `backup_path`.
    #[serde(rename_all = "camelCase")]
    Backup {
        original_path: PathBuf,
        backup_path: PathBuf,
        kind: EntryKind,
    },
    /// The operation created `original_path`; undo deletes it.
    #[serde(rename_all = "camelCase")]
    Create {
        original_path: PathBuf,
        kind: EntryKind,
    },
}

impl BackupEntry {
    pub fn original_path(&self) -> &Path {
        match self {
            Self::Backup { original_path, .. } | Self::Create { original_path, .. } => {
                original_path
            }
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Backup { kind, .. } | Self::Create { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub version: u32,
    pub created_at: String,
    pub scope: Scope,
    pub operation: String,
    pub entries: Vec<BackupEntry>,
}

/// One unit of reversible work. Entries are kept in order; `seen` holds the
/// resolved paths already moved into this session.
#[derive(Debug)]
pub struct BackupSession {
    dir: PathBuf,
    manifest: BackupManifest,
    seen: BTreeSet<PathBuf>,
}

/// RFC 3339 with milliseconds, `:` and `.` replaced so it is path-safe and
/// still sorts lexically.
pub fn path_safe_timestamp(created_at: &str) -> String {
    created_at.replace([':', '.'], "-")
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Mirrors an absolute path under `backup_root`, dropping the filesystem
/// root. A Windows drive prefix becomes a plain directory (`C:` -> `C`).
pub fn backup_path(target: &Path, backup_root: &Path) -> PathBuf {
    let mut out = backup_root.to_path_buf();
    for component in target.components() {
        match component {
            Component::Prefix(prefix) => {
                let raw = prefix.as_os_str().to_string_lossy();
                let cleaned: String = raw
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                    .collect();
                if !cleaned.is_empty() {
                    out.push(cleaned);
                }
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

impl BackupSession {
    /// Opens a session directory under `<canonical_root>/backup`.
    /// `timestamp` (default: now) becomes the manifest's `createdAt`, and
    /// its path-safe form names the directory, suffixed when taken.
    pub fn create(
        canonical_root: &Path,
        scope: Scope,
        operation: &str,
        timestamp: Option<&str>,
    ) -> Result<Self, BackupError> {
        let created_at = timestamp.map(str::to_string).unwrap_or_else(now_rfc3339);
        let stamp = path_safe_timestamp(&created_at);
        let backup_root = canonical_root.join(BACKUP_DIR_NAME);
        fs::create_dir_all(&backup_root).at("create directory", &backup_root)?;

        let mut attempt = 0usize;
        let dir = loop {
            let name = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{stamp}-{attempt}")
            };
            let candidate = backup_root.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => {
                    return Err(FsError {
                        op: "create directory",
                        path: candidate,
                        source: err,
                    }
                    .into())
                }
            }
        };
        tracing::debug!(dir = %dir.display(), operation, "opened backup session");

        Ok(Self {
            dir,
            manifest: BackupManifest {
                version: MANIFEST_VERSION,
                created_at,
                scope,
                operation: operation.to_string(),
                entries: Vec::new(),
            },
            seen: BTreeSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &BackupManifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[BackupEntry] {
        &self.manifest.entries
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.entries.is_empty()
    }

    fn covered(&self, resolved: &Path) -> bool {
        self.seen.iter().any(|seen| resolved.starts_with(seen))
    }

    /// Moves `target` into the session. Returns `false` when nothing exists
    /// there or when an already backed-up path covers it.
    pub fn backup(&mut self, target: &Path) -> Result<bool, BackupError> {
        let resolved = absolutize(target).at("resolve", target)?;
        let Some(kind) = entry_kind(&resolved)? else {
            return Ok(false);
        };
        if self.covered(&resolved) {
            tracing::debug!(path = %resolved.display(), "already covered by this backup session");
            return Ok(false);
        }

        let destination = backup_path(&resolved, &self.dir);
        match kind {
            EntryKind::Symlink => {
                fsops::copy_symlink(&resolved, &destination)?;
                fsops::remove_path(&resolved)?;
            }
            EntryKind::File | EntryKind::Dir => {
                if fsops::move_path(&resolved, &destination)? == MoveMethod::Copied {
                    tracing::info!(path = %resolved.display(), "backed up across devices");
                }
            }
        }
        tracing::info!(
            path = %resolved.display(),
            kind = kind.as_str(),
            backup = %destination.display(),
            "backed up"
        );

        self.manifest.entries.push(BackupEntry::Backup {
            original_path: resolved.clone(),
            backup_path: destination,
            kind,
        });
        self.seen.insert(resolved);
        Ok(true)
    }

    /// Records that the current operation created `target` from nothing.
    pub fn record_created(&mut self, target: &Path, kind: EntryKind) -> Result<(), BackupError> {
        let resolved = absolutize(target).at("resolve", target)?;
        self.manifest.entries.push(BackupEntry::Create {
            original_path: resolved,
            kind,
        });
        Ok(())
    }

    /// Creates the missing parents of `path`, recording the shallowest new
    /// directory so undo removes the whole chain.
    pub fn ensure_parent(&mut self, path: &Path) -> Result<(), BackupError> {
        if let Some(created) = fsops::create_parent_dirs(path)? {
            tracing::debug!(path = %created.display(), "created parent directories");
            self.record_created(&created, EntryKind::Dir)?;
        }
        Ok(())
    }

    /// Writes the manifest. Consumes the session so it happens exactly once.
    pub fn finalize(self) -> Result<PathBuf, BackupError> {
        let path = self.dir.join(MANIFEST_FILE);
        let body = serde_json::to_string_pretty(&self.manifest)?;
        fs::write(&path, body).at("write manifest", &path)?;
        tracing::info!(
            manifest = %path.display(),
            entries = self.manifest.entries.len(),
            operation = %self.manifest.operation,
            "finalized backup session"
        );
        Ok(self.dir)
    }

    /// Finalizes when something was recorded; otherwise removes the empty
    /// session directory so it never shadows an older manifest.
    pub fn finish(self) -> Result<Option<PathBuf>, BackupError> {
        if self.is_empty() {
            self.discard()?;
            return Ok(None);
        }
        self.finalize().map(Some)
    }

    pub fn discard(self) -> Result<(), BackupError> {
        match fs::remove_dir(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FsError {
                op: "remove directory",
                path: self.dir,
                source: err,
            }
            .into()),
        }
    }
}

pub fn read_manifest(session_dir: &Path) -> Result<BackupManifest, BackupError> {
    let path = session_dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path).at("read manifest", &path)?;
    Ok(serde_json::from_str(&text)?)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightIssue {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PreflightReport {
    pub checked: Vec<PathBuf>,
    pub issues: Vec<PreflightIssue>,
}

impl PreflightReport {
    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Dry run of a backup over `paths`. Nothing is mutated: each existing path
/// must sit in a writable directory and the backup root must be creatable.
pub fn preflight_backup(paths: &[PathBuf], backup_root: &Path) -> PreflightReport {
    let mut report = PreflightReport::default();
    if let Err(reason) = check_creatable(backup_root) {
        report.issues.push(PreflightIssue {
            path: backup_root.to_path_buf(),
            reason,
        });
    }
    for path in paths {
        if !fsops::path_exists(path) {
            continue;
        }
        report.checked.push(path.clone());
        let parent = path.parent().unwrap_or_else(|| Path::new("/"));
        match fs::metadata(parent) {
            Ok(meta) if meta.permissions().readonly() => report.issues.push(PreflightIssue {
                path: path.clone(),
                reason: format!("parent directory {} is read-only", parent.display()),
            }),
            Ok(_) => {}
            Err(err) => report.issues.push(PreflightIssue {
                path: path.clone(),
                reason: format!("cannot inspect {}: {err}", parent.display()),
            }),
        }
    }
    report
}

/// Walks up to the nearest existing ancestor, which must be a writable
/// directory for the missing components to be creatable.
fn check_creatable(path: &Path) -> Result<(), String> {
    let mut current = Some(path);
    while let Some(candidate) = current {
        match fs::metadata(candidate) {
            Ok(meta) if !meta.is_dir() => {
                return Err(format!("{} exists and is not a directory", candidate.display()))
            }
            Ok(meta) if meta.permissions().readonly() => {
                return Err(format!("{} is read-only", candidate.display()))
            }
            Ok(_) => return Ok(()),
            Err(_) => current = candidate.parent(),
        }
    }
    Err(format!("no existing ancestor for {}", path.display()))
}
