use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backup::{read_manifest, BackupEntry, BackupError, BackupManifest, BackupSession};
use crate::fsops::{self, entry_kind, EntryKind, FsError, IoResultExt};
use crate::roots::ResolvedRoots;

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("No backups found under {}", .0.display())]
    NoBackups(PathBuf),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Backup(#[from] BackupError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UndoReport {
    pub restored: usize,
    pub restored_backups: usize,
    pub removed_created: usize,
    pub removed_symlinks: usize,
    /// Session that was reversed.
    pub backup_dir: PathBuf,
    /// Session holding whatever the undo itself displaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undone_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LatestBackup {
    pub dir: PathBuf,
    pub manifest: BackupManifest,
}

/// Newest finalized session under the backup root. Directories without a
/// readable manifest (interrupted runs) are ignored.
pub fn find_latest_backup(roots: &ResolvedRoots) -> Result<Option<LatestBackup>, UndoError> {
    let backup_root = roots.backup_root();
    if entry_kind(&backup_root)? != Some(EntryKind::Dir) {
        return Ok(None);
    }

    let mut latest: Option<LatestBackup> = None;
    for entry in fs::read_dir(&backup_root).at("read directory", &backup_root)? {
        let entry = entry.at("read directory", &backup_root)?;
        let dir = entry.path();
        if entry_kind(&dir)? != Some(EntryKind::Dir) {
            continue;
        }
        let manifest = match read_manifest(&dir) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::debug!(dir = %dir.display(), error = %err, "ignoring backup without manifest");
                continue;
            }
        };
        let newer = match &latest {
            None => true,
            Some(current) => {
                (manifest.created_at.as_str(), dir.as_path())
                    > (current.manifest.created_at.as_str(), current.dir.as_path())
            }
        };
        if newer {
            latest = Some(LatestBackup { dir, manifest });
        }
    }
    Ok(latest)
}

fn restore_backup(
    original: &Path,
    backup: &Path,
    kind: EntryKind,
) -> Result<bool, UndoError> {
    if !fsops::path_exists(backup) {
        tracing::warn!(
            path = %original.display(),
            backup = %backup.display(),
            "backup copy vanished; skipping"
        );
        return Ok(false);
    }
    fsops::remove_path(original)?;
    match kind {
        EntryKind::Symlink => {
            fsops::copy_symlink(backup, original)?;
            fsops::remove_path(backup)?;
        }
        EntryKind::File | EntryKind::Dir => {
            fsops::move_path(backup, original)?;
        }
    }
    tracing::info!(path = %original.display(), kind = kind.as_str(), "restored");
    Ok(true)
}

/// Reverses the most recent finalized session. Whatever currently occupies
/// an affected path is itself backed up into a new "undo" session first,
/// so an undo can be undone.
pub fn undo_last_change(roots: &ResolvedRoots) -> Result<UndoReport, UndoError> {
    let latest =
        find_latest_backup(roots)?.ok_or_else(|| UndoError::NoBackups(roots.backup_root()))?;
    let entries = &latest.manifest.entries;
    tracing::info!(
        dir = %latest.dir.display(),
        operation = %latest.manifest.operation,
        entries = entries.len(),
        "undoing backup session"
    );

    // State at each original path before anything is touched.
    let present: Vec<Option<EntryKind>> = entries
        .iter()
        .map(|entry| entry_kind(entry.original_path()))
        .collect::<Result<_, _>>()?;

    let mut session =
        BackupSession::create(&roots.canonical_root, roots.scope, "undo", None)?;
    // Shallow paths first so a directory covers its descendants.
    let mut order: Vec<&Path> = entries.iter().map(BackupEntry::original_path).collect();
    order.sort_by_key(|path| path.components().count());
    for path in order {
        session.backup(path)?;
    }

    let mut removed_created = 0usize;
    let mut removed_symlinks = 0usize;
    for (entry, existed) in entries.iter().zip(&present).rev() {
        let BackupEntry::Create { original_path, .. } = entry else {
            continue;
        };
        match existed {
            Some(EntryKind::Symlink) => removed_symlinks += 1,
            Some(_) => removed_created += 1,
            None => continue,
        }
        fsops::remove_path(original_path)?;
        tracing::debug!(path = %original_path.display(), "removed created path");
    }

    let mut restored_backups = 0usize;
    for entry in entries {
        let BackupEntry::Backup {
            original_path,
            backup_path,
            kind,
        } = entry
        else {
            continue;
        };
        if restore_backup(original_path, backup_path, *kind)? {
            restored_backups += 1;
        }
    }

    let undone_dir = session.finish()?;
    let report = UndoReport {
        restored: restored_backups + removed_created + removed_symlinks,
        restored_backups,
        removed_created,
        removed_symlinks,
        backup_dir: latest.dir,
        undone_dir,
    };
    tracing::info!(
        restored = report.restored,
        restored_backups,
        removed_created,
        removed_symlinks,
        "undo complete"
    );
    Ok(report)
}
