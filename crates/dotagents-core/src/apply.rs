use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backup::{preflight_backup, BackupError, BackupSession, PreflightReport};
use crate::fsops::{self, EntryKind, FsError, IoResultExt};
use crate::mappings::LinkKind;
use crate::plan::{LinkPlan, LinkTask};
use crate::roots::BACKUP_DIR_NAME;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Backup(#[from] BackupError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Replace conflicting real content and stale symlinks.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub backed_up: usize,
}

fn placeholder_content(source: &Path) -> String {
    let title = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "AGENTS".to_string());
    format!(
        "# {title}\n\nShared instructions for every linked coding agent. Edit this file in the canonical .agents directory.\n"
    )
}

/// Creates the missing parents of `path`, recording the new directories in
/// the session when one is given.
fn ensure_parent(path: &Path, session: Option<&mut BackupSession>) -> Result<(), LinkError> {
    match session {
        Some(session) => session.ensure_parent(path)?,
        None => fsops::ensure_parent(path)?,
    }
    Ok(())
}

fn ensure_source(
    source: &Path,
    kind: LinkKind,
    mut session: Option<&mut BackupSession>,
) -> Result<(), LinkError> {
    if fsops::path_exists(source) {
        return Ok(());
    }
    ensure_parent(source, session.as_deref_mut())?;
    let created = match kind {
        LinkKind::Dir => {
            fs::create_dir(source).at("create directory", source)?;
            EntryKind::Dir
        }
        LinkKind::File => {
            fs::write(source, placeholder_content(source)).at("write", source)?;
            EntryKind::File
        }
    };
    tracing::info!(path = %source.display(), kind = created.as_str(), "created canonical source");
    if let Some(session) = session {
        session.record_created(source, created)?;
    }
    Ok(())
}

/// Clears whatever sits at `target` (through the session when one is given)
/// and links it to `source`.
fn replace_with_link(
    source: &Path,
    target: &Path,
    kind: LinkKind,
    mut session: Option<&mut BackupSession>,
    report: &mut ApplyReport,
) -> Result<(), LinkError> {
    if fsops::path_exists(target) {
        if let Some(session) = session.as_deref_mut() {
            if session.backup(target)? {
                report.backed_up += 1;
            }
        }
        // Either no session, or the path is already covered by an earlier backup.
        fsops::remove_path(target)?;
    }
    ensure_parent(target, session.as_deref_mut())?;
    fsops::create_symlink(source, target, kind.is_dir())?;
    tracing::info!(link = %target.display(), source = %source.display(), "linked");
    if let Some(session) = session {
        session.record_created(target, EntryKind::Symlink)?;
    }
    report.applied += 1;
    Ok(())
}

/// Executes `plan` in order. Conflicts are only touched with `force`; every
/// destructive replacement goes through `session` first when one is given.
pub fn apply_link_plan(
    plan: &LinkPlan,
    options: &ApplyOptions,
    mut session: Option<&mut BackupSession>,
) -> Result<ApplyReport, LinkError> {
    let mut report = ApplyReport::default();

    for task in &plan.tasks {
        match task {
            LinkTask::EnsureSource { source, kind } => {
                ensure_source(source, *kind, session.as_deref_mut())?;
                report.applied += 1;
            }
            LinkTask::Noop { .. } => report.skipped += 1,
            LinkTask::Conflict {
                source,
                target,
                kind,
                reason,
            } => {
                if !options.force {
                    tracing::debug!(path = %target.display(), reason = %reason, "leaving conflict untouched");
                    report.conflicts += 1;
                    continue;
                }
                replace_with_link(source, target, *kind, session.as_deref_mut(), &mut report)?;
            }
            LinkTask::Link {
                source,
                target,
                kind,
                ..
            } => {
                if fsops::path_exists(target) && !options.force {
                    report.skipped += 1;
                    continue;
                }
                replace_with_link(source, target, *kind, session.as_deref_mut(), &mut report)?;
            }
        }
    }

    Ok(report)
}

/// Paths `apply_link_plan` would back up with these options.
pub fn backup_candidates(plan: &LinkPlan, options: &ApplyOptions) -> Vec<PathBuf> {
    if !options.force {
        return Vec::new();
    }
    plan.tasks
        .iter()
        .filter_map(|task| match task {
            LinkTask::Conflict { target, .. } => Some(target.clone()),
            LinkTask::Link { target, .. } if fsops::path_exists(target) => Some(target.clone()),
            _ => None,
        })
        .collect()
}

/// Dry run of the backups an apply would perform.
pub fn preflight_link_plan(
    plan: &LinkPlan,
    options: &ApplyOptions,
    canonical_root: &Path,
) -> PreflightReport {
    let paths = backup_candidates(plan, options);
    preflight_backup(&paths, &canonical_root.join(BACKUP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupEntry;
    use crate::mappings::Mapping;
    use crate::plan::build_link_plan;
    use crate::roots::Scope;
    use tempfile::TempDir;

    fn mapping(temp: &TempDir) -> Mapping {
        Mapping {
            name: "commands".to_string(),
            source: temp.path().join(".agents").join("commands"),
            targets: vec![
                temp.path().join(".claude").join("commands"),
                temp.path().join(".factory").join("commands"),
            ],
            kind: LinkKind::Dir,
        }
    }

    fn session(temp: &TempDir) -> BackupSession {
        BackupSession::create(&temp.path().join(".agents"), Scope::Global, "apply", None)
            .expect("session")
    }

    #[test]
    fn fresh_apply_creates_source_and_links() {
        let temp = TempDir::new().expect("tempdir");
        let mapping = mapping(&temp);
        let plan = build_link_plan(&[mapping.clone()]).expect("plan");
        let mut session = session(&temp);

        let report =
            apply_link_plan(&plan, &ApplyOptions::default(), Some(&mut session)).expect("apply");

        assert_eq!(report.applied, 3);
        assert_eq!(report.backed_up, 0);
        assert!(mapping.source.is_dir());
        for target in &mapping.targets {
            assert!(fsops::is_symlink(target));
            assert_eq!(fs::read_link(target).expect("read link"), mapping.source);
        }
        let created: Vec<(PathBuf, EntryKind)> = session
            .entries()
            .iter()
            .map(|entry| match entry {
                BackupEntry::Create {
                    original_path,
                    kind,
                } => (original_path.clone(), *kind),
                BackupEntry::Backup { .. } => panic!("nothing should be backed up"),
            })
            .collect();
        assert_eq!(
            created,
            vec![
                (mapping.source.clone(), EntryKind::Dir),
                (temp.path().join(".claude"), EntryKind::Dir),
                (mapping.targets[0].clone(), EntryKind::Symlink),
                (temp.path().join(".factory"), EntryKind::Dir),
                (mapping.targets[1].clone(), EntryKind::Symlink),
            ]
        );
    }

    #[test]
    fn placeholder_file_is_written_for_missing_file_source() {
        let temp = TempDir::new().expect("tempdir");
        let mapping = Mapping {
            name: "agents-md".to_string(),
            source: temp.path().join(".agents").join("AGENTS.md"),
            targets: vec![temp.path().join(".codex").join("AGENTS.md")],
            kind: LinkKind::File,
        };
        let plan = build_link_plan(&[mapping.clone()]).expect("plan");
        apply_link_plan(&plan, &ApplyOptions::default(), None).expect("apply");
        let content = fs::read_to_string(&mapping.source).expect("read");
        assert!(content.starts_with("# AGENTS"));
        assert_eq!(
            fs::read_to_string(&mapping.targets[0]).expect("read via link"),
            content
        );
    }

    #[test]
    fn conflicts_are_untouched_without_force() {
        let temp = TempDir::new().expect("tempdir");
        let mapping = mapping(&temp);
        fs::create_dir_all(&mapping.targets[0]).expect("real dir");
        fs::write(mapping.targets[0].join("keep.md"), "keep").expect("write");
        let plan = build_link_plan(&[mapping.clone()]).expect("plan");

        let report = apply_link_plan(&plan, &ApplyOptions::default(), None).expect("apply");
        assert_eq!(report.conflicts, 1);
        assert!(!fsops::is_symlink(&mapping.targets[0]));
        assert_eq!(
            fs::read_to_string(mapping.targets[0].join("keep.md")).expect("read"),
            "keep"
        );
    }

    #[test]
    fn force_backs_up_conflict_before_linking() {
        let temp = TempDir::new().expect("tempdir");
        let mapping = mapping(&temp);
        fs::create_dir_all(&mapping.targets[0]).expect("real dir");
        fs::write(mapping.targets[0].join("keep.md"), "keep").expect("write");
        let plan = build_link_plan(&[mapping.clone()]).expect("plan");
        let mut session = session(&temp);

        let report = apply_link_plan(&plan, &ApplyOptions { force: true }, Some(&mut session))
            .expect("apply");
        assert_eq!(report.backed_up, 1);
        assert!(fsops::is_symlink(&mapping.targets[0]));

        let backup = session
            .entries()
            .iter()
            .find_map(|entry| match entry {
                BackupEntry::Backup { backup_path, .. } => Some(backup_path.clone()),
                BackupEntry::Create { .. } => None,
            })
            .expect("backup entry");
        assert_eq!(
            fs::read_to_string(backup.join("keep.md")).expect("read backup"),
            "keep"
        );
    }

    #[cfg(unix)]
    #[test]
    fn stale_symlink_is_skipped_unless_forced() {
        let temp = TempDir::new().expect("tempdir");
        let mapping = mapping(&temp);
        fs::create_dir_all(&mapping.source).expect("source");
        fs::create_dir_all(temp.path().join(".claude")).expect("claude");
        std::os::unix::fs::symlink(temp.path().join("old"), &mapping.targets[0]).expect("stale");
        let plan = build_link_plan(&[mapping.clone()]).expect("plan");

        let report = apply_link_plan(&plan, &ApplyOptions::default(), None).expect("apply");
        assert_eq!(report.skipped, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(
            fs::read_link(&mapping.targets[0]).expect("link"),
            temp.path().join("old")
        );

        let plan = build_link_plan(&[mapping.clone()]).expect("plan");
        let mut session = session(&temp);
        let report = apply_link_plan(&plan, &ApplyOptions { force: true }, Some(&mut session))
            .expect("apply");
        assert_eq!(report.applied, 1);
        assert_eq!(report.backed_up, 1);
        assert_eq!(
            fs::read_link(&mapping.targets[0]).expect("link"),
            mapping.source
        );
    }

    #[test]
    fn second_apply_is_a_no_op() {
        let temp = TempDir::new().expect("tempdir");
        let mapping = mapping(&temp);
        let plan = build_link_plan(&[mapping.clone()]).expect("plan");
        apply_link_plan(&plan, &ApplyOptions::default(), None).expect("first apply");

        let plan = build_link_plan(&[mapping]).expect("plan");
        let report = apply_link_plan(&plan, &ApplyOptions { force: true }, None).expect("second");
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn preflight_only_considers_backups_under_force() {
        let temp = TempDir::new().expect("tempdir");
        let mapping = mapping(&temp);
        fs::create_dir_all(&mapping.targets[0]).expect("real dir");
        let plan = build_link_plan(&[mapping.clone()]).expect("plan");
        let canonical = temp.path().join(".agents");

        let report = preflight_link_plan(&plan, &ApplyOptions::default(), &canonical);
        assert!(report.checked.is_empty());

        let report = preflight_link_plan(&plan, &ApplyOptions { force: true }, &canonical);
        assert!(report.ok());
        assert_eq!(report.checked, vec![mapping.targets[0].clone()]);
    }
}
