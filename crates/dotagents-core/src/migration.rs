//! One-time import of per-client content into the canonical root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apply::{apply_link_plan, backup_candidates, ApplyOptions, ApplyReport, LinkError};
use crate::backup::{preflight_backup, BackupError, BackupSession, PreflightReport};
use crate::fsops::{self, entry_kind, EntryKind, FsError, IoResultExt};
use crate::mappings::{
    build_mappings, normalize_clients, Client, LinkKind, COMMANDS_DIR, HOOKS_DIR, SKILLS_DIR,
};
use crate::plan::build_link_plan;
use crate::roots::ResolvedRoots;
use crate::skills::is_valid_skill_dir;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("Selection {index} is out of range for {}", target.display())]
    InvalidSelection { target: PathBuf, index: usize },
    #[error("Candidate {0} has no source path")]
    MissingSource(String),
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CandidateAction {
    Copy,
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationCandidate {
    pub label: String,
    pub target_path: PathBuf,
    pub kind: LinkKind,
    pub action: CandidateAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<Client>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConflict {
    pub target_path: PathBuf,
    pub kind: LinkKind,
    pub candidates: Vec<MigrationCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub auto: Vec<MigrationCandidate>,
    pub conflicts: Vec<MigrationConflict>,
    pub canonical_root: PathBuf,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.auto.is_empty() && self.conflicts.is_empty()
    }
}

/// Caller choices for conflicts, keyed by canonical target. `None` skips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSelections {
    choices: BTreeMap<PathBuf, Option<usize>>,
}

impl MigrationSelections {
    pub fn select(&mut self, target: impl Into<PathBuf>, choice: Option<usize>) {
        self.choices.insert(target.into(), choice);
    }

    pub fn get(&self, target: &Path) -> Option<usize> {
        self.choices.get(target).copied().flatten()
    }

    /// Picks `client`'s candidate for every conflict, falling back to
    /// keeping existing canonical content, else skipping.
    pub fn prefer_client(plan: &MigrationPlan, client: Client) -> Self {
        Self::resolve(plan, Some(client))
    }

    /// Keeps existing canonical content where there is any; every other
    /// conflict is skipped.
    pub fn keep_existing(plan: &MigrationPlan) -> Self {
        Self::resolve(plan, None)
    }

    fn resolve(plan: &MigrationPlan, client: Option<Client>) -> Self {
        let mut selections = Self::default();
        for conflict in &plan.conflicts {
            let candidates = &conflict.candidates;
            let by_client = client.and_then(|client| {
                candidates
                    .iter()
                    .position(|candidate| candidate.client == Some(client))
            });
            let choice = by_client.or_else(|| {
                candidates
                    .iter()
                    .position(|candidate| candidate.action == CandidateAction::Keep)
            });
            selections.select(conflict.target_path.clone(), choice);
        }
        selections
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MigrationApplyOptions {
    /// Replace client directories that still hold real content with links.
    pub force_links: bool,
}

impl Default for MigrationApplyOptions {
    fn default() -> Self {
        Self { force_links: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationApplyReport {
    pub copied: usize,
    pub skipped: usize,
    pub backup_dir: PathBuf,
    pub links: ApplyReport,
}

struct Discovered {
    client: Client,
    source: PathBuf,
    target: PathBuf,
    kind: LinkKind,
}

fn label_for(roots: &ResolvedRoots, client: Client, source: &Path) -> String {
    let shown = source.strip_prefix(&roots.base).unwrap_or(source);
    format!("{}: {}", client.display_name(), shown.display())
}

/// Regular files directly inside `dir`, sorted by name. Hidden files and
/// symlinks are not migrated.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>, FsError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).at("read directory", dir)? {
        let entry = entry.at("read directory", dir)?;
        let file_type = entry.file_type().at("inspect", &entry.path())?;
        if !file_type.is_file() || entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

fn list_skill_dirs(dir: &Path) -> Result<Vec<PathBuf>, FsError> {
    let mut skills = Vec::new();
    for entry in fs::read_dir(dir).at("read directory", dir)? {
        let entry = entry.at("read directory", dir)?;
        let file_type = entry.file_type().at("inspect", &entry.path())?;
        if file_type.is_dir() && is_valid_skill_dir(&entry.path()) {
            skills.push(entry.path());
        }
    }
    skills.sort();
    Ok(skills)
}

/// A client directory is only scanned when it is a real directory; a
/// symlink means it was already migrated.
fn real_dir(path: &Path) -> Result<bool, FsError> {
    Ok(entry_kind(path)? == Some(EntryKind::Dir))
}

fn discover(roots: &ResolvedRoots, clients: &[Client]) -> Result<Vec<Discovered>, FsError> {
    let canonical = &roots.canonical_root;
    let mut found = Vec::new();

    for client in normalize_clients(clients) {
        if let Some((file, canonical_name)) = client.instructions(roots) {
            if entry_kind(&file)? == Some(EntryKind::File) {
                found.push(Discovered {
                    client,
                    source: file,
                    target: canonical.join(canonical_name),
                    kind: LinkKind::File,
                });
            }
        }

        let file_dirs = [
            (client.commands_dir(roots), COMMANDS_DIR),
            (client.hooks_dir(roots), HOOKS_DIR),
        ];
        for (dir, canonical_dir) in file_dirs {
            let Some(dir) = dir else { continue };
            if !real_dir(&dir)? {
                continue;
            }
            for file in list_files(&dir)? {
                let Some(name) = file.file_name() else { continue };
                found.push(Discovered {
                    client,
                    target: canonical.join(canonical_dir).join(name),
                    source: file,
                    kind: LinkKind::File,
                });
            }
        }

        if let Some(dir) = client.skills_dir(roots) {
            if real_dir(&dir)? {
                for skill in list_skill_dirs(&dir)? {
                    let Some(name) = skill.file_name() else { continue };
                    found.push(Discovered {
                        client,
                        target: canonical.join(SKILLS_DIR).join(name),
                        source: skill,
                        kind: LinkKind::Dir,
                    });
                }
            }
        }
    }
    Ok(found)
}

/// Groups pre-existing client content by the canonical path it would land
/// on. Targets with a single source and no canonical content resolve
/// automatically; everything else needs a caller decision.
pub fn scan_migration(
    roots: &ResolvedRoots,
    clients: &[Client],
) -> Result<MigrationPlan, MigrationError> {
    let mut grouped: BTreeMap<PathBuf, Vec<MigrationCandidate>> = BTreeMap::new();
    for item in discover(roots, clients)? {
        grouped
            .entry(item.target.clone())
            .or_default()
            .push(MigrationCandidate {
                label: label_for(roots, item.client, &item.source),
                target_path: item.target,
                kind: item.kind,
                action: CandidateAction::Copy,
                source_path: Some(item.source),
                client: Some(item.client),
            });
    }

    let mut auto = Vec::new();
    let mut conflicts = Vec::new();
    for (target, mut candidates) in grouped {
        let kind = candidates[0].kind;
        let existing = fsops::path_exists(&target);
        if !existing && candidates.len() == 1 {
            auto.append(&mut candidates);
            continue;
        }
        if existing {
            let shown = target.strip_prefix(&roots.base).unwrap_or(&target);
            candidates.insert(
                0,
                MigrationCandidate {
                    label: format!("Keep existing {}", shown.display()),
                    target_path: target.clone(),
                    kind,
                    action: CandidateAction::Keep,
                    source_path: None,
                    client: None,
                },
            );
        }
        conflicts.push(MigrationConflict {
            target_path: target,
            kind,
            candidates,
        });
    }
    tracing::debug!(
        auto = auto.len(),
        conflicts = conflicts.len(),
        "scanned migration candidates"
    );

    Ok(MigrationPlan {
        auto,
        conflicts,
        canonical_root: roots.canonical_root.clone(),
    })
}

fn copy_candidate(
    candidate: &MigrationCandidate,
    session: &mut BackupSession,
) -> Result<(), MigrationError> {
    let source = candidate
        .source_path
        .as_ref()
        .ok_or_else(|| MigrationError::MissingSource(candidate.label.clone()))?;
    let target = &candidate.target_path;
    if fsops::path_exists(target) {
        session.backup(target)?;
        fsops::remove_path(target)?;
    } else {
        session.ensure_parent(target)?;
        session.record_created(target, candidate.kind.entry_kind())?;
    }
    fsops::copy_path(source, target)?;
    tracing::info!(from = %source.display(), to = %target.display(), "migrated");
    Ok(())
}

/// Auto candidates plus the selected one per conflict, with the number of
/// conflicts left unselected.
fn accepted_candidates<'a>(
    plan: &'a MigrationPlan,
    selections: &MigrationSelections,
) -> Result<(Vec<&'a MigrationCandidate>, usize), MigrationError> {
    let mut accepted: Vec<&MigrationCandidate> = plan.auto.iter().collect();
    let mut skipped = 0usize;
    for conflict in &plan.conflicts {
        match selections.get(&conflict.target_path) {
            Some(index) => {
                let candidate = conflict.candidates.get(index).ok_or_else(|| {
                    MigrationError::InvalidSelection {
                        target: conflict.target_path.clone(),
                        index,
                    }
                })?;
                accepted.push(candidate);
            }
            None => skipped += 1,
        }
    }
    Ok((accepted, skipped))
}

/// Dry run of the backups `apply_migration` would perform: canonical paths
/// overwritten by a copy, then client paths replaced by links.
pub fn preflight_migration(
    roots: &ResolvedRoots,
    clients: &[Client],
    plan: &MigrationPlan,
    selections: &MigrationSelections,
    options: &MigrationApplyOptions,
) -> Result<PreflightReport, MigrationError> {
    let (accepted, _) = accepted_candidates(plan, selections)?;
    let mut paths: Vec<PathBuf> = accepted
        .iter()
        .filter(|candidate| matches!(candidate.action, CandidateAction::Copy))
        .map(|candidate| candidate.target_path.clone())
        .collect();
    let link_plan = build_link_plan(&build_mappings(roots, clients))?;
    paths.extend(backup_candidates(
        &link_plan,
        &ApplyOptions {
            force: options.force_links,
        },
    ));
    Ok(preflight_backup(&paths, &roots.backup_root()))
}

/// Copies accepted candidates into the canonical root, then relinks every
/// client through the same session.
pub fn apply_migration(
    roots: &ResolvedRoots,
    clients: &[Client],
    plan: &MigrationPlan,
    selections: &MigrationSelections,
    options: &MigrationApplyOptions,
    session: &mut BackupSession,
) -> Result<MigrationApplyReport, MigrationError> {
    let (accepted, mut skipped) = accepted_candidates(plan, selections)?;

    let mut copied = 0usize;
    for candidate in accepted {
        match candidate.action {
            CandidateAction::Keep => skipped += 1,
            CandidateAction::Copy => {
                copy_candidate(candidate, session)?;
                copied += 1;
            }
        }
    }

    let mappings = build_mappings(roots, clients);
    let link_plan = build_link_plan(&mappings)?;
    let links = apply_link_plan(
        &link_plan,
        &ApplyOptions {
            force: options.force_links,
        },
        Some(&mut *session),
    )?;

    Ok(MigrationApplyReport {
        copied,
        skipped,
        backup_dir: session.dir().to_path_buf(),
        links,
    })
}
