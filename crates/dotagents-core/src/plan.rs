use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fsops::{self, count_entries, entry_kind, normalize, EntryKind, FsError};
use crate::mappings::{LinkKind, Mapping};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LinkTask {
    /// Canonical source is missing and must be created before linking.
    #[serde(rename_all = "camelCase")]
    EnsureSource { source: PathBuf, kind: LinkKind },
    /// Target is missing, or a symlink pointing somewhere else.
    #[serde(rename_all = "camelCase")]
    Link {
        source: PathBuf,
        target: PathBuf,
        kind: LinkKind,
        replace_symlink: bool,
    },
    /// Target holds real content.
    #[serde(rename_all = "camelCase")]
    Conflict {
        source: PathBuf,
        target: PathBuf,
        kind: LinkKind,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Noop {
        source: PathBuf,
        target: PathBuf,
        kind: LinkKind,
    },
}

impl LinkTask {
    pub fn source(&self) -> &Path {
        match self {
            Self::EnsureSource { source, .. }
            | Self::Link { source, .. }
            | Self::Conflict { source, .. }
            | Self::Noop { source, .. } => source,
        }
    }

    pub fn target(&self) -> Option<&Path> {
        match self {
            Self::EnsureSource { .. } => None,
            Self::Link { target, .. }
            | Self::Conflict { target, .. }
            | Self::Noop { target, .. } => Some(target),
        }
    }

    pub fn is_change(&self) -> bool {
        matches!(self, Self::EnsureSource { .. } | Self::Link { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LinkPlan {
    pub tasks: Vec<LinkTask>,
    pub conflicts: Vec<LinkTask>,
    pub changes: Vec<LinkTask>,
}

impl LinkPlan {
    pub fn from_tasks(tasks: Vec<LinkTask>) -> Self {
        let conflicts = tasks
            .iter()
            .filter(|task| matches!(task, LinkTask::Conflict { .. }))
            .cloned()
            .collect();
        let changes = tasks.iter().filter(|task| task.is_change()).cloned().collect();
        Self {
            tasks,
            conflicts,
            changes,
        }
    }
}

/// What sits at a target, relative to the source it should link to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TargetState {
    Missing,
    LinkedTo(PathBuf),
    Linked,
    Real { reason: String },
}

fn inspect_target(source: &Path, target: &Path) -> Result<TargetState, FsError> {
    match entry_kind(target)? {
        None => Ok(TargetState::Missing),
        Some(EntryKind::Symlink) => {
            let resolved = fsops::resolve_link(target)?;
            if points_at(&resolved, source) {
                Ok(TargetState::Linked)
            } else {
                Ok(TargetState::LinkedTo(resolved))
            }
        }
        Some(EntryKind::Dir) => {
            let count = count_entries(target)?;
            Ok(TargetState::Real {
                reason: format!("existing directory with {count} entries"),
            })
        }
        Some(EntryKind::File) => {
            let len = fs::symlink_metadata(target).map(|m| m.len()).unwrap_or(0);
            Ok(TargetState::Real {
                reason: format!("existing file ({len} bytes)"),
            })
        }
    }
}

/// Lexical comparison first; canonical paths settle aliases such as a
/// symlinked home directory.
fn points_at(resolved: &Path, source: &Path) -> bool {
    if resolved == normalize(source) {
        return true;
    }
    match (fs::canonicalize(resolved), fs::canonicalize(source)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Diffs the mapping table against the filesystem. The result only depends
/// on filesystem state, so identical state yields an identical plan.
pub fn build_link_plan(mappings: &[Mapping]) -> Result<LinkPlan, FsError> {
    let mut tasks = Vec::new();
    let mut ensured: BTreeSet<PathBuf> = BTreeSet::new();

    for mapping in mappings {
        let source = &mapping.source;
        if !fsops::path_exists(source) && ensured.insert(source.clone()) {
            tasks.push(LinkTask::EnsureSource {
                source: source.clone(),
                kind: mapping.kind,
            });
        }

        for target in &mapping.targets {
            let task = match inspect_target(source, target)? {
                TargetState::Missing => LinkTask::Link {
                    source: source.clone(),
                    target: target.clone(),
                    kind: mapping.kind,
                    replace_symlink: false,
                },
                TargetState::LinkedTo(_) => LinkTask::Link {
                    source: source.clone(),
                    target: target.clone(),
                    kind: mapping.kind,
                    replace_symlink: true,
                },
                TargetState::Linked => LinkTask::Noop {
                    source: source.clone(),
                    target: target.clone(),
                    kind: mapping.kind,
                },
                TargetState::Real { reason } => LinkTask::Conflict {
                    source: source.clone(),
                    target: target.clone(),
                    kind: mapping.kind,
                    reason,
                },
            };
            tracing::debug!(mapping = %mapping.name, path = %target.display(), ?task, "classified target");
            tasks.push(task);
        }
    }

    Ok(LinkPlan::from_tasks(tasks))
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Linked,
    Missing,
    Conflict,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetStatus {
    pub target: PathBuf,
    pub state: LinkState,
    /// Where a foreign symlink currently points, or why the target conflicts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingStatus {
    pub name: String,
    pub source: PathBuf,
    pub source_exists: bool,
    pub kind: LinkKind,
    pub targets: Vec<TargetStatus>,
}

pub fn get_link_status(mappings: &[Mapping]) -> Result<Vec<MappingStatus>, FsError> {
    let mut out = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let mut targets = Vec::with_capacity(mapping.targets.len());
        for target in &mapping.targets {
            let (state, detail) = match inspect_target(&mapping.source, target)? {
                TargetState::Linked => (LinkState::Linked, None),
                TargetState::Missing => (LinkState::Missing, None),
                TargetState::LinkedTo(elsewhere) => (
                    LinkState::Missing,
                    Some(format!("links to {}", elsewhere.display())),
                ),
                TargetState::Real { reason } => (LinkState::Conflict, Some(reason)),
            };
            targets.push(TargetStatus {
                target: target.clone(),
                state,
                detail,
            });
        }
        out.push(MappingStatus {
            name: mapping.name.clone(),
            source: mapping.source.clone(),
            source_exists: fsops::path_exists(&mapping.source),
            kind: mapping.kind,
            targets,
        });
    }
    Ok(out)
}
