//! Plain-text renderings of command results.

use std::fmt::Write as _;
use std::path::Path;

use dotagents_core::apply::ApplyReport;
use dotagents_core::backup::PreflightReport;
use dotagents_core::mappings::Client;
use dotagents_core::migration::{CandidateAction, MigrationApplyReport, MigrationPlan};
use dotagents_core::plan::{LinkPlan, LinkState, LinkTask, MappingStatus};
use dotagents_core::roots::ResolvedRoots;
use dotagents_core::skills::SkillSummary;
use dotagents_core::undo::UndoReport;

fn state_label(state: LinkState) -> &'static str {
    match state {
        LinkState::Linked => "linked",
        LinkState::Missing => "missing",
        LinkState::Conflict => "conflict",
    }
}

pub fn status_text(
    roots: &ResolvedRoots,
    clients: &[Client],
    clients_source: &str,
    status: &[MappingStatus],
    skills: &[SkillSummary],
) -> String {
    let mut out = String::new();
    let names: Vec<&str> = clients.iter().map(|c| c.as_str()).collect();
    let _ = writeln!(out, "Scope: {} ({})", roots.scope, roots.canonical_root.display());
    let _ = writeln!(out, "Clients: {} [{}]", names.join(", "), clients_source);
    for mapping in status {
        let missing = if mapping.source_exists { "" } else { " (missing)" };
        let _ = writeln!(
            out,
            "\n{} <- {}{}",
            mapping.name,
            mapping.source.display(),
            missing
        );
        for target in &mapping.targets {
            let _ = write!(
                out,
                "  {:<8} {}",
                state_label(target.state),
                target.target.display()
            );
            match &target.detail {
                Some(detail) => {
                    let _ = writeln!(out, " ({detail})");
                }
                None => out.push('\n'),
            }
        }
    }
    if !skills.is_empty() {
        let _ = writeln!(out, "\nSkills: {}", skills.len());
        for skill in skills {
            let _ = writeln!(out, "  {}", skill.name);
        }
    }
    out
}

pub fn plan_text(plan: &LinkPlan) -> String {
    if plan.changes.is_empty() && plan.conflicts.is_empty() {
        return "Everything is linked.\n".to_string();
    }
    let mut out = String::new();
    for task in &plan.tasks {
        let line = match task {
            LinkTask::EnsureSource { source, .. } => format!("create  {}", source.display()),
            LinkTask::Link {
                source,
                target,
                replace_symlink,
                ..
            } => {
                let verb = if *replace_symlink { "relink " } else { "link   " };
                format!("{verb} {} -> {}", target.display(), source.display())
            }
            LinkTask::Conflict { target, reason, .. } => {
                format!("conflict {} ({reason})", target.display())
            }
            LinkTask::Noop { .. } => continue,
        };
        out.push_str(&line);
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "{} change(s), {} conflict(s)",
        plan.changes.len(),
        plan.conflicts.len()
    );
    if !plan.conflicts.is_empty() {
        out.push_str("Run apply --force to back up and replace conflicts.\n");
    }
    out
}

pub fn preflight_text(report: &PreflightReport) -> String {
    let mut out = format!("Checked {} path(s).\n", report.checked.len());
    if report.ok() {
        out.push_str("Preflight OK.\n");
        return out;
    }
    for issue in &report.issues {
        let _ = writeln!(out, "  {}: {}", issue.path.display(), issue.reason);
    }
    out
}

fn backup_line(out: &mut String, backup_dir: Option<&Path>) {
    match backup_dir {
        Some(dir) => {
            let _ = writeln!(out, "Backup: {}", dir.display());
        }
        None => out.push_str("No backup recorded.\n"),
    }
}

pub fn apply_text(report: &ApplyReport, backup_dir: Option<&Path>) -> String {
    let mut out = format!(
        "Applied {}, skipped {}, conflicts {}, backed up {}.\n",
        report.applied, report.skipped, report.conflicts, report.backed_up
    );
    backup_line(&mut out, backup_dir);
    out
}

pub fn migration_plan_text(plan: &MigrationPlan) -> String {
    if plan.is_empty() {
        return "Nothing to migrate.\n".to_string();
    }
    let mut out = String::new();
    for candidate in &plan.auto {
        let _ = writeln!(
            out,
            "copy     {} -> {}",
            candidate.label,
            candidate.target_path.display()
        );
    }
    for conflict in &plan.conflicts {
        let _ = writeln!(out, "conflict {}", conflict.target_path.display());
        for (index, candidate) in conflict.candidates.iter().enumerate() {
            let marker = match candidate.action {
                CandidateAction::Keep => "keep",
                CandidateAction::Copy => "copy",
            };
            let _ = writeln!(out, "  [{index}] {marker} {}", candidate.label);
        }
    }
    out
}

pub fn migration_text(report: &MigrationApplyReport, backup_dir: Option<&Path>) -> String {
    let mut out = format!(
        "Migrated {}, skipped {}.\n",
        report.copied, report.skipped
    );
    let links = &report.links;
    let _ = writeln!(
        out,
        "Links: applied {}, skipped {}, conflicts {}, backed up {}.",
        links.applied, links.skipped, links.conflicts, links.backed_up
    );
    backup_line(&mut out, backup_dir);
    out
}

pub fn undo_text(report: &UndoReport) -> String {
    let mut out = format!(
        "Undid {}: restored {} backup(s), removed {} created path(s) and {} link(s).\n",
        report.backup_dir.display(),
        report.restored_backups,
        report.removed_created,
        report.removed_symlinks
    );
    if let Some(dir) = &report.undone_dir {
        let _ = writeln!(out, "Undo itself can be reverted from {}", dir.display());
    }
    out
}

pub fn skills_text(skills: &[SkillSummary]) -> String {
    if skills.is_empty() {
        return "No skills found.\n".to_string();
    }
    let mut out = String::new();
    for skill in skills {
        let _ = writeln!(out, "{:<24} {}", skill.name, skill.description);
    }
    out
}
