#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use walkdir::WalkDir;

use dotagents_core::apply::{apply_link_plan, ApplyOptions};
use dotagents_core::backup::{read_manifest, BackupEntry, BackupSession};
use dotagents_core::mappings::{build_mappings, Client, LinkKind};
use dotagents_core::plan::{build_link_plan, get_link_status, LinkState, LinkTask};
use dotagents_core::roots::{ResolvedRoots, Scope};
use dotagents_core::undo::undo_last_change;

/// Everything under `base` except backup sessions, as path -> content. Links
/// are recorded by their text so a restored link compares equal.
fn snapshot(base: &Path) -> BTreeMap<PathBuf, String> {
    let mut out = BTreeMap::new();
    let walker = WalkDir::new(base)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !entry.path().ends_with(".agents/backup"));
    for entry in walker {
        let entry = entry.expect("walk");
        let rel = entry.path().strip_prefix(base).expect("rel").to_path_buf();
        let value = if entry.path_is_symlink() {
            format!("link:{}", fs::read_link(entry.path()).expect("link").display())
        } else if entry.file_type().is_dir() {
            "dir".to_string()
        } else {
            fs::read_to_string(entry.path()).expect("read")
        };
        out.insert(rel, value);
    }
    out
}

fn apply(roots: &ResolvedRoots, clients: &[Client], force: bool) -> PathBuf {
    let mappings = build_mappings(roots, clients);
    let plan = build_link_plan(&mappings).expect("plan");
    let mut session =
        BackupSession::create(&roots.canonical_root, roots.scope, "apply", None).expect("session");
    apply_link_plan(&plan, &ApplyOptions { force }, Some(&mut session)).expect("apply");
    session.finalize().expect("finalize")
}

#[test]
fn forced_apply_over_real_directory_round_trips_through_undo() {
    let home = TempDir::new().expect("home");
    let roots = ResolvedRoots::new(Scope::Global, home.path()).expect("roots");
    let commands = home.path().join(".claude").join("commands");
    fs::create_dir_all(&commands).expect("commands");
    fs::write(commands.join("review.md"), "review the diff").expect("write");
    let before = snapshot(home.path());

    let session_dir = apply(&roots, &[Client::Claude], true);
    assert!(fs::symlink_metadata(&commands)
        .expect("meta")
        .file_type()
        .is_symlink());
    assert_eq!(
        fs::read_link(&commands).expect("link"),
        roots.canonical_root.join("commands")
    );
    let manifest = read_manifest(&session_dir).expect("manifest");
    assert!(manifest.entries.iter().any(|entry| matches!(
        entry,
        BackupEntry::Backup { original_path, .. } if original_path == &commands
    )));

    let report = undo_last_change(&roots).expect("undo");
    assert_eq!(report.backup_dir, session_dir);
    assert_eq!(report.restored_backups, 1);
    assert!(report.removed_symlinks >= 1);
    assert!(commands.is_dir());
    assert_eq!(
        fs::read_to_string(commands.join("review.md")).expect("restored"),
        "review the diff"
    );

    let mut after = snapshot(home.path());
    // The canonical root itself survives because the backup directory lives in it.
    after.remove(Path::new(".agents"));
    assert_eq!(after, before);
}

#[test]
fn unforced_apply_leaves_conflicts_and_status_reports_them() {
    let home = TempDir::new().expect("home");
    let roots = ResolvedRoots::new(Scope::Global, home.path()).expect("roots");
    let claude_md = home.path().join(".claude").join("CLAUDE.md");
    fs::create_dir_all(claude_md.parent().expect("parent")).expect("mkdir");
    fs::write(&claude_md, "personal notes").expect("write");

    apply(&roots, &Client::ALL, false);
    assert_eq!(fs::read_to_string(&claude_md).expect("read"), "personal notes");

    let status = get_link_status(&build_mappings(&roots, &Client::ALL)).expect("status");
    let claude = status.iter().find(|m| m.name == "claude-md").expect("claude");
    assert_eq!(claude.targets[0].state, LinkState::Conflict);
    let agents = status.iter().find(|m| m.name == "agents-md").expect("agents");
    assert!(agents.source_exists);
    assert!(agents
        .targets
        .iter()
        .all(|target| target.state == LinkState::Linked));
}

#[test]
fn reapplying_changes_nothing() {
    let home = TempDir::new().expect("home");
    let roots = ResolvedRoots::new(Scope::Global, home.path()).expect("roots");
    apply(&roots, &Client::ALL, false);

    let plan = build_link_plan(&build_mappings(&roots, &Client::ALL)).expect("plan");
    assert!(plan.changes.is_empty());
    assert!(plan.conflicts.is_empty());
    let report = apply_link_plan(&plan, &ApplyOptions { force: true }, None).expect("apply");
    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, plan.tasks.len());
}

#[test]
fn claude_override_routes_and_relinks() {
    let home = TempDir::new().expect("home");
    let roots = ResolvedRoots::new(Scope::Global, home.path()).expect("roots");
    let target = home.path().join(".claude").join("CLAUDE.md");
    let agents = roots.canonical_root.join("AGENTS.md");
    let override_file = roots.canonical_root.join("CLAUDE.md");

    apply(&roots, &[Client::Claude], false);
    assert_eq!(fs::read_link(&target).expect("link"), agents);

    fs::write(&override_file, "claude only").expect("override");
    apply(&roots, &[Client::Claude], true);
    assert_eq!(fs::read_link(&target).expect("link"), override_file);
    assert_eq!(fs::read_to_string(&target).expect("read"), "claude only");

    fs::remove_file(&override_file).expect("remove override");
    apply(&roots, &[Client::Claude], true);
    assert_eq!(fs::read_link(&target).expect("link"), agents);
}

#[test]
fn project_scope_plans_touch_only_directories() {
    let project = TempDir::new().expect("project");
    let roots = ResolvedRoots::new(Scope::Project, project.path()).expect("roots");
    let plan = build_link_plan(&build_mappings(&roots, &Client::ALL)).expect("plan");

    assert!(!plan.tasks.is_empty());
    for task in &plan.tasks {
        let kind = match task {
            LinkTask::EnsureSource { kind, .. }
            | LinkTask::Link { kind, .. }
            | LinkTask::Conflict { kind, .. }
            | LinkTask::Noop { kind, .. } => *kind,
        };
        assert_eq!(kind, LinkKind::Dir);
        assert!(task.source().starts_with(&roots.canonical_root));
    }
}

#[test]
fn undo_of_an_undo_reapplies_links() {
    let project = TempDir::new().expect("project");
    let roots = ResolvedRoots::new(Scope::Project, project.path()).expect("roots");
    let link = project.path().join(".cursor").join("skills");

    apply(&roots, &[Client::Cursor], false);
    assert!(fs::symlink_metadata(&link).is_ok());

    let first = undo_last_change(&roots).expect("undo");
    assert!(fs::symlink_metadata(&link).is_err());
    assert!(first.undone_dir.is_some());

    let second = undo_last_change(&roots).expect("undo the undo");
    assert_eq!(Some(second.backup_dir), first.undone_dir);
    assert_eq!(
        fs::read_link(&link).expect("link"),
        roots.canonical_root.join("skills")
    );
}

#[test]
fn undo_after_fresh_apply_removes_created_client_directories() {
    let home = TempDir::new().expect("home");
    let roots = ResolvedRoots::new(Scope::Global, home.path()).expect("roots");

    apply(&roots, &Client::ALL, false);
    assert!(home.path().join(".config").join("opencode").is_dir());

    let report = undo_last_change(&roots).expect("undo");
    assert!(report.removed_created > 0);
    let mut top: Vec<String> = fs::read_dir(home.path())
        .expect("read home")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    top.sort();
    assert_eq!(top, vec![".agents".to_string()]);
}
