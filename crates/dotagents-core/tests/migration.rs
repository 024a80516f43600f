#![cfg(unix)]

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use dotagents_core::backup::{read_manifest, BackupEntry, BackupSession};
use dotagents_core::mappings::Client;
use dotagents_core::migration::{
    apply_migration, scan_migration, CandidateAction, MigrationApplyOptions, MigrationSelections,
};
use dotagents_core::roots::{ResolvedRoots, Scope};
use dotagents_core::undo::undo_last_change;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

fn session(roots: &ResolvedRoots) -> BackupSession {
    BackupSession::create(&roots.canonical_root, roots.scope, "migrate", None).expect("session")
}

#[test]
fn unique_codex_prompt_is_migrated_and_linked() {
    let project = TempDir::new().expect("project");
    let roots = ResolvedRoots::new(Scope::Project, project.path()).expect("roots");
    let prompts = project.path().join(".codex").join("prompts");
    write(&prompts.join("unique.md"), "only codex has this");

    let plan = scan_migration(&roots, &Client::ALL).expect("scan");
    assert_eq!(plan.auto.len(), 1);
    assert!(plan.conflicts.is_empty());

    let mut session = session(&roots);
    let report = apply_migration(
        &roots,
        &Client::ALL,
        &plan,
        &MigrationSelections::default(),
        &MigrationApplyOptions::default(),
        &mut session,
    )
    .expect("migrate");
    session.finalize().expect("finalize");

    assert_eq!(report.copied, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.links.backed_up, 1);
    assert_eq!(
        fs::read_to_string(roots.canonical_root.join("commands").join("unique.md"))
            .expect("canonical copy"),
        "only codex has this"
    );
    assert!(fs::symlink_metadata(&prompts)
        .expect("meta")
        .file_type()
        .is_symlink());
    assert_eq!(
        fs::read_to_string(prompts.join("unique.md")).expect("through link"),
        "only codex has this"
    );

    // Scanning again finds nothing: the client directory is now a link.
    assert!(scan_migration(&roots, &Client::ALL).expect("rescan").is_empty());
}

#[test]
fn unique_codex_prompt_migrates_in_global_scope() {
    let home = TempDir::new().expect("home");
    let roots = ResolvedRoots::new(Scope::Global, home.path()).expect("roots");
    let prompts = home.path().join(".codex").join("prompts");
    write(&prompts.join("unique.md"), "global prompt");

    let plan = scan_migration(&roots, &Client::ALL).expect("scan");
    assert_eq!(plan.auto.len(), 1);
    assert_eq!(
        plan.auto[0].target_path,
        roots.canonical_root.join("commands").join("unique.md")
    );

    let mut session = session(&roots);
    let report = apply_migration(
        &roots,
        &Client::ALL,
        &plan,
        &MigrationSelections::default(),
        &MigrationApplyOptions::default(),
        &mut session,
    )
    .expect("migrate");
    session.finalize().expect("finalize");

    assert_eq!(report.copied, 1);
    assert!(fs::symlink_metadata(&prompts)
        .expect("meta")
        .file_type()
        .is_symlink());
    assert_eq!(
        fs::read_to_string(prompts.join("unique.md")).expect("through link"),
        "global prompt"
    );

    // Undo removes every client directory the migration created.
    undo_last_change(&roots).expect("undo");
    let mut top: Vec<String> = fs::read_dir(home.path())
        .expect("read home")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    top.sort();
    assert_eq!(top, vec![".agents".to_string(), ".codex".to_string()]);
    assert_eq!(
        fs::read_to_string(prompts.join("unique.md")).expect("restored"),
        "global prompt"
    );
}

#[test]
fn conflicting_commands_resolve_to_the_preferred_client() {
    let project = TempDir::new().expect("project");
    let roots = ResolvedRoots::new(Scope::Project, project.path()).expect("roots");
    let claude_file = project.path().join(".claude/commands/log-session.md");
    let factory_file = project.path().join(".factory/commands/log-session.md");
    write(&claude_file, "claude version");
    write(&factory_file, "factory version");

    let plan = scan_migration(&roots, &Client::ALL).expect("scan");
    assert!(plan.auto.is_empty());
    assert_eq!(plan.conflicts.len(), 1);
    let conflict = &plan.conflicts[0];
    assert_eq!(
        conflict.target_path,
        roots.canonical_root.join("commands").join("log-session.md")
    );
    assert_eq!(conflict.candidates.len(), 2);
    assert!(conflict
        .candidates
        .iter()
        .all(|candidate| candidate.action == CandidateAction::Copy));

    let selections = MigrationSelections::prefer_client(&plan, Client::Claude);
    let mut session = session(&roots);
    let report = apply_migration(
        &roots,
        &Client::ALL,
        &plan,
        &selections,
        &MigrationApplyOptions::default(),
        &mut session,
    )
    .expect("migrate");
    let dir = session.finalize().expect("finalize");

    assert_eq!(report.copied, 1);
    assert_eq!(
        fs::read_to_string(&conflict.target_path).expect("canonical"),
        "claude version"
    );

    let manifest = read_manifest(&dir).expect("manifest");
    let covered = manifest.entries.iter().any(|entry| match entry {
        BackupEntry::Backup { original_path, .. } => factory_file.starts_with(original_path),
        BackupEntry::Create { .. } => false,
    });
    assert!(covered, "factory content must be backed up");

    // Undo brings both client directories back as they were.
    undo_last_change(&roots).expect("undo");
    assert_eq!(
        fs::read_to_string(&factory_file).expect("factory restored"),
        "factory version"
    );
    assert_eq!(
        fs::read_to_string(&claude_file).expect("claude restored"),
        "claude version"
    );
    assert!(!conflict.target_path.exists());
}

#[test]
fn unresolved_conflicts_are_skipped_but_links_still_apply() {
    let project = TempDir::new().expect("project");
    let roots = ResolvedRoots::new(Scope::Project, project.path()).expect("roots");
    write(&project.path().join(".claude/hooks/pre.sh"), "a");
    write(&project.path().join(".factory/hooks/pre.sh"), "b");

    let plan = scan_migration(&roots, &[Client::Claude, Client::Factory]).expect("scan");
    let mut session = session(&roots);
    let report = apply_migration(
        &roots,
        &[Client::Claude, Client::Factory],
        &plan,
        &MigrationSelections::keep_existing(&plan),
        &MigrationApplyOptions { force_links: false },
        &mut session,
    )
    .expect("migrate");
    session.finish().expect("finish");

    assert_eq!(report.copied, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.links.conflicts, 2);
    assert_eq!(
        fs::read_to_string(project.path().join(".claude/hooks/pre.sh")).expect("untouched"),
        "a"
    );
}
