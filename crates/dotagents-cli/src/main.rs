mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use dotagents_core::apply::{apply_link_plan, preflight_link_plan, ApplyOptions};
use dotagents_core::backup::BackupSession;
use dotagents_core::config::LayeredConfig;
use dotagents_core::mappings::{build_mappings, Client};
use dotagents_core::migration::{
    apply_migration, preflight_migration, scan_migration, MigrationApplyOptions,
    MigrationSelections,
};
use dotagents_core::plan::{build_link_plan, get_link_status};
use dotagents_core::roots::{
    resolve_roots, resolve_user_home_dir, ResolvedRoots, RootOptions, Scope,
};
use dotagents_core::skills::{list_skills, skills_dir};
use dotagents_core::undo::{undo_last_change, UndoError};

#[derive(Parser)]
#[command(
    name = "dotagents",
    version = dotagents_core::version(),
    about = "Link one canonical .agents directory into every coding agent's config"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Operate on the home directory (global) or the current project.
    #[arg(
        long,
        global = true,
        default_value = "global",
        value_parser = parse_scope,
        env = "DOTAGENTS_SCOPE"
    )]
    scope: Scope,
    /// Home directory override.
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    /// Project directory override.
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,
    /// Restrict to these clients (repeatable). Defaults to config, then all.
    #[arg(long = "client", global = true, value_parser = parse_client)]
    clients: Vec<Client>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show link status for every mapping and the installed skills
    Status,
    /// Print the link plan without changing anything
    Plan,
    /// Check that the backups an apply would make can succeed
    Preflight {
        #[arg(long)]
        force: bool,
        #[arg(long, conflicts_with = "force")]
        no_force: bool,
    },
    /// Create missing sources and links
    Apply {
        /// Back up and replace conflicting content
        #[arg(long)]
        force: bool,
        /// Leave conflicts alone even when the config sets `force`
        #[arg(long, conflicts_with = "force")]
        no_force: bool,
        /// Skip the backup session (changes cannot be undone)
        #[arg(long)]
        no_backup: bool,
    },
    /// Copy existing client content into the canonical root, then link
    Migrate {
        /// Resolve conflicts with this client's version
        #[arg(long, value_parser = parse_client)]
        prefer: Option<Client>,
        /// Replace client directories that still hold content with links
        #[arg(long)]
        force_links: bool,
        /// Leave client directories that still hold content in place
        #[arg(long, conflicts_with = "force_links")]
        no_force_links: bool,
        /// Only print what would be migrated
        #[arg(long)]
        dry_run: bool,
    },
    /// Revert the most recent apply, migrate or undo
    Undo,
    /// List valid skills in the canonical root
    Skills,
}

fn parse_scope(value: &str) -> Result<Scope, String> {
    Scope::parse(value)
        .ok_or_else(|| format!("unknown scope '{value}' (expected global or project)"))
}

/// A `--flag`/`--no-flag` pair over a configured value; either flag wins.
fn resolve_switch(on: bool, off: bool, configured: bool) -> bool {
    if off {
        false
    } else {
        on || configured
    }
}

fn parse_client(value: &str) -> Result<Client, String> {
    Client::parse(value).ok_or_else(|| {
        let known: Vec<&str> = Client::ALL.iter().map(|c| c.as_str()).collect();
        format!("unknown client '{value}' (expected one of {})", known.join(", "))
    })
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("DOTAGENTS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct CliContext {
    roots: ResolvedRoots,
    config: LayeredConfig,
    clients: Vec<Client>,
    clients_source: &'static str,
    json: bool,
}

impl CliContext {
    fn load(args: &GlobalArgs) -> Result<Self> {
        let cwd = match &args.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().context("resolve current directory")?,
        };
        let home = args.home.clone().or_else(resolve_user_home_dir);
        let roots = resolve_roots(&RootOptions {
            scope: args.scope,
            home: home.clone(),
            cwd: Some(cwd.clone()),
        })?;
        let config = LayeredConfig::load(home.as_deref(), Some(&cwd)).context("load config")?;
        let (clients, clients_source) = if args.clients.is_empty() {
            config.clients_with_source()?
        } else {
            (args.clients.clone(), "flag")
        };
        tracing::debug!(
            scope = %roots.scope,
            base = %roots.base.display(),
            clients = ?clients,
            source = clients_source,
            "resolved context"
        );
        Ok(Self {
            roots,
            config,
            clients,
            clients_source,
            json: args.json,
        })
    }

    fn open_session(&self, operation: &str) -> Result<BackupSession> {
        BackupSession::create(&self.roots.canonical_root, self.roots.scope, operation, None)
            .context("open backup session")
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let ctx = CliContext::load(&cli.global)?;
    match cli.command {
        Command::Status => cmd_status(&ctx),
        Command::Plan => cmd_plan(&ctx),
        Command::Preflight { force, no_force } => {
            let force = resolve_switch(force, no_force, ctx.config.force_with_source().0);
            cmd_preflight(&ctx, force)
        }
        Command::Apply {
            force,
            no_force,
            no_backup,
        } => {
            let force = resolve_switch(force, no_force, ctx.config.force_with_source().0);
            cmd_apply(&ctx, force, no_backup)
        }
        Command::Migrate {
            prefer,
            force_links,
            no_force_links,
            dry_run,
        } => {
            let force_links = resolve_switch(
                force_links,
                no_force_links,
                ctx.config.force_links_with_source().0,
            );
            cmd_migrate(&ctx, prefer, force_links, dry_run)
        }
        Command::Undo => cmd_undo(&ctx),
        Command::Skills => cmd_skills(&ctx),
    }
}

fn cmd_status(ctx: &CliContext) -> Result<ExitCode> {
    let mappings = build_mappings(&ctx.roots, &ctx.clients);
    let status = get_link_status(&mappings).context("inspect links")?;
    let skills = list_skills(&skills_dir(&ctx.roots.canonical_root));
    if ctx.json {
        print_json(&json!({
            "ok": true,
            "scope": ctx.roots.scope,
            "canonicalRoot": ctx.roots.canonical_root,
            "clients": ctx.clients,
            "clientsSource": ctx.clients_source,
            "mappings": status,
            "skills": skills,
        }))?;
    } else {
        print!(
            "{}",
            render::status_text(&ctx.roots, &ctx.clients, ctx.clients_source, &status, &skills)
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_plan(ctx: &CliContext) -> Result<ExitCode> {
    let plan = build_link_plan(&build_mappings(&ctx.roots, &ctx.clients)).context("build plan")?;
    if ctx.json {
        print_json(&json!({ "ok": true, "scope": ctx.roots.scope, "plan": plan }))?;
    } else {
        print!("{}", render::plan_text(&plan));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_preflight(ctx: &CliContext, force: bool) -> Result<ExitCode> {
    let plan = build_link_plan(&build_mappings(&ctx.roots, &ctx.clients)).context("build plan")?;
    let report = preflight_link_plan(&plan, &ApplyOptions { force }, &ctx.roots.canonical_root);
    if ctx.json {
        print_json(&json!({ "ok": report.ok(), "force": force, "report": report }))?;
    } else {
        print!("{}", render::preflight_text(&report));
    }
    Ok(if report.ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_apply(ctx: &CliContext, force: bool, no_backup: bool) -> Result<ExitCode> {
    let plan = build_link_plan(&build_mappings(&ctx.roots, &ctx.clients)).context("build plan")?;
    let options = ApplyOptions { force };
    let (report, backup_dir) = if no_backup {
        (apply_link_plan(&plan, &options, None)?, None)
    } else {
        if force {
            let preflight = preflight_link_plan(&plan, &options, &ctx.roots.canonical_root);
            if !preflight.ok() {
                bail!(
                    "preflight failed, nothing was changed\n{}",
                    render::preflight_text(&preflight)
                );
            }
        }
        let mut session = ctx.open_session("apply")?;
        let report = apply_link_plan(&plan, &options, Some(&mut session))?;
        (report, session.finish()?)
    };

    if ctx.json {
        print_json(&json!({
            "ok": true,
            "report": report,
            "backupDir": backup_dir,
        }))?;
    } else {
        print!("{}", render::apply_text(&report, backup_dir.as_deref()));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_migrate(
    ctx: &CliContext,
    prefer: Option<Client>,
    force_links: bool,
    dry_run: bool,
) -> Result<ExitCode> {
    let plan = scan_migration(&ctx.roots, &ctx.clients).context("scan for migration")?;
    if dry_run {
        if ctx.json {
            print_json(&json!({ "ok": true, "dryRun": true, "plan": plan }))?;
        } else {
            print!("{}", render::migration_plan_text(&plan));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let selections = match prefer {
        Some(client) => MigrationSelections::prefer_client(&plan, client),
        None => MigrationSelections::keep_existing(&plan),
    };
    let options = MigrationApplyOptions { force_links };
    let preflight = preflight_migration(&ctx.roots, &ctx.clients, &plan, &selections, &options)
        .context("preflight migration")?;
    if !preflight.ok() {
        bail!("preflight failed, nothing was changed\n{}", render::preflight_text(&preflight));
    }
    let mut session = ctx.open_session("migrate")?;
    let report = apply_migration(
        &ctx.roots,
        &ctx.clients,
        &plan,
        &selections,
        &options,
        &mut session,
    )?;
    let backup_dir = session.finish()?;

    if ctx.json {
        print_json(&json!({
            "ok": true,
            "copied": report.copied,
            "skipped": report.skipped,
            "links": report.links,
            "backupDir": backup_dir,
        }))?;
    } else {
        print!("{}", render::migration_text(&report, backup_dir.as_deref()));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_undo(ctx: &CliContext) -> Result<ExitCode> {
    match undo_last_change(&ctx.roots) {
        Ok(report) => {
            if ctx.json {
                print_json(&json!({ "ok": true, "undo": report }))?;
            } else {
                print!("{}", render::undo_text(&report));
            }
        }
        Err(UndoError::NoBackups(root)) => {
            if ctx.json {
                print_json(&json!({ "ok": true, "undo": null, "message": "no backups found" }))?;
            } else {
                println!("No backups found under {}; nothing to undo.", root.display());
            }
        }
        Err(err) => return Err(err).context("undo"),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_skills(ctx: &CliContext) -> Result<ExitCode> {
    let skills = list_skills(&skills_dir(&ctx.roots.canonical_root));
    if ctx.json {
        print_json(&json!({ "ok": true, "skills": skills }))?;
    } else {
        print!("{}", render::skills_text(&skills));
    }
    Ok(ExitCode::SUCCESS)
}
