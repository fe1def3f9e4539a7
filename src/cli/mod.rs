#![forbid(unsafe_code)]

use std::io;
use std::process::ExitCode;

use clap::{CommandFactory as _, Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use crate::config;
use crate::core::prune::{PruneOptions, PruneScope};
use crate::core::services::Services;
use crate::core::status::format_state;
use crate::core::worktree::{BranchOutcome, DeleteOptions, ListReport, SortKey};
use crate::error::TwiggitError;
use crate::output::table::Table;

pub const LOG_ENV: &str = "TWIGGIT_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "twiggit",
    version,
    about = "Manage git worktrees across a directory of projects"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a worktree for a branch
    Create(CreateArgs),
    /// Delete a worktree and, unless kept, its branch
    Delete(DeleteArgs),
    /// List worktrees of the current project or of every project
    List(ListArgs),
    /// Print the path of a project or worktree
    #[command(alias = "switch")]
    Cd(CdArgs),
    /// Remove worktrees whose branches are merged
    Prune(PruneArgs),
    /// Print the resolved configuration
    Config,
    /// Generate shell completions
    Completion(CompletionArgs),
}

#[derive(Debug, Parser)]
pub struct CreateArgs {
    /// `branch` in the current project, or `project/branch`
    pub target: String,

    /// Branch or revision to start from
    #[arg(short = 's', long = "source")]
    pub source: Option<String>,

    /// Print only the new worktree path on stdout
    #[arg(long = "cd")]
    pub cd: bool,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// `branch`, `project/branch`, or nothing for the current worktree
    pub target: Option<String>,

    /// Delete even with uncommitted changes, and force the branch delete
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Keep the branch after removing the worktree
    #[arg(long = "keep-branch")]
    pub keep_branch: bool,

    /// Refuse unless the branch is merged into the default branch
    #[arg(long = "merged-only")]
    pub merged_only: bool,

    /// Allow deleting the current worktree; prints where to go next
    #[arg(short = 'C', long = "change-dir")]
    pub change_dir: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortArg {
    Name,
    Date,
}

impl From<SortArg> for SortKey {
    fn from(s: SortArg) -> Self {
        match s {
            SortArg::Name => Self::Name,
            SortArg::Date => Self::Date,
        }
    }
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// List worktrees of every project
    #[arg(short = 'a', long = "all")]
    pub all: bool,

    #[arg(short = 's', long = "sort", value_enum, default_value = "name")]
    pub sort: SortArg,

    /// Output in JSON format
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct CdArgs {
    /// `project`, `project/branch` or `branch`
    pub target: Option<String>,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Parser)]
pub struct PruneArgs {
    /// Project to prune; defaults to the current one
    #[arg(conflicts_with = "all")]
    pub project: Option<String>,

    /// Prune every project (asks first unless --force)
    #[arg(short = 'a', long = "all")]
    pub all: bool,

    /// Show what would be pruned without removing anything
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Also delete the pruned branches
    #[arg(long = "delete-branches")]
    pub delete_branches: bool,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => report_error(&err),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false);
    if let Ok(filters) = std::env::var(LOG_ENV) {
        builder.parse_filters(&filters);
    }
    // A second init (tests calling main twice) is harmless.
    let _ = builder.try_init();
}

fn report_error(err: &anyhow::Error) -> ExitCode {
    let Some(domain) = err.downcast_ref::<TwiggitError>() else {
        eprintln!("error: {err:#}");
        return ExitCode::from(1);
    };
    if matches!(domain, TwiggitError::PruneCancelled) {
        eprintln!("Prune cancelled");
        return ExitCode::SUCCESS;
    }
    eprintln!("error: {domain}");
    if let Some(hint) = domain.suggestion() {
        eprintln!("hint: {hint}");
    }
    ExitCode::from(1)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        Commands::Completion(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "twiggit", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            print!("{}", config::list_resolved_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Create(args) => cmd_create(args).await,
        Commands::Delete(args) => cmd_delete(args).await,
        Commands::List(args) => cmd_list(args).await,
        Commands::Cd(args) => cmd_cd(args).await,
        Commands::Prune(args) => cmd_prune(args).await,
    }
}

async fn load_services() -> anyhow::Result<Services> {
    let services = tokio::task::spawn_blocking(|| -> anyhow::Result<Services> {
        let (cfg, _paths) = config::load()?;
        Services::from_config(&cfg)
    })
    .await??;
    Ok(services)
}

async fn cmd_create(args: CreateArgs) -> anyhow::Result<ExitCode> {
    let svc = load_services().await?;
    let context = svc.context.detect_from_cwd()?;
    let (project, branch) = svc.targets.resolve_for_create(&context, &args.target)?;
    let info = svc
        .worktrees
        .create(&project, &branch, args.source.as_deref())?;

    let message = format!(
        "Created worktree '{branch}' for project '{}' at {}",
        project.name,
        info.path.display()
    );
    eprintln!("{message}");
    if args.cd {
        println!("{}", info.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_delete(args: DeleteArgs) -> anyhow::Result<ExitCode> {
    let svc = load_services().await?;
    let context = svc.context.detect_from_cwd()?;
    let target = svc
        .targets
        .resolve_target(&context, args.target.as_deref().unwrap_or_default())?;

    let opts = DeleteOptions {
        force: args.force,
        keep_branch: args.keep_branch,
        merged_only: args.merged_only,
        change_dir: args.change_dir,
    };
    let outcome = svc.worktrees.delete(&target, opts, &context)?;

    let name = format!("{}/{}", target.project.name, target.branch);
    let message = match &outcome.branch {
        BranchOutcome::Deleted => format!("Deleted worktree '{name}' and its branch"),
        BranchOutcome::Kept => format!("Deleted worktree '{name}' (branch kept)"),
        BranchOutcome::Refused(why) => {
            format!("Deleted worktree '{name}'; branch kept: {why}")
        }
    };
    // Stdout is reserved for the path a shell wrapper should cd into.
    eprintln!("{message}");
    if let Some(next) = outcome.navigation {
        println!("{}", next.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_list(args: ListArgs) -> anyhow::Result<ExitCode> {
    let svc = load_services().await?;
    let projects = if args.all {
        svc.registry.list_projects()?
    } else {
        let context = svc.context.detect_from_cwd()?;
        match context.project() {
            Some(project) => vec![project.clone()],
            None => {
                let cwd = std::env::current_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| ".".to_owned());
                return Err(TwiggitError::cannot_infer(cwd).into());
            }
        }
    };

    let report = svc.worktrees.list(&projects, args.sort.into())?;

    if args.json {
        let mut out = serde_json::to_string_pretty(&report)?;
        out.push('\n');
        print!("{out}");
        return Ok(ExitCode::SUCCESS);
    }

    print_worktree_table(&report);
    Ok(ExitCode::SUCCESS)
}

fn print_worktree_table(report: &ListReport) {
    for issue in &report.inconsistencies {
        eprintln!("warning: {issue}");
    }
    if report.worktrees.is_empty() {
        println!("No worktrees found");
        return;
    }

    let mut t = Table::new(["PROJECT", "BRANCH", "COMMIT", "STATE", "MODIFIED", "PATH"]);
    for wt in &report.worktrees {
        let marker = if wt.is_main { "● " } else { "  " };
        t.row([
            wt.project.clone(),
            format!("{marker}{}", wt.info.display_branch()),
            truncate_hash(&wt.info.commit),
            format_state(wt.info.state).to_owned(),
            wt.modified.as_deref().map(format_modified).unwrap_or_default(),
            wt.info.path.display().to_string(),
        ]);
    }
    print!("{}", t.render());
}

fn truncate_hash(hash: &str) -> String {
    hash.chars().take(7).collect()
}

/// `2026-10-18T09:30:12Z` becomes `2026-10-18 09:30`.
fn format_modified(rfc3339: &str) -> String {
    rfc3339.chars().take(16).collect::<String>().replacen('T', " ", 1)
}

async fn cmd_cd(args: CdArgs) -> anyhow::Result<ExitCode> {
    let svc = load_services().await?;
    let context = svc.context.detect_from_cwd()?;
    let plan = svc.navigation.plan(&context, args.target.as_deref())?;
    log::info!("{}", plan.summary);
    println!("{}", plan.path.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_prune(args: PruneArgs) -> anyhow::Result<ExitCode> {
    let svc = load_services().await?;
    let context = svc.context.detect_from_cwd()?;
    let scope = if args.all {
        PruneScope::All
    } else if let Some(name) = &args.project {
        PruneScope::Project(svc.registry.resolve(name)?)
    } else {
        match context.project() {
            Some(project) => PruneScope::Project(project.clone()),
            None => return Err(TwiggitError::cannot_infer("prune").into()),
        }
    };

    let opts = PruneOptions {
        dry_run: args.dry_run,
        force: args.force,
        delete_branches: args.delete_branches,
    };
    let mut input = io::stdin().lock();
    let mut prompt = io::stderr();
    let report = svc
        .worktrees
        .prune(&scope, opts, &context, &mut input, &mut prompt)
        .await?;

    if report.entries.is_empty() {
        println!("Nothing to prune");
        return Ok(ExitCode::SUCCESS);
    }
    for entry in &report.entries {
        println!("{entry}");
    }
    println!("{}", report.summary());

    if report.has_failures() {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}
