//! xcopy - copy, move, import and export directory trees
//!
//! Every run is one engine task between two configured roots. Name clashes the
//! given policies do not cover either stop the run (exit status 2) or, with
//! `--interactive`, are resolved one prompt at a time.

mod display;
mod json_output;
mod progress;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select};
use display::{display_report, display_success, display_warning};
use json_output::{ProblemJson, TaskResultJson};
use progress::TaskProgress;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info};
use xcopy_config::{BackendConfig, Config, ConfigLoader, LoggingConfig};
use xcopy_engine::{
    ConflictInfo, EngineBuilder, NodeView, TaskEvent, TaskId, TaskRequest, TaskStatus, XcopyEngine,
};
use xcopy_fs::LocalBackend;
use xcopy_types::{Backend, EntityKind, InFlightLimit, Location, Policy, PolicyPair, TaskType};

/// Some entries failed or were dropped
const EXIT_FAILURES: u8 = 1;
/// Stopped on conflicts no policy covered
const EXIT_CONFLICTS: u8 = 2;

/// xcopy - copy and move directory trees with name conflict policies
#[derive(Parser, Debug)]
#[command(
    name = "xcopy",
    version = env!("CARGO_PKG_VERSION"),
    about = "Copy, move, import and export directory trees",
    long_about = "xcopy runs a copy, move, import or export task between two configured roots.\n\
                  Locations are written ID:PATH, where ID names a drive or native root from the\n\
                  configuration or from --drive/--native. Policies are SAME,DIFF pairs of\n\
                  keep, skip, rename or replace; an empty side is unset."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Add a drive root
    #[arg(long = "drive", value_name = "ID=PATH", value_parser = parse_root, global = true)]
    drives: Vec<(String, PathBuf)>,

    /// Add a native filesystem root
    #[arg(long = "native", value_name = "ID=PATH", value_parser = parse_root, global = true)]
    natives: Vec<(String, PathBuf)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy entries between drives
    Copy(TransferArgs),
    /// Move entries between directories of one drive
    Move(TransferArgs),
    /// Copy entries from a native filesystem into a drive
    Import(TransferArgs),
    /// Copy entries from a drive out to a native filesystem
    Export(TransferArgs),
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
        /// Write a default configuration file
        #[arg(long, value_name = "PATH")]
        init: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
struct TransferArgs {
    /// Source directory, ID:PATH
    source: String,
    /// Destination directory, ID:PATH
    destination: String,
    /// Entry of the source to process; every entry when omitted
    #[arg(short = 'e', long = "entry", value_name = "NAME")]
    entries: Vec<String>,
    /// Policy for files clashing with a file or a directory
    #[arg(long, value_name = "SAME,DIFF", value_parser = parse_policy)]
    file_policy: Option<PolicyPair>,
    /// Policy for directories clashing with a directory or a file
    #[arg(long, value_name = "SAME,DIFF", value_parser = parse_policy)]
    dir_policy: Option<PolicyPair>,
    /// Prompt for conflicts instead of stopping
    #[arg(short, long)]
    interactive: bool,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
    /// Ceiling on outstanding storage operations
    #[arg(long, value_name = "N")]
    max_in_flight: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load_default(),
    }
    .context("Failed to load configuration")?;
    config.backend.drives.extend(cli.drives.iter().cloned());
    config.backend.natives.extend(cli.natives.iter().cloned());

    init_logging(&cli, &config.logging)?;
    info!("xcopy v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Copy(args) => transfer_command(TaskType::Copy, args, config, cli.quiet).await,
        Commands::Move(args) => transfer_command(TaskType::Move, args, config, cli.quiet).await,
        Commands::Import(args) => transfer_command(TaskType::Import, args, config, cli.quiet).await,
        Commands::Export(args) => transfer_command(TaskType::Export, args, config, cli.quiet).await,
        Commands::Config { default, init } => config_command(&config, cli.config, default, init),
    }
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(logging.colored_output)
        .with_writer(std::io::stderr);
    if logging.json_format {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    }
    .map_err(|e| anyhow!(e))
}

async fn transfer_command(
    task_type: TaskType,
    args: TransferArgs,
    mut config: Config,
    quiet: bool,
) -> Result<ExitCode> {
    if let Some(limit) = args.max_in_flight {
        config.scheduler.max_in_flight = InFlightLimit::new(limit).map_err(|e| anyhow!(e))?;
    }
    let src = parse_location(&args.source, &config.backend)?;
    let dst = parse_location(&args.destination, &config.backend)?;
    let backend = Arc::new(LocalBackend::from_config(&config.backend));
    let user = uuid::Uuid::nil();

    let entries: Vec<String> = if args.entries.is_empty() {
        backend
            .readdir(user, &src)
            .await
            .with_context(|| format!("Failed to list {}", args.source))?
            .into_iter()
            .map(|stat| stat.name)
            .collect()
    } else {
        args.entries.clone()
    };
    if entries.is_empty() {
        if !quiet {
            display_success(&format!("{} is empty, nothing to {}", args.source, task_type));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut request = TaskRequest::new(task_type, user, src, dst).with_entries(entries);
    if let Some(policy) = args.file_policy {
        request = request.with_file_policy(policy);
    }
    if let Some(policy) = args.dir_policy {
        request = request.with_dir_policy(policy);
    }

    let engine = EngineBuilder::new()
        .with_config(config)
        .with_backend(backend)
        .build()?;

    if !quiet && !args.json {
        println!(
            "{} {} {} to {}",
            style("→").green().bold(),
            task_type,
            style(&args.source).cyan(),
            style(&args.destination).cyan()
        );
    }

    let started = chrono::Utc::now();
    let clock = Instant::now();
    let outcome = drive_task(&engine, request, &args, quiet).await?;
    let elapsed = clock.elapsed();

    let mut report = outcome.report;
    report.view = report.view.or(outcome.suspended_view);
    let exit_code = if outcome.stopped_on_conflicts {
        EXIT_CONFLICTS
    } else if report.status != TaskStatus::Finished || !report.stats.is_success() {
        EXIT_FAILURES
    } else {
        0
    };

    if exit_code == 0 {
        info!("task {} finished: {}", report.id, report.stats.summary());
    } else {
        error!("task {} ended {}: {}", report.id, report.status, report.stats.summary());
    }

    if args.json {
        let output = TaskResultJson::new(
            task_type,
            args.source.clone(),
            args.destination.clone(),
            started,
            elapsed,
            &report,
            outcome.problems,
            exit_code,
        );
        println!("{}", output.to_json()?);
    } else if !quiet {
        display_report(&report, elapsed);
        for problem in &outcome.problems {
            display_warning(&format!("{}: {} {}", problem.name, problem.code, problem.message));
        }
    }

    Ok(ExitCode::from(exit_code))
}

/// What happened while a task ran
struct RunOutcome {
    report: xcopy_engine::TaskReport,
    problems: Vec<ProblemJson>,
    suspended_view: Option<NodeView>,
    stopped_on_conflicts: bool,
}

async fn drive_task(
    engine: &XcopyEngine,
    request: TaskRequest,
    args: &TransferArgs,
    quiet: bool,
) -> Result<RunOutcome> {
    let (id, mut events) = engine.create_task_with_events(request).await?;
    let mut progress = TaskProgress::new(quiet || args.json);
    let mut problems = Vec::new();
    let mut suspended_view = None;
    let mut stopped_on_conflicts = false;

    let done = engine.wait(id);
    tokio::pin!(done);

    let report = loop {
        tokio::select! {
            report = &mut done => break report?,
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("progress skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break (&mut done).await?,
                };
                progress.observe(&event);
                match event {
                    TaskEvent::EntryDropped { name, kind, error, .. } => problems.push(ProblemJson {
                        name,
                        kind,
                        code: error.code().to_string(),
                        message: error.to_string(),
                    }),
                    TaskEvent::Idle { conflicts, .. } if args.interactive => {
                        debug!("prompting for {} conflicts", conflicts);
                        if !resolve_interactively(engine, id, &progress).await? {
                            engine.abort(id).await?;
                            stopped_on_conflicts = true;
                        }
                    }
                    TaskEvent::Idle { conflicts, .. } => {
                        progress.suspend(|| {
                            display_warning(&format!(
                                "{} conflicts need a policy; rerun with --interactive or --file-policy/--dir-policy",
                                conflicts
                            ));
                        });
                        suspended_view = engine.view(id).await?;
                        engine.abort(id).await?;
                        stopped_on_conflicts = true;
                    }
                    _ => {}
                }
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        progress.observe(&event);
    }
    progress.finish_and_clear();
    let (dirs, files, failed) = progress.counts();
    debug!("{} dirs, {} files, {} failed", dirs, files, failed);

    Ok(RunOutcome {
        report,
        problems,
        suspended_view,
        stopped_on_conflicts,
    })
}

/// Prompt for every pending conflict; `false` when the user gave up
async fn resolve_interactively(
    engine: &XcopyEngine,
    id: TaskId,
    progress: &TaskProgress,
) -> Result<bool> {
    for conflict in engine.conflicts(id).await? {
        let options = choices(&conflict);
        let labels: Vec<String> = options.iter().map(Choice::label).collect();
        let prompt = format!(
            "{} '{}' clashes ({})",
            conflict.kind, conflict.path, conflict.error.message
        );

        let picked = progress.suspend(|| {
            Select::new()
                .with_prompt(prompt)
                .items(&labels)
                .default(0)
                .interact()
        })?;
        let Choice::Apply(policy) = options[picked] else {
            return Ok(false);
        };
        let apply_to_all = progress.suspend(|| {
            Confirm::new()
                .with_prompt(format!("Use '{}' for every such {} clash?", policy, conflict.kind))
                .default(false)
                .interact()
        })?;

        match engine
            .update_policy(id, conflict.node, policy_for(&conflict, policy), apply_to_all)
            .await
        {
            Ok(()) => {}
            // retried already by an earlier "apply to all"
            Err(e) if e.code() == "EINVAL" => debug!("conflict {} moved on: {}", conflict.node, e),
            Err(e) => return Err(e.into()),
        }
        if apply_to_all {
            break;
        }
    }
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Apply(Policy),
    Abort,
}

impl Choice {
    fn label(&self) -> String {
        match self {
            Self::Apply(Policy::Keep) => "keep - merge into the existing directory".to_string(),
            Self::Apply(Policy::Skip) => "skip - leave the existing entry".to_string(),
            Self::Apply(Policy::Rename) => "rename - pick a free name".to_string(),
            Self::Apply(Policy::Replace) => "replace - remove the existing entry first".to_string(),
            Self::Abort => "abort the task".to_string(),
        }
    }
}

/// Policies that make sense for a clash
fn choices(conflict: &ConflictInfo) -> Vec<Choice> {
    let mut options = Vec::new();
    if conflict.kind == EntityKind::Directory && same_kind(conflict) {
        options.push(Choice::Apply(Policy::Keep));
    }
    options.extend(
        [Policy::Skip, Policy::Rename, Policy::Replace]
            .into_iter()
            .map(Choice::Apply),
    );
    options.push(Choice::Abort);
    options
}

/// A clash with an entry of the same kind carries no refinement code
fn same_kind(conflict: &ConflictInfo) -> bool {
    conflict.error.xcode.is_none()
}

/// Policy pair setting only the side the clash needs
fn policy_for(conflict: &ConflictInfo, policy: Policy) -> PolicyPair {
    if same_kind(conflict) {
        PolicyPair::new(Some(policy), None)
    } else {
        PolicyPair::new(None, Some(policy))
    }
}

fn config_command(
    config: &Config,
    source: Option<PathBuf>,
    default: bool,
    init: Option<PathBuf>,
) -> Result<ExitCode> {
    if let Some(path) = init {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        ConfigLoader::generate_default_config(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        display_success(&format!("Wrote default configuration to {}", path.display()));
        return Ok(ExitCode::SUCCESS);
    }

    if default {
        println!("{} Default configuration:", style("⚙").blue().bold());
        print!("{}", serde_yaml::to_string(&Config::default())?);
    } else {
        println!("{} Current configuration:", style("⚙").blue().bold());
        match source.or_else(ConfigLoader::config_exists) {
            Some(path) => println!("# loaded from {}", path.display()),
            None => println!("# no configuration file found, showing defaults"),
        }
        print!("{}", serde_yaml::to_string(config)?);
    }
    Ok(ExitCode::SUCCESS)
}

/// Parse `ID:PATH` against the configured roots
fn parse_location(arg: &str, roots: &BackendConfig) -> Result<Location> {
    let (id, path) = arg
        .split_once(':')
        .ok_or_else(|| anyhow!("'{}' is not of the form ID:PATH", arg))?;
    let path = path.trim_matches('/');

    if roots.drives.contains_key(id) {
        Ok(Location::drive(id, path))
    } else if roots.natives.contains_key(id) {
        Ok(Location::native(id, path))
    } else {
        let known: Vec<&str> = roots
            .drives
            .keys()
            .chain(roots.natives.keys())
            .map(String::as_str)
            .collect();
        bail!("unknown root '{}' (configured: {})", id, known.join(", "))
    }
}

fn parse_root(s: &str) -> std::result::Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => {
            Ok((id.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("'{}' is not of the form ID=PATH", s)),
    }
}

fn parse_policy(s: &str) -> std::result::Result<PolicyPair, String> {
    s.parse().map_err(|e: xcopy_types::Error| e.to_string())
}
