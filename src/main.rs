use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;

use orc::archive::MergePolicy;
use orc::clock::SystemClock;
use orc::cmd;
use orc::cmd::query::StatusFilter;
use orc::config::{OrcConfig, OutputOptions};
use orc::errors::OrcError;
use orc::store::Store;

#[derive(Parser)]
#[command(name = "orc", version, about = "Local orchestrator driving Claude Code through multi-phase gated workflows")]
struct Cli {
    /// Project directory to operate in (defaults to an upward search
    /// from the current directory for a `.orc` sentinel).
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(long, global = true)]
    plain: bool,
    #[arg(short, long, global = true)]
    quiet: bool,
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a `.orc` sentinel in the current (or given) project.
    Init,
    /// Create a new task.
    New {
        title: String,
        #[arg(long)]
        weight: Option<String>,
        #[arg(long, value_delimiter = ',')]
        blocked_by: Vec<String>,
        #[arg(long)]
        initiative: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long = "target-branch")]
        target_branch: Option<String>,
        #[arg(long)]
        priority: Option<String>,
    },
    /// Drive a task forward through its resolved plan.
    Run {
        task_id: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        skip_gates: bool,
        #[arg(long)]
        profile: Option<String>,
    },
    /// Re-entrant alias for `run`, exposed as its own verb (§6).
    Resume {
        task_id: String,
        #[arg(long)]
        skip_gates: bool,
        #[arg(long)]
        profile: Option<String>,
    },
    /// Cooperatively pause a running task.
    Pause { task_id: String },
    /// Forcibly stop a running task.
    Stop { task_id: String },
    /// Mark the task's current phase skipped and advance.
    Skip { task_id: String },
    /// Roll a task's phase history back to (and including) `--to`.
    Rewind {
        task_id: String,
        #[arg(long)]
        to: String,
    },
    /// Wipe a task's phase history back to its starting plan.
    Reset { task_id: String },
    /// Manually un-fail a task.
    Resolve {
        task_id: String,
        #[arg(long)]
        message: String,
    },
    /// Approve a task's currently blocked human gate.
    Approve {
        task_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reject a task's currently blocked human gate.
    Reject {
        task_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Summarize tasks, optionally scoped to one initiative.
    Status {
        #[arg(long)]
        initiative: Option<String>,
        #[arg(long)]
        unassigned: bool,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        watch: bool,
    },
    /// List every task.
    List,
    /// Show one task's full record.
    Show { task_id: String },
    /// Classify every active task as ready or blocked.
    Deps {
        #[arg(long)]
        tree: bool,
        #[arg(long)]
        graph: bool,
    },
    /// Print a task's transcript.
    Log {
        task_id: String,
        #[arg(long)]
        follow: bool,
    },
    /// Export tasks (and optionally initiatives) to an archive.
    Export {
        task_ids: Vec<String>,
        #[arg(long = "all-tasks")]
        all_tasks: bool,
        #[arg(long, default_value = "tar.gz")]
        format: String,
        #[arg(long)]
        initiatives: bool,
        #[arg(long)]
        minimal: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import tasks/initiatives from an archive.
    Import {
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
        #[arg(long = "skip-existing")]
        skip_existing: bool,
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Initiative subcommands.
    Initiative {
        #[command(subcommand)]
        command: InitiativeCommands,
    },
    /// Read or write `.orc/config.yaml`.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum InitiativeCommands {
    New {
        title: String,
        #[arg(long, default_value = "")]
        vision: String,
        #[arg(long, value_delimiter = ',')]
        blocked_by: Vec<String>,
    },
    List,
    Show { initiative_id: String },
    Edit {
        initiative_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        vision: Option<String>,
        #[arg(long, value_delimiter = ',')]
        blocked_by: Option<Vec<String>>,
    },
    Link { initiative_id: String, task_id: String },
    Unlink { initiative_id: String, task_id: String },
    Decide {
        initiative_id: String,
        text: String,
        #[arg(long, default_value = "")]
        rationale: String,
        #[arg(long, default_value = "operator")]
        author: String,
    },
    Activate { initiative_id: String },
    Complete { initiative_id: String },
    Run {
        initiative_id: String,
        #[arg(long)]
        skip_gates: bool,
    },
    Delete { initiative_id: String },
    Plan { initiative_id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    Get { key: Option<String> },
    Set { key: String, value: String },
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("{} {err}", style("error:").red().bold());
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<(), OrcError> {
    let output = OutputOptions {
        verbose: cli.verbose,
        plain: cli.plain,
        quiet: cli.quiet,
        json: cli.json,
    };

    let cwd = std::env::current_dir().map_err(|e| OrcError::Other(e.into()))?;
    let start_dir = cli.project_dir.clone().unwrap_or(cwd);

    if matches!(cli.command, Commands::Init) {
        let created = cmd::task::init(&start_dir)?;
        if created {
            println!("initialized .orc in {}", start_dir.display());
        } else {
            println!(".orc already initialized in {}", start_dir.display());
        }
        return Ok(());
    }

    let project_root = orc::identity::find_project_root(&start_dir)
        .ok_or_else(|| OrcError::InvalidArgs("not an orc project (run `orc init`)".to_string()))?;

    let config = OrcConfig::with_cli_args(project_root, output, None, false).map_err(OrcError::Other)?;
    let _logging_guard = orc::logging::init(&output, Some(&config.sentinel.logs_dir())).map_err(OrcError::Other)?;

    let store = Store::open_with_timeout(&config.sentinel.db_path(), config.store_timeout())?;
    let clock = SystemClock;

    dispatch(cli.command, &store, &config, &clock, output).await
}

async fn dispatch(
    command: Commands,
    store: &Store,
    config: &OrcConfig,
    clock: &SystemClock,
    output: OutputOptions,
) -> Result<(), OrcError> {
    match command {
        Commands::Init => unreachable!("handled before dispatch"),

        Commands::New { title, weight, blocked_by, initiative, branch, target_branch, priority } => {
            let args = cmd::task::NewTaskArgs { weight, blocked_by, initiative_id: initiative, branch, target_branch, priority };
            let id = cmd::task::new(store, clock, &title, args)?;
            println!("created {id}");
            Ok(())
        }

        Commands::Run { task_id, force, skip_gates, profile } => {
            let args = cmd::task::RunArgs { force, skip_gates, profile };
            let outcome = cmd::task::run(store, config, &task_id, args, clock).await?;
            print_run_outcome(&task_id, &outcome);
            exit_for_outcome(&outcome);
            Ok(())
        }

        Commands::Resume { task_id, skip_gates, profile } => {
            let args = cmd::task::RunArgs { force: false, skip_gates, profile };
            let outcome = cmd::task::run(store, config, &task_id, args, clock).await?;
            print_run_outcome(&task_id, &outcome);
            exit_for_outcome(&outcome);
            Ok(())
        }

        Commands::Pause { task_id } => {
            cmd::task::pause(store, &task_id)?;
            println!("sent pause signal to {task_id}");
            Ok(())
        }

        Commands::Stop { task_id } => {
            cmd::task::stop(store, &task_id, clock)?;
            println!("stopped {task_id}");
            Ok(())
        }

        Commands::Skip { task_id } => {
            cmd::task::skip(store, &task_id, clock)?;
            println!("skipped current phase for {task_id}");
            Ok(())
        }

        Commands::Rewind { task_id, to } => {
            cmd::task::rewind(store, config, &task_id, &to, clock)?;
            println!("rewound {task_id} to {to}");
            Ok(())
        }

        Commands::Reset { task_id } => {
            cmd::task::reset(store, config, &task_id, clock)?;
            println!("reset {task_id}");
            Ok(())
        }

        Commands::Resolve { task_id, message } => {
            cmd::task::resolve(store, &task_id, &message, clock)?;
            println!("resolved {task_id}");
            Ok(())
        }

        Commands::Approve { task_id, reason } => {
            cmd::task::approve(store, &task_id, reason.as_deref().unwrap_or("approved"), clock)?;
            println!("approved {task_id}");
            Ok(())
        }

        Commands::Reject { task_id, reason } => {
            cmd::task::reject(store, &task_id, &reason, clock)?;
            println!("rejected {task_id}");
            Ok(())
        }

        Commands::Status { initiative, unassigned, all, watch } => {
            let filter = resolve_status_filter(initiative, unassigned)?;
            if watch {
                cmd::query::watch(
                    store,
                    clock,
                    || filter_clone(&filter),
                    all,
                    std::time::Duration::from_secs(2),
                    &config.project_root,
                    |tasks| print_task_table(tasks, output),
                )
                .await
            } else {
                let tasks = cmd::query::status(store, clock, filter, all, &config.project_root)?;
                print_task_table(&tasks, output);
                Ok(())
            }
        }

        Commands::List => {
            let tasks = cmd::query::list(store, clock, &config.project_root)?;
            print_task_table(&tasks, output);
            Ok(())
        }

        Commands::Show { task_id } => {
            let task = cmd::query::show(store, clock, &task_id, &config.project_root)?;
            print_task_detail(&task);
            Ok(())
        }

        Commands::Deps { tree, graph } => {
            let report = cmd::query::deps_report(store)?;
            print_deps_report(&report, tree, graph);
            Ok(())
        }

        Commands::Log { task_id, follow } => {
            if follow {
                cmd::query::follow_log(store, &task_id, std::time::Duration::from_secs(1), print_transcripts).await
            } else {
                let transcripts = cmd::query::log(store, &task_id)?;
                print_transcripts(&transcripts);
                Ok(())
            }
        }

        Commands::Export { task_ids, all_tasks, format, initiatives, minimal, output: out_path } => {
            let args = cmd::archive::ExportArgs {
                task_ids,
                all_tasks,
                format: cmd::archive::parse_format(&format)?,
                initiatives,
                minimal,
                output: out_path,
            };
            let path = cmd::archive::export(store, config, args)?;
            println!("exported to {}", path.display());
            Ok(())
        }

        Commands::Import { path, force, skip_existing, dry_run } => {
            let policy = match (force, skip_existing) {
                (true, _) => MergePolicy::Force,
                (_, true) => MergePolicy::SkipExisting,
                _ => MergePolicy::Default,
            };
            let summary = cmd::archive::import(store, config, path, policy, dry_run)?;
            println!(
                "{}tasks imported: {}, tasks skipped: {}, tasks deferred: {}, initiatives imported: {}, initiatives deferred: {}",
                if dry_run { "(dry run) " } else { "" },
                summary.tasks_imported,
                summary.tasks_skipped,
                summary.tasks_deferred,
                summary.initiatives_imported,
                summary.initiatives_deferred,
            );
            Ok(())
        }

        Commands::Initiative { command } => dispatch_initiative(command, store, config, clock).await,

        Commands::Config { command } => dispatch_config(command, config.clone()),
    }
}

async fn dispatch_initiative(
    command: InitiativeCommands,
    store: &Store,
    config: &OrcConfig,
    clock: &SystemClock,
) -> Result<(), OrcError> {
    match command {
        InitiativeCommands::New { title, vision, blocked_by } => {
            let id = cmd::initiative::new(store, clock, &title, &vision, blocked_by)?;
            println!("created {id}");
            Ok(())
        }
        InitiativeCommands::List => {
            for initiative in cmd::initiative::list(store, clock, &config.project_root)? {
                println!("{:<10} {:<10} {}", initiative.id, initiative.status.as_str(), initiative.title);
            }
            Ok(())
        }
        InitiativeCommands::Show { initiative_id } => {
            let initiative = cmd::initiative::show(store, clock, &initiative_id, &config.project_root)?;
            println!("{} [{}] {}", initiative.id, initiative.status.as_str(), initiative.title);
            println!("{}", initiative.vision);
            for task in &initiative.tasks {
                println!("  - {} [{}] {}", task.id, task.stored_status.as_str(), task.title);
            }
            for decision in &initiative.decisions {
                println!("  decision ({}): {} — {}", decision.author, decision.text, decision.rationale);
            }
            Ok(())
        }
        InitiativeCommands::Edit { initiative_id, title, vision, blocked_by } => {
            cmd::initiative::edit(store, clock, &initiative_id, cmd::initiative::EditArgs { title, vision, blocked_by })?;
            println!("updated {initiative_id}");
            Ok(())
        }
        InitiativeCommands::Link { initiative_id, task_id } => {
            cmd::initiative::link(store, clock, &initiative_id, &task_id)?;
            println!("linked {task_id} to {initiative_id}");
            Ok(())
        }
        InitiativeCommands::Unlink { initiative_id, task_id } => {
            cmd::initiative::unlink(store, clock, &initiative_id, &task_id)?;
            println!("unlinked {task_id} from {initiative_id}");
            Ok(())
        }
        InitiativeCommands::Decide { initiative_id, text, rationale, author } => {
            cmd::initiative::decide(store, clock, &initiative_id, &text, &rationale, &author)?;
            println!("recorded decision for {initiative_id}");
            Ok(())
        }
        InitiativeCommands::Activate { initiative_id } => {
            cmd::initiative::activate(store, clock, &initiative_id)?;
            println!("activated {initiative_id}");
            Ok(())
        }
        InitiativeCommands::Complete { initiative_id } => {
            cmd::initiative::complete(store, clock, &initiative_id)?;
            println!("completed {initiative_id}");
            Ok(())
        }
        InitiativeCommands::Run { initiative_id, skip_gates } => {
            let results = cmd::initiative::run(store, config, &initiative_id, skip_gates, clock).await?;
            for (task_id, outcome) in &results {
                print_run_outcome(task_id, outcome);
            }
            // `initiative::run` stops at the first task that doesn't
            // complete outright, so that task's outcome (if any) is the
            // one that determines the process exit code.
            if let Some((_, outcome)) = results.last() {
                exit_for_outcome(outcome);
            }
            Ok(())
        }
        InitiativeCommands::Delete { initiative_id } => {
            cmd::initiative::delete(store, &initiative_id)?;
            println!("deleted {initiative_id}");
            Ok(())
        }
        InitiativeCommands::Plan { initiative_id } => {
            let plan = cmd::initiative::plan(store, &initiative_id)?;
            println!("{initiative_id:<12} {:?} (initiative)", plan.initiative_classification);
            for (id, classification) in &plan.classification {
                println!("{id:<12} {:?}", classification);
            }
            Ok(())
        }
    }
}

fn dispatch_config(command: ConfigCommands, mut config: OrcConfig) -> Result<(), OrcError> {
    match command {
        ConfigCommands::Get { key } => {
            println!("{}", cmd::config::get(&config, key.as_deref())?);
            Ok(())
        }
        ConfigCommands::Set { key, value } => {
            cmd::config::set(&mut config, &key, &value)?;
            println!("set {key} = {value}");
            Ok(())
        }
        ConfigCommands::Validate => {
            let problems = cmd::config::validate(&config);
            if problems.is_empty() {
                println!("config is valid");
            } else {
                for problem in &problems {
                    println!("- {problem}");
                }
            }
            Ok(())
        }
    }
}

fn resolve_status_filter(initiative: Option<String>, unassigned: bool) -> Result<Option<StatusFilter>, OrcError> {
    match (initiative, unassigned) {
        (Some(_), true) => Err(OrcError::InvalidArgs("--initiative and --unassigned are mutually exclusive".to_string())),
        (Some(id), false) => Ok(Some(StatusFilter::Initiative(id))),
        (None, true) => Ok(Some(StatusFilter::Unassigned)),
        (None, false) => Ok(None),
    }
}

fn filter_clone(filter: &Option<StatusFilter>) -> Option<StatusFilter> {
    match filter {
        Some(StatusFilter::Initiative(id)) => Some(StatusFilter::Initiative(id.clone())),
        Some(StatusFilter::Unassigned) => Some(StatusFilter::Unassigned),
        None => None,
    }
}

/// Exits the process immediately for outcomes that represent a
/// non-success termination (§6/§7: exit code 4 for a gate block, 5 for
/// a failed phase) — `RunOutcome::Completed`/`Paused` fall through and
/// let `main` return `Ok(())` for exit code 0.
fn exit_for_outcome(outcome: &orc::scheduler::RunOutcome) {
    use orc::scheduler::RunOutcome;
    match outcome {
        RunOutcome::Blocked { .. } => std::process::exit(4),
        RunOutcome::Failed { .. } => std::process::exit(5),
        RunOutcome::Completed | RunOutcome::Paused => {}
    }
}

fn print_run_outcome(task_id: &str, outcome: &orc::scheduler::RunOutcome) {
    use orc::scheduler::RunOutcome;
    match outcome {
        RunOutcome::Completed => println!("{task_id}: {}", style("completed").green()),
        RunOutcome::Blocked { phase } => println!("{task_id}: {} at {phase}", style("blocked").yellow()),
        RunOutcome::Paused => println!("{task_id}: {}", style("paused").yellow()),
        RunOutcome::Failed { reason } => println!("{task_id}: {} ({reason})", style("failed").red()),
    }
}

fn print_task_table(tasks: &[orc::store::models::Task], output: OutputOptions) {
    if output.json {
        if let Ok(json) = serde_json::to_string_pretty(tasks) {
            println!("{json}");
        }
        return;
    }
    for task in tasks {
        let status = cmd::effective_status(task);
        println!(
            "{:<12} {:<12} {:<8} {}",
            task.id,
            status.as_str(),
            task.weight.as_str(),
            task.title
        );
    }
}

fn print_task_detail(task: &orc::store::models::Task) {
    let status = cmd::effective_status(task);
    println!("{} [{}] {}", task.id, status.as_str(), task.title);
    println!("weight: {} priority: {}", task.weight.as_str(), task.priority.as_str());
    println!("branch: {} -> {}", task.branch, task.target_branch);
    if let Some(reason) = task.blocked_reason() {
        println!("blocked: {reason}");
    }
    println!(
        "cost: {} input tokens, {} output tokens",
        task.execution.cost.input_tokens, task.execution.cost.output_tokens
    );
    for phase in &task.execution.phases {
        println!("  phase {:<12} {:?} commit={:?}", phase.phase_id, phase.status, phase.commit_sha);
    }
}

fn print_deps_report(report: &cmd::query::DepsReport, tree: bool, graph: bool) {
    if graph {
        for (from, to) in &report.edges {
            println!("{from} -> {to}");
        }
        return;
    }
    for (id, classification) in &report.classification {
        if tree {
            let deps: Vec<&str> = report.edges.iter().filter(|(_, to)| to == id).map(|(from, _)| from.as_str()).collect();
            if deps.is_empty() {
                println!("{id} [{:?}]", classification);
            } else {
                println!("{id} [{:?}] <- {}", classification, deps.join(", "));
            }
        } else {
            println!("{id:<12} {:?}", classification);
        }
    }
}

fn print_transcripts(transcripts: &[orc::store::models::TranscriptMessage]) {
    for msg in transcripts {
        println!("[{}] {}: {}", msg.phase, msg.role, msg.content);
    }
}
