use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use integrator_lib::commands::{self, CommandContext};
use integrator_lib::config::PartialConfig;
use integrator_lib::shutdown::{register_signal_handlers, ShutdownState};

/// Integrator - merge queue for coding-agent worktrees
#[derive(Parser, Debug)]
#[command(name = "integrator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project root (the main git checkout)
    #[arg(long, global = true, env = "INTEGRATOR_PROJECT", default_value = ".")]
    project: PathBuf,

    /// Integration branch, overriding the configured one
    #[arg(long, global = true)]
    target: Option<String>,

    /// Work without a remote: no pull, push or remote verification
    #[arg(long, global = true)]
    no_remote: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge queue and daemon
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Operation lifecycle
    #[command(subcommand)]
    Op(OpCommand),

    /// Show lock files and their holders
    Locks {
        /// Remove locks whose holder is gone
        #[arg(long)]
        clean: bool,
    },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// Run the daemon in the foreground
    Start {
        /// Seconds between cycles
        #[arg(long)]
        interval: Option<u64>,
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Stop a running daemon
    Stop,
    /// Daemon state and entry counts
    Status,
    /// Queue an operation for merging
    Enqueue {
        operation: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,
        /// Issue that must be closed before merging
        #[arg(long)]
        issue: Option<String>,
    },
    /// Queue a bare branch for merging
    EnqueueBranch {
        branch: String,
        #[arg(long)]
        worktree: Option<PathBuf>,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,
    },
    /// List entries in scheduling order
    List,
    /// Put an entry back to pending
    Retry { name: String },
    /// Show one entry
    Show { name: String },
    /// Remove an entry
    Remove { name: String },
    /// Merge one ready entry now
    Merge { name: String },
}

#[derive(Subcommand, Debug)]
enum OpCommand {
    /// Start tracking an operation
    Create(CreateArgs),
    /// Move an operation to another phase
    Transition { name: String, phase: String },
    /// Pause automatic progression
    Hold { name: String },
    /// Clear a hold
    Resume { name: String },
    /// Show an operation document
    Show {
        name: String,
        /// Print a single field
        #[arg(long)]
        field: Option<String>,
    },
    /// List operations
    List,
    /// Show an operation's event log
    Events { name: String },
    /// Delete an operation document
    Prune {
        name: String,
        /// Also delete operations that are not finished
        #[arg(long)]
        force: bool,
    },
    /// Unblock dependents of a merged operation
    Release { name: String },
}

#[derive(Args, Debug)]
struct CreateArgs {
    name: String,
    #[arg(long)]
    branch: String,
    #[arg(long)]
    worktree: PathBuf,
    #[arg(long)]
    epic: Option<String>,
    #[arg(long = "blocked-by")]
    blocked_by: Vec<String>,
    #[arg(long = "label")]
    labels: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        if let Some(hint) = e.remediation() {
            eprintln!("Hint: {}", hint);
        }
        std::process::exit(1);
    }
}

fn overrides(cli: &Cli) -> Option<PartialConfig> {
    let mut partial = PartialConfig {
        target_branch: cli.target.clone(),
        ..Default::default()
    };
    if cli.no_remote {
        partial.remote = Some(None);
    }
    if let Command::Queue(QueueCommand::Start {
        interval: Some(secs),
        ..
    }) = &cli.command
    {
        partial.poll_interval_secs = Some(*secs);
    }
    if partial == PartialConfig::default() {
        None
    } else {
        Some(partial)
    }
}

fn run(cli: Cli) -> integrator_lib::Result<()> {
    let ctx = CommandContext::load(&cli.project, overrides(&cli))?;

    let output = match cli.command {
        Command::Queue(command) => run_queue(&ctx, command)?,
        Command::Op(command) => run_op(&ctx, command)?,
        Command::Locks { clean } => commands::locks::locks(&ctx, clean)?,
    };
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

fn run_queue(ctx: &CommandContext, command: QueueCommand) -> integrator_lib::Result<String> {
    use commands::queue;

    match command {
        QueueCommand::Start { once, .. } => {
            let shutdown = ShutdownState::new();
            if let Err(e) = register_signal_handlers(shutdown.clone()) {
                log::warn!("Failed to register signal handlers: {}", e);
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(queue::start(ctx, shutdown, once))
        }
        QueueCommand::Stop => queue::stop(ctx),
        QueueCommand::Status => queue::status(ctx),
        QueueCommand::Enqueue {
            operation,
            priority,
            issue,
        } => queue::enqueue(ctx, &operation, priority, issue),
        QueueCommand::EnqueueBranch {
            branch,
            worktree,
            priority,
        } => queue::enqueue_branch(ctx, &branch, worktree, priority),
        QueueCommand::List => queue::list(ctx),
        QueueCommand::Retry { name } => queue::retry(ctx, &name),
        QueueCommand::Show { name } => queue::show(ctx, &name),
        QueueCommand::Remove { name } => queue::remove(ctx, &name),
        QueueCommand::Merge { name } => queue::merge(ctx, &name),
    }
}

fn run_op(ctx: &CommandContext, command: OpCommand) -> integrator_lib::Result<String> {
    use commands::operations as op;

    match command {
        OpCommand::Create(args) => op::create(
            ctx,
            &args.name,
            &args.branch,
            args.worktree,
            args.epic,
            args.blocked_by,
            args.labels,
        ),
        OpCommand::Transition { name, phase } => op::transition(ctx, &name, &phase),
        OpCommand::Hold { name } => op::hold(ctx, &name),
        OpCommand::Resume { name } => op::resume(ctx, &name),
        OpCommand::Show { name, field } => op::show(ctx, &name, field.as_deref()),
        OpCommand::List => op::list(ctx),
        OpCommand::Events { name } => op::events(ctx, &name),
        OpCommand::Prune { name, force } => op::prune(ctx, &name, force),
        OpCommand::Release { name } => op::release(ctx, &name),
    }
}
