use mutarun::config::{CONFIG_FILE_NAME, Config};
use mutarun::coordinator;
use mutarun::output;
use mutarun::state::{self, RunReport};

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mutarun", version, about = "Coverage-scoped mutation testing for JavaScript and TypeScript")]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Project root (default: current directory)
    #[arg(short = 'C', long = "dir")]
    dir: Option<PathBuf>,
    /// Config file (default: mutarun.toml in the project root)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Source file glob; repeatable. Without globs the project is walked.
    #[arg(short, long = "source")]
    source: Vec<String>,
    /// Test file glob; repeatable
    #[arg(short, long = "test")]
    test: Vec<String>,
    #[arg(short, long)]
    workers: Option<usize>,
    /// Per-mutation timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Scale the slowest baseline test by this much (0 disables)
    #[arg(long)]
    timeout_multiplier: Option<f64>,
    /// Whole-run deadline in milliseconds (0 disables)
    #[arg(long)]
    global_timeout: Option<u64>,
    /// Generate every same-category substitution
    #[arg(long)]
    exhaustive: bool,
    /// Skip type checking of mutated code
    #[arg(long)]
    no_check: bool,
    /// Output JSON instead of human-readable text
    #[arg(long)]
    json: bool,
    /// Group results by source file
    #[arg(long)]
    by_file: bool,
    /// Also write the JSON report here
    #[arg(long)]
    report: Option<PathBuf>,
    /// Exit code only, no output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run mutation testing on a project
    Run(RunArgs),
    /// Show details for a mutant by ref
    Show {
        /// Mutant ref (e.g. @m1 or m1)
        #[arg(name = "ref")]
        mutant_ref: String,
        #[arg(short = 'C', long = "dir")]
        dir: Option<PathBuf>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Summary of last run
    Status {
        #[arg(short = 'C', long = "dir")]
        dir: Option<PathBuf>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(debug: bool, quiet: bool) {
    let default = if debug {
        "mutarun=debug"
    } else if quiet {
        "mutarun=warn"
    } else {
        "mutarun=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let quiet = matches!(&cli.command, Commands::Run(args) if args.quiet);
    init_logging(cli.debug, quiet);

    let outcome = match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Show { mutant_ref, dir, json } => cmd_show(&mutant_ref, dir, json),
        Commands::Status { dir, json } => cmd_status(dir, json),
    };

    let exit_code = match outcome {
        Ok(code) => code,
        Err(err) => {
            if !quiet {
                output::print_error(&format!("{err:#}"));
            }
            exit_code_for(&err)
        }
    };
    process::exit(exit_code);
}

/// 2 for anything the user can fix in their invocation or config, 3 for
/// failures during the run itself.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<mutarun::Error>() {
        Some(
            mutarun::Error::Config(_)
            | mutarun::Error::ConfigFile { .. }
            | mutarun::Error::NoSourceFiles(_)
            | mutarun::Error::Glob { .. },
        ) => 2,
        _ => 3,
    }
}

fn project_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("failed to determine current directory"),
    }
}

fn load_config(args: &RunArgs, dir: &Path) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
            if config.working_directory.is_relative() {
                config.working_directory = dir.join(&config.working_directory);
            }
            config
        }
        None => Config::discover(dir).with_context(|| format!("loading {CONFIG_FILE_NAME}"))?,
    };

    if !args.source.is_empty() {
        config.source = args.source.clone();
    }
    if !args.test.is_empty() {
        config.test = args.test.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(multiplier) = args.timeout_multiplier {
        config.timeout_multiplier = multiplier;
    }
    if let Some(global) = args.global_timeout {
        config.global_timeout_ms = global;
    }
    config.exhaustive |= args.exhaustive;
    config.no_check |= args.no_check;

    config.validate()?;
    Ok(config)
}

async fn cmd_run(args: RunArgs) -> Result<i32> {
    let dir = project_dir(args.dir.clone())?;
    let config = load_config(&args, &dir)?;

    let result = coordinator::run(&config).await?;
    let report = RunReport::from_result(&result);

    if let Err(e) = state::save_last_run(&report, &dir) {
        tracing::warn!("could not save run state: {e}");
    }
    if let Some(path) = &args.report {
        state::save_to_path(&report, path).with_context(|| format!("writing report to {}", path.display()))?;
    }

    if args.quiet {
        return Ok(report.exit_code());
    }

    if args.json {
        if args.by_file {
            println!("{}", serde_json::to_string_pretty(&report.by_file())?);
        } else {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    } else {
        output::print_run_report(&report);
        if args.by_file {
            println!();
            output::print_file_reports(&report.by_file());
        }
    }

    Ok(report.exit_code())
}

fn load_last_run(dir: Option<PathBuf>) -> Result<Option<RunReport>> {
    let dir = project_dir(dir)?;
    Ok(state::load_last_run(&dir))
}

fn cmd_show(mutant_ref: &str, dir: Option<PathBuf>, json_mode: bool) -> Result<i32> {
    let Some(last_run) = load_last_run(dir)? else {
        output::print_error("No previous run found. Run `mutarun run` first.");
        return Ok(2);
    };

    match last_run.find(mutant_ref) {
        Some(m) => {
            if json_mode {
                println!("{}", serde_json::to_string_pretty(m)?);
            } else {
                output::print_mutation_detail(m);
            }
            Ok(0)
        }
        None => {
            let valid: Vec<_> = last_run.survivors().map(|m| format!("@{}", m.ref_id)).collect();
            let hint = if valid.is_empty() {
                "No mutants survived the last run.".to_string()
            } else {
                format!("Survivors: {}", valid.join(", "))
            };
            output::print_error(&format!(
                "Mutant @{} not found. {hint}",
                mutant_ref.trim_start_matches('@')
            ));
            Ok(2)
        }
    }
}

fn cmd_status(dir: Option<PathBuf>, json_mode: bool) -> Result<i32> {
    match load_last_run(dir)? {
        Some(report) => {
            if json_mode {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_status(&report);
            }
            Ok(0)
        }
        None => {
            output::print_error("No previous run found. Run `mutarun run` first.");
            Ok(2)
        }
    }
}
