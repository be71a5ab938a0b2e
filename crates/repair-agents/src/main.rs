use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use repair_agents::cases::{builtin_cases, load_cases, select, to_cases, BugCase};
use repair_agents::compare::{render_tallies, run_compare};
use repair_agents::iterative::DEFAULT_MAX_ATTEMPTS;
use repair_agents::report::{case_line, render, Analytics};
use repair_agents::sweep::{aggregate, best, run_sweep, save_csv, save_rows, SweepGrid};
use repair_agents::{active_model, build_rewriter, build_toolkit, AppConfig};
use repair_coordination::{AgentSystem, Case, LinearOrchestrator};
use tracing::info;

#[derive(Parser)]
#[command(name = "repair-agents")]
#[command(version, about = "Bug-repair pipeline: linear vs agent-bus orchestration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug-level logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML config file, applied before environment and flags
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cases through one or both orchestrators
    Run(RunArgs),
    /// Grid over candidates x reviewers x retries for both orchestrators
    Sweep(SweepArgs),
    /// Sync, async, single-shot baseline and iterative rewrite on the same cases
    Compare(CompareArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ApproachArg {
    Sync,
    Async,
    Both,
}

#[derive(Args)]
struct CaseArgs {
    /// Case ids to run, e.g. `--cases 1 3 5` (default: all)
    #[arg(long, num_args = 1..)]
    cases: Vec<u32>,

    /// JSON array of `{id, description, code}` replacing the built-in catalogue
    #[arg(long)]
    cases_file: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Execute patched code under the Python sandbox oracle (default when
    /// the interpreter is available)
    #[arg(long, conflicts_with = "no_sandbox")]
    sandbox: bool,

    /// Use pattern checks only, never execute patched code
    #[arg(long)]
    no_sandbox: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    cases: CaseArgs,

    #[arg(long, value_enum, default_value = "both")]
    approach: ApproachArg,

    /// Process async cases concurrently (bounded by max_concurrent_cases)
    #[arg(long)]
    parallel: bool,

    /// Write summary and per-case outcomes as JSON
    #[arg(long)]
    save_results: Option<PathBuf>,

    /// Use the OpenAI-compatible remote model (needs OPENAI_API_KEY)
    #[arg(long)]
    use_llm: bool,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    n_candidates: Option<usize>,

    #[arg(long)]
    n_reviewers: Option<usize>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Per-step timeout in seconds
    #[arg(long)]
    step_timeout: Option<f64>,
}

#[derive(Args)]
struct SweepArgs {
    #[command(flatten)]
    cases: CaseArgs,

    /// Seeds to repeat every grid point with (default: the configured seed)
    #[arg(long, num_args = 1..)]
    seeds: Vec<u64>,

    #[arg(long, default_value = "sweep_results.json")]
    output: PathBuf,

    /// Also write per-run rows as CSV; aggregates go next to it as `<stem>_aggregate.csv`
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Args)]
struct CompareArgs {
    #[command(flatten)]
    cases: CaseArgs,

    /// Rewrite attempts per case for the iterative approach
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Use the OpenAI-compatible remote model (needs OPENAI_API_KEY)
    #[arg(long)]
    use_llm: bool,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run(args) => run(&mut config, args).await,
        Commands::Sweep(args) => sweep(&mut config, args).await,
        Commands::Compare(args) => compare(&mut config, args).await,
    }
}

fn apply_case_args(config: &mut AppConfig, args: &CaseArgs) {
    if let Some(seed) = args.seed {
        config.run.seed = seed;
    }
    if args.sandbox {
        config.use_sandbox = Some(true);
    } else if args.no_sandbox {
        config.use_sandbox = Some(false);
    }
}

fn load_catalogue(args: &CaseArgs) -> Result<Vec<Case>> {
    let catalogue: Vec<BugCase> = match &args.cases_file {
        Some(path) => load_cases(path)?,
        None => builtin_cases(),
    };
    let picked = select(catalogue, &args.cases).context("Failed to select cases")?;
    Ok(to_cases(&picked))
}

async fn run(config: &mut AppConfig, args: RunArgs) -> Result<()> {
    apply_case_args(config, &args.cases);
    if let Some(n) = args.n_candidates {
        config.run.max_candidates = Some(n);
    }
    if let Some(n) = args.n_reviewers {
        config.run.n_reviewers = n;
    }
    if let Some(n) = args.max_retries {
        config.run.max_retries = n;
    }
    if let Some(secs) = args.step_timeout {
        config.run.step_timeout_secs = secs;
    }
    if let Some(model) = args.model {
        config.llm.model = model;
    }
    config.use_llm |= args.use_llm;
    config.validate().context("Invalid configuration")?;

    let cases = load_catalogue(&args.cases)?;
    let toolkit = build_toolkit(config);
    let mut analytics = Analytics::new(active_model(config).map(String::from));
    info!(
        cases = cases.len(),
        seed = config.run.seed,
        model = active_model(config).unwrap_or("heuristic"),
        "Starting run"
    );

    if matches!(args.approach, ApproachArg::Sync | ApproachArg::Both) {
        println!("\n--- SYNC (seed={}) ---", config.run.seed);
        let orchestrator = LinearOrchestrator::new(toolkit.clone(), &config.run)?;
        for case in &cases {
            let outcome = orchestrator.run_case(case).await;
            println!("{}", case_line(&outcome));
            analytics.extend([outcome]);
        }
    }

    if matches!(args.approach, ApproachArg::Async | ApproachArg::Both) {
        let mode = if args.parallel { "parallel" } else { "sequential" };
        println!("\n--- ASYNC, {mode} (seed={}) ---", config.run.seed);
        let system = AgentSystem::start(toolkit, &config.run)?;
        let outcomes = if args.parallel {
            system.run_cases(&cases).await
        } else {
            system.run_sequential(&cases).await
        };
        system.shutdown().await;
        for outcome in &outcomes {
            println!("{}", case_line(outcome));
        }
        analytics.extend(outcomes);
    }

    println!("\n{}", render(&analytics.summary()));

    if let Some(path) = &args.save_results {
        analytics.save(path)?;
        println!("Results saved to {}", path.display());
    }
    Ok(())
}

async fn sweep(config: &mut AppConfig, args: SweepArgs) -> Result<()> {
    apply_case_args(config, &args.cases);
    config.validate().context("Invalid configuration")?;

    let cases = load_catalogue(&args.cases)?;
    let toolkit = build_toolkit(config);
    let grid = SweepGrid {
        seeds: args.seeds,
        ..SweepGrid::default()
    };
    let rows = run_sweep(&toolkit, &config.run, &cases, &grid).await?;

    for row in &rows {
        println!(
            "{} seed={} | cand={} rev={} ret={} -> success={} failed={} timeout={} avg_time={:?}",
            row.approach,
            row.seed,
            row.n_candidates,
            row.n_reviewers,
            row.max_retries,
            row.success_cases,
            row.failed_cases,
            row.timeout_cases,
            row.avg_time
        );
    }

    let aggregates = aggregate(&rows);
    if let Some(top) = best(&aggregates) {
        println!(
            "\nBest: {} cand={} rev={} ret={} (success {:.1}% +/- {:.1}, {}s over {} seeds)",
            top.approach,
            top.n_candidates,
            top.n_reviewers,
            top.max_retries,
            top.mean_success_rate * 100.0,
            top.stdev_success_rate * 100.0,
            top.mean_time,
            top.runs
        );
    }

    save_rows(&rows, &args.output)?;
    println!("\nSweep written to {}", args.output.display());
    if let Some(path) = &args.csv {
        save_csv(&rows, path)?;
        let aggregate_path = path.with_file_name(format!(
            "{}_aggregate.csv",
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("sweep")
        ));
        save_csv(&aggregates, &aggregate_path)?;
        println!(
            "CSV written to {} and {}",
            path.display(),
            aggregate_path.display()
        );
    }
    Ok(())
}

async fn compare(config: &mut AppConfig, args: CompareArgs) -> Result<()> {
    apply_case_args(config, &args.cases);
    config.use_llm |= args.use_llm;
    config.validate().context("Invalid configuration")?;

    let cases = load_catalogue(&args.cases)?;
    let toolkit = build_toolkit(config);
    let rewriter = build_rewriter(config);
    info!(
        cases = cases.len(),
        seed = config.run.seed,
        max_attempts = args.max_attempts,
        "Starting comparison"
    );

    let report = run_compare(&toolkit, rewriter, &config.run, &cases, args.max_attempts).await?;
    println!("\n{}", render_tallies(&report.tallies()));

    if let Some(path) = &args.output {
        report.save(path)?;
        println!("Comparison saved to {}", path.display());
    }
    Ok(())
}
