use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tessera::backend::offline;
use tessera::config::EngineConfig;
use tessera::core::{parse_descriptors, ExecutionPlan, TaskId};
use tessera::engine::{Engine, RunOutcome};
use tessera::Result;

/// Tessera - task-graph execution engine for coordinated reasoning workers
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TESSERA_DEBUG=1           Enable debug logging (alternative to --debug)\n    TESSERA_LOG=<directive>   Full tracing filter directive")]
pub struct Cli {
    /// Enable debug logging (also written to ~/.tessera/tessera.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.tessera/tessera.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Override max_concurrency from the config
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,

    /// Override max_retries from the config
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Build the plan for a decomposition document and print its levels
    Plan {
        /// JSON task list (bare array, wrapper object or fenced block)
        file: PathBuf,
    },

    /// Run a decomposition document against the offline backend
    Simulate {
        /// JSON task list (bare array, wrapper object or fenced block)
        file: PathBuf,

        /// Make validation of this task always fail (repeatable)
        #[arg(long = "fail", value_name = "ID")]
        fail: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    let _guard = tessera::log::init(cli.debug);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Plan { file } => run_plan(file),
        Command::Simulate { file, fail } => run_simulate(file, fail, config),
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    if let Some(n) = cli.max_concurrency {
        config.max_concurrency = n;
    }
    if let Some(n) = cli.max_retries {
        config.max_retries = n;
    }
    config.validate()?;
    debug!(?config, "effective config");
    Ok(config)
}

fn read_plan(file: &Path) -> Result<ExecutionPlan> {
    let text = fs::read_to_string(file)?;
    let descriptors = parse_descriptors(&text)?;
    Ok(ExecutionPlan::build(&descriptors)?)
}

fn run_plan(file: PathBuf) -> Result<()> {
    let plan = read_plan(&file)?;
    println!(
        "{} tasks, {} dependencies",
        plan.len(),
        plan.dependency_count()
    );
    for (depth, level) in plan.levels().iter().enumerate() {
        println!();
        println!("Level {}:", depth);
        for task in level {
            let deps = task
                .dependencies
                .iter()
                .map(|d| d.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if deps.is_empty() {
                println!("  {:<8} [{}] {}", task.id.as_str(), task.agent, task.description);
            } else {
                println!(
                    "  {:<8} [{}] {} (after {})",
                    task.id.as_str(),
                    task.agent,
                    task.description,
                    deps
                );
            }
        }
    }
    Ok(())
}

fn run_simulate(file: PathBuf, fail: Vec<String>, config: EngineConfig) -> Result<()> {
    let plan = read_plan(&file)?;
    let failing = fail.into_iter().map(TaskId::from);
    let engine = Engine::new(config, offline::backends(failing))?;

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let token = CancellationToken::new();
        let ctrl_c = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, canceling run");
                ctrl_c.cancel();
            }
        });
        engine.run(plan, token).await
    })?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !matches!(outcome, RunOutcome::Completed(_)) {
        std::process::exit(2);
    }
    Ok(())
}
