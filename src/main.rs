// SPDX-License-Identifier: MIT

use clap::{Args, Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use hypogen_rs::hypogen::benchmark::run_benchmark;
use hypogen_rs::hypogen::builder::{
    default_pipeline, load_pipeline, validate_pipeline, PipelineBuilder,
};
use hypogen_rs::hypogen::config::{RunConfig, Settings};
use hypogen_rs::hypogen::executor::TraceEvent;
use hypogen_rs::hypogen::graph::PipelineDef;
use hypogen_rs::hypogen::hypothesis::write_artifacts;
use hypogen_rs::hypogen::tools::default_registry;
use hypogen_rs::hypogen::{HypogenError, HypothesisDriver, Subgraph};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// LLM calls allowed in flight when neither the pipeline nor `--threads` says
const DEFAULT_THREADS: usize = 5;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Generate mechanistic hypotheses from knowledge-graph subgraphs",
    long_about = None
)]
struct Cli {
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogLevel {
    Info,
    Debug,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate hypotheses for one subgraph
    Generate {
        /// Subgraph JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory; a timestamped run directory is created inside
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Number of independent runs
        #[arg(long, default_value_t = 1)]
        max_hypotheses: usize,

        /// Print trace events to stdout as JSON lines while the run progresses
        #[arg(long)]
        stream: bool,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Run the pipeline over every subgraph in a directory
    Benchmark {
        /// Directory of subgraph JSON files
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "benchmark")]
        output: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Check a pipeline (and optionally a subgraph) without calling any model
    Validate {
        /// Subgraph JSON file
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Pipeline YAML; the built-in hypothesis pipeline when omitted
    #[arg(short, long)]
    pipeline: Option<PathBuf>,

    /// Refinement-loop cap (default 3)
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Maximum concurrent LLM calls (default 5)
    #[arg(long)]
    threads: Option<usize>,

    /// Global agent invocation budget (default 100)
    #[arg(long)]
    max_steps: Option<u32>,
}

impl RunArgs {
    fn pipeline(&self) -> Result<PipelineDef, HypogenError> {
        match &self.pipeline {
            Some(path) => load_pipeline(path),
            None => default_pipeline(),
        }
    }

    /// Defaults < pipeline `settings:` < flags
    fn config(&self, def: &PipelineDef) -> RunConfig {
        let mut pipeline = def.settings.clone();
        pipeline.max_concurrent_llm.get_or_insert(DEFAULT_THREADS);
        let cli = Settings {
            max_iterations: self.max_iterations,
            max_steps: self.max_steps,
            max_concurrent_llm: self.threads,
            ..Default::default()
        };
        RunConfig::resolve(&pipeline, &cli)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.as_filter()),
    )
    .init();

    match run(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<HypogenError>()
                .map(|he| he.kind().exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<u8> {
    match command {
        Commands::Generate {
            input,
            output,
            max_hypotheses,
            stream,
            run,
        } => generate(&input, &output, max_hypotheses, stream, &run).await,
        Commands::Benchmark { input, output, run } => benchmark(&input, &output, &run).await,
        Commands::Validate { input, run } => validate(input.as_deref(), &run),
    }
}

fn build_driver(run: &RunArgs) -> anyhow::Result<(PipelineDef, HypothesisDriver)> {
    let def = run.pipeline()?;
    let config = run.config(&def);
    log::info!(
        "Pipeline '{}': max_iterations={}, max_steps={}, threads={}",
        def.name,
        config.max_iterations,
        config.max_steps,
        config.adapter.max_concurrent
    );

    let registry = default_registry()?;
    let graph = PipelineBuilder::new(registry, config.clone()).build(&def)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling run");
            on_signal.cancel();
        }
    });

    let driver = HypothesisDriver::new(Arc::new(graph), config).with_cancellation(cancel);
    Ok((def, driver))
}

fn run_dir(output: &Path) -> PathBuf {
    output.join(chrono::Local::now().format("%Y%m%d_%H%M%S").to_string())
}

async fn generate(
    input: &Path,
    output: &Path,
    max_hypotheses: usize,
    stream: bool,
    run: &RunArgs,
) -> anyhow::Result<u8> {
    let subgraph = Subgraph::load(input)?;
    let (_, mut driver) = build_driver(run)?;

    let printer = if stream {
        let (tx, mut rx) = mpsc::channel::<TraceEvent>(64);
        driver = driver.with_trace_sender(tx);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => log::warn!("Could not print trace event: {}", e),
                }
            }
        }))
    } else {
        None
    };

    let count = max_hypotheses.max(1);
    let outcomes = driver.run_many(&subgraph, count).await;
    drop(driver);
    if let Some(printer) = printer {
        printer.await?;
    }

    let dir = run_dir(output);
    let mut code = 0u8;
    for (i, outcome) in outcomes.iter().enumerate() {
        let target = if count == 1 {
            dir.clone()
        } else {
            dir.join(format!("hypothesis_{}", i + 1))
        };
        let paths = write_artifacts(&target, &outcome.hypothesis, &outcome.trace)?;

        let metadata = &outcome.hypothesis.metadata;
        println!(
            "[{}] {} ({} iterations, {} steps)",
            metadata.status, outcome.hypothesis.title, metadata.iteration, metadata.steps
        );
        println!("  {}", paths.json.display());
        if let Some(error) = &metadata.error {
            println!("  {}", error);
        }
        if code == 0 {
            if let Some(kind) = metadata.error_kind {
                code = kind.exit_code() as u8;
            }
        }
    }
    Ok(code)
}

async fn benchmark(input: &Path, output: &Path, run: &RunArgs) -> anyhow::Result<u8> {
    let (def, driver) = build_driver(run)?;
    let dir = run_dir(output);
    let report = run_benchmark(&driver, &def.name, input, &dir).await?;
    print!("{}", report.to_markdown());
    println!("\nResults written to {}", dir.display());
    Ok(0)
}

fn validate(input: Option<&Path>, run: &RunArgs) -> anyhow::Result<u8> {
    let def = run.pipeline()?;
    let config = run.config(&def);
    let graph = validate_pipeline(&def, default_registry()?, config)?;
    println!(
        "Pipeline '{}' is valid: {} nodes",
        graph.name(),
        graph.node_ids().len()
    );

    if let Some(path) = input {
        let subgraph = Subgraph::load(path)?;
        subgraph.validate()?;
        println!(
            "Subgraph '{}' is valid: {}",
            subgraph.subgraph_id,
            subgraph.path_expression()
        );
    }
    Ok(0)
}
