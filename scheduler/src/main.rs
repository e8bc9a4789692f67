use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use autosched::config::SchedulerOptions;
use autosched::cost::DefaultCostModel;
use autosched::diag::{render, Diagnostic};
use autosched::error::ScheduleError;
use autosched::machine::{MachineParams, Target};
use autosched::pass::PassId;
use autosched::pipeline::{compute_provenance, generate_schedules_with, run_passes, RunContext};
use autosched::stage::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Schedule,
    Graph,
    Bounds,
    Inline,
    Dot,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "autosched",
    version,
    about = "Derives loop schedules for .stg stage pipelines from output estimates and a machine model"
)]
struct Cli {
    /// Input .stg source file
    source: PathBuf,

    /// Machine parameters: <parallelism>,<cache_kb>,<balance>
    #[arg(long, default_value = "16,16384,40")]
    machine: String,

    /// Target: <arch>-<bits>[-<feature>...] or "host"
    #[arg(long, default_value = "host")]
    target: String,

    /// Scheduler options (JSON)
    #[arg(long)]
    options: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Schedule)]
    emit: EmitStage,

    /// Output file path (stdout when absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log passes and timing to stderr
    #[arg(long)]
    verbose: bool,
}

/// Why the run stopped: already-rendered diagnostics (exit 1) or a usage
/// problem (exit 2).
enum Failure {
    Reported,
    Usage(String),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report(diags: &[Diagnostic], path: &str, source: &str) {
    for diag in diags {
        eprintln!("{}", render(diag, path, source));
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(text) => match write_output(cli.output.as_deref(), &text) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("autosched: error: {e}");
                ExitCode::from(2)
            }
        },
        Err(Failure::Reported) => ExitCode::from(1),
        Err(Failure::Usage(message)) => {
            eprintln!("autosched: error: {message}");
            ExitCode::from(2)
        }
    }
}

fn write_output(path: Option<&Path>, text: &str) -> std::io::Result<()> {
    match path {
        Some(path) => std::fs::write(path, text),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

fn run(cli: &Cli) -> Result<String, Failure> {
    let path = cli.source.display().to_string();
    debug!(source = %path, emit = ?cli.emit, "starting");

    // ── Configuration ──
    let params: MachineParams = cli
        .machine
        .parse()
        .map_err(|e: ScheduleError| Failure::Usage(e.to_string()))?;
    let target: Target = cli
        .target
        .parse()
        .map_err(|e: ScheduleError| Failure::Usage(e.to_string()))?;
    let options = match &cli.options {
        Some(p) => SchedulerOptions::load(p).map_err(|e| Failure::Usage(e.to_string()))?,
        None => SchedulerOptions::default(),
    };
    debug!(machine = %params, target = %target, "configuration");

    // ── Load pipeline ──
    let source = std::fs::read_to_string(&cli.source)
        .map_err(|e| Failure::Usage(format!("{path}: {e}")))?;
    let loaded = match autosched::resolve::load_pipeline(&source) {
        Ok(loaded) => loaded,
        Err(diags) => {
            report(&diags, &path, &source);
            return Err(Failure::Reported);
        }
    };
    report(&loaded.warnings, &path, &source);
    let mut pipeline = loaded.pipeline;

    // ── Schedule ──
    let fail = |err: ScheduleError, pipeline: &Pipeline| {
        report(&[err.to_diagnostic(Some(pipeline))], &path, &source);
        Failure::Reported
    };
    let model = DefaultCostModel::new(&params);
    let ctx = RunContext {
        target: &target,
        params: &params,
        options: &options,
        model: &model,
    };

    match cli.emit {
        EmitStage::Schedule => {
            generate_schedules_with(&mut pipeline, &target, &params, &options, &model)
                .map_err(|e| fail(e, &pipeline))
        }
        EmitStage::BuildInfo => {
            let text = generate_schedules_with(&mut pipeline, &target, &params, &options, &model)
                .map_err(|e| fail(e, &pipeline))?;
            compute_provenance(&source, &text, &params, &target, &options)
                .to_json()
                .map_err(|e| Failure::Usage(e.to_string()))
        }
        EmitStage::Graph => {
            let state =
                run_passes(&pipeline, PassId::BuildGraph, &ctx).map_err(|e| fail(e, &pipeline))?;
            Ok(state.graph.map(|g| g.to_string()).unwrap_or_default())
        }
        EmitStage::Bounds => {
            let state =
                run_passes(&pipeline, PassId::Bounds, &ctx).map_err(|e| fail(e, &pipeline))?;
            Ok(state.bounds.map(|b| b.to_string()).unwrap_or_default())
        }
        EmitStage::Inline | EmitStage::Dot => {
            let state =
                run_passes(&pipeline, PassId::Fusion, &ctx).map_err(|e| fail(e, &pipeline))?;
            let (Some(graph), Some(fusion)) = (state.graph, state.fusion) else {
                return Ok(String::new());
            };
            Ok(if cli.emit == EmitStage::Dot {
                autosched::dot::emit_dot(&graph, Some(&fusion))
            } else {
                fusion.report(&graph)
            })
        }
    }
}
