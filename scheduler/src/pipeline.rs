// pipeline.rs — Scheduler state and pass orchestration
//
// Holds all pass artifacts of one run and executes the minimal set of passes
// for a requested terminal PassId. `generate_schedules` is the entry point
// used by library clients: it runs every pass and, only when all of them
// succeed, attaches the decisions to the pipeline's stages.
//
// Preconditions: the pipeline is not modified while a run borrows it.
// Postconditions: on success every artifact of `required_passes(terminal)` is
//   populated; `generate_schedules` leaves every stage with a decision.
// Failure modes: the first failing pass's `ScheduleError`; a failed schedule
//   certificate becomes `ScheduleError::Verification`.
// Side effects: `generate_schedules` writes `Stage::schedule`; passes log
//   their elapsed time at debug level.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::bounds::BoundsEstimate;
use crate::config::SchedulerOptions;
use crate::cost::{CostModel, DefaultCostModel};
use crate::error::ScheduleError;
use crate::graph::StageGraph;
use crate::inline::FusionResult;
use crate::machine::{MachineParams, Target};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::schedule::{ScheduleCert, ScheduledPipeline};
use crate::stage::Pipeline;

// ── Artifact storage ───────────────────────────────────────────────────────

/// Everything one run produces. Artifacts of passes that did not run stay
/// `None`.
#[derive(Debug, Default)]
pub struct SchedulerState {
    pub graph: Option<StageGraph>,
    pub bounds: Option<BoundsEstimate>,
    pub fusion: Option<FusionResult>,
    pub schedule: Option<ScheduledPipeline>,
    pub cert: Option<ScheduleCert>,
    pub text: Option<String>,
}

/// Inputs shared by every pass of a run.
pub struct RunContext<'a> {
    pub target: &'a Target,
    pub params: &'a MachineParams,
    pub options: &'a SchedulerOptions,
    pub model: &'a dyn CostModel,
}

fn missing(artifact: &str, pass: PassId) -> ScheduleError {
    ScheduleError::Internal(format!(
        "{} requires the {artifact} artifact, which was not produced",
        descriptor(pass).name
    ))
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
pub fn run_passes(
    pipeline: &Pipeline,
    terminal: PassId,
    ctx: &RunContext<'_>,
) -> Result<SchedulerState, ScheduleError> {
    let mut state = SchedulerState::default();
    debug!(
        terminal = descriptor(terminal).name,
        model = ctx.model.name(),
        machine = %ctx.params,
        "running passes"
    );

    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::BuildGraph => {
                state.graph = Some(crate::graph::build_graph(pipeline)?);
            }
            PassId::Bounds => {
                let graph = state.graph.as_ref().ok_or_else(|| missing("graph", pass_id))?;
                state.bounds = Some(crate::bounds::propagate_bounds(graph)?);
            }
            PassId::Fusion => {
                let graph = state.graph.as_ref().ok_or_else(|| missing("graph", pass_id))?;
                state.fusion = Some(crate::inline::analyze_fusion(graph, ctx.model, ctx.options));
            }
            PassId::Search => {
                let graph = state.graph.as_ref().ok_or_else(|| missing("graph", pass_id))?;
                let bounds = state.bounds.as_ref().ok_or_else(|| missing("bounds", pass_id))?;
                let fusion = state.fusion.as_ref().ok_or_else(|| missing("fusion", pass_id))?;
                let schedule = crate::schedule::search_schedules(
                    graph,
                    bounds,
                    fusion,
                    ctx.model,
                    ctx.params,
                    ctx.target,
                    ctx.options,
                )?;
                let cert = crate::schedule::verify_schedule(graph, fusion, &schedule);
                if !cert.all_pass() {
                    return Err(ScheduleError::Verification {
                        failed: cert.failed().into_iter().map(String::from).collect(),
                    });
                }
                state.schedule = Some(schedule);
                state.cert = Some(cert);
            }
            PassId::Emit => {
                let schedule = state
                    .schedule
                    .as_ref()
                    .ok_or_else(|| missing("schedule", pass_id))?;
                state.text = Some(crate::emit::emit_schedule(schedule));
            }
        }
        debug!(
            pass = descriptor(pass_id).name,
            elapsed_ms = t.elapsed().as_secs_f64() * 1000.0,
            "pass complete"
        );
    }
    Ok(state)
}

// ── Entry points ───────────────────────────────────────────────────────────

/// Schedule every stage of `pipeline` with the shipped cost model and
/// default options. Returns the canonical schedule text.
pub fn generate_schedules(
    pipeline: &mut Pipeline,
    target: &Target,
    params: &MachineParams,
) -> Result<String, ScheduleError> {
    let model = DefaultCostModel::new(params);
    generate_schedules_with(pipeline, target, params, &SchedulerOptions::default(), &model)
}

/// Like `generate_schedules`, with explicit options and cost model.
pub fn generate_schedules_with(
    pipeline: &mut Pipeline,
    target: &Target,
    params: &MachineParams,
    options: &SchedulerOptions,
    model: &dyn CostModel,
) -> Result<String, ScheduleError> {
    let ctx = RunContext {
        target,
        params,
        options,
        model,
    };
    let state = run_passes(pipeline, PassId::Emit, &ctx)?;
    let schedule = state
        .schedule
        .ok_or_else(|| missing("schedule", PassId::Emit))?;
    let text = state.text.ok_or_else(|| missing("text", PassId::Emit))?;
    attach_schedule(pipeline, &schedule);
    Ok(text)
}

/// Store each decision on its stage, replacing any earlier one.
pub fn attach_schedule(pipeline: &mut Pipeline, schedule: &ScheduledPipeline) {
    for decision in &schedule.decisions {
        let Some(stage) = pipeline.stage_mut(&decision.stage) else {
            continue;
        };
        if stage.schedule.is_some() {
            warn!(stage = %stage.name, "replacing existing schedule");
        }
        stage.schedule = Some(decision.clone());
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for `--emit build-info`.
///
/// `source_hash`: SHA-256 of the raw pipeline source text.
/// `schedule_hash`: SHA-256 of the emitted schedule text.
/// `options`: the scheduler options the run used.
/// `scheduler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub schedule_hash: [u8; 32],
    pub machine: String,
    pub target: String,
    pub options: SchedulerOptions,
    pub scheduler_version: &'static str,
}

#[derive(Serialize)]
struct BuildInfo<'a> {
    source_hash: String,
    schedule_hash: String,
    machine: &'a str,
    target: &'a str,
    options: &'a SchedulerOptions,
    scheduler_version: &'a str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the schedule hash (64 characters).
    pub fn schedule_hash_hex(&self) -> String {
        bytes_to_hex(&self.schedule_hash)
    }

    /// Pretty-printed JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let info = BuildInfo {
            source_hash: self.source_hash_hex(),
            schedule_hash: self.schedule_hash_hex(),
            machine: &self.machine,
            target: &self.target,
            options: &self.options,
            scheduler_version: self.scheduler_version,
        };
        let mut json = serde_json::to_string_pretty(&info)?;
        json.push('\n');
        Ok(json)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn compute_provenance(
    source: &str,
    schedule_text: &str,
    params: &MachineParams,
    target: &Target,
    options: &SchedulerOptions,
) -> Provenance {
    Provenance {
        source_hash: sha256(source),
        schedule_hash: sha256(schedule_text),
        machine: params.to_string(),
        target: target.to_string(),
        options: options.clone(),
        scheduler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
