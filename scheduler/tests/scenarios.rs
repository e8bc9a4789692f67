// End-to-end scheduling scenarios.
//
// Each test loads a `.stg` pipeline through the front end and runs the full
// pass sequence, checking the decisions attached to the pipeline and the
// canonical schedule text.

use autosched::emit::parse_schedule;
use autosched::expr::Expr;
use autosched::pass::PassId;
use autosched::pipeline::{run_passes, RunContext};
use autosched::region::Range;
use autosched::resolve::load_pipeline;
use autosched::schedule::Granularity;
use autosched::stage::{InputBuffer, Stage};
use autosched::*;

// ── Test helpers ────────────────────────────────────────────────────────────

fn load(source: &str) -> Pipeline {
    match load_pipeline(source) {
        Ok(loaded) => loaded.pipeline,
        Err(diags) => panic!("pipeline failed to load: {diags:#?}"),
    }
}

fn avx2() -> Target {
    "x86-64-avx2".parse().expect("target")
}

fn schedule_with(source: &str, params: &MachineParams, options: &SchedulerOptions) -> (Pipeline, String) {
    let mut pipeline = load(source);
    let model = DefaultCostModel::new(params);
    let text = generate_schedules_with(&mut pipeline, &avx2(), params, options, &model)
        .unwrap_or_else(|e| panic!("scheduling failed: {e}"));
    (pipeline, text)
}

fn no_element_wise() -> SchedulerOptions {
    SchedulerOptions {
        inline_element_wise: false,
        ..SchedulerOptions::default()
    }
}

const PRODUCER_CONSUMER: &str = "\
input src(x: [0, 4096], y: [0, 4096])
func p(x, y) = exp(src(x, y))
func c(x, y) = p(x, y) + 1
output c(x: [0, 4096], y: [0, 4096])
";

// ── Cache-aware tiling ──────────────────────────────────────────────────────

#[test]
fn small_cache_tiles_consumer_and_computes_producer_per_tile() {
    let params = MachineParams::new(4, 32, 40).expect("params");
    let (pipeline, text) = schedule_with(PRODUCER_CONSUMER, &params, &no_element_wise());

    insta::assert_snapshot!(text, @r"
    p: compute_at(c, x_o) vectorize(x, 8)
    c: root tile(x=256, y=16) parallel(y_o, 1) vectorize(x_i, 8)
    ");

    let c = pipeline.find_stage("c").and_then(|s| s.schedule.as_ref()).expect("c");
    let tile_points: u64 = c.tiles.iter().map(|t| t.extent as u64).product();
    // p and c are f32; one tile of each must fit the cache.
    assert!(tile_points * 4 * 2 <= params.cache_bytes());
}

#[test]
fn large_cache_keeps_producer_at_root() {
    let params = MachineParams::new(4, 1024 * 1024, 40).expect("params");
    let (pipeline, _) = schedule_with(PRODUCER_CONSUMER, &params, &no_element_wise());
    for stage in &pipeline.stages {
        let decision = stage.schedule.as_ref().expect("decision");
        assert_eq!(decision.granularity, Granularity::Root, "{}", stage.name);
        assert!(decision.tiles.is_empty(), "{}", stage.name);
    }
}

// ── Inlining ────────────────────────────────────────────────────────────────

#[test]
fn constant_stage_with_two_consumers_is_inlined() {
    let source = "\
input src(x: [0, 1024])
func k(x) = 2
func a(x) = src(x) * k(x)
func b(x) = src(x) + k(x)
func out(x) = a(x - 1) + b(x + 1)
output out(x: [0, 1024])
";
    let (pipeline, text) = schedule_with(source, &MachineParams::generic(), &SchedulerOptions::default());
    assert!(text.lines().any(|l| l == "k: inline"));
    let k = pipeline.find_stage("k").and_then(|s| s.schedule.as_ref()).expect("k");
    assert!(k.is_inline());
    assert!(k.tiles.is_empty() && k.parallel.is_none() && k.vector.is_none());
}

#[test]
fn expensive_element_wise_single_consumer_is_inlined() {
    let source = "\
input src(x: [0, 1024])
func a(x) = exp(exp(sqrt(src(x))))
func out(x) = a(x) * 2
output out(x: [0, 1024])
";
    let (_, text) = schedule_with(source, &MachineParams::generic(), &SchedulerOptions::default());
    assert!(text.starts_with("a: inline\nout: root"));
}

#[test]
fn inline_report_snapshot() {
    let source = "\
input src(x: [0, 16])
func a(x) = exp(src(x))
func b(x) = exp(a(x))
func c(x) = exp(b(x))
func out(x) = c(x - 1) + c(x + 1)
output out(x: [0, 8])
";
    let pipeline = load(source);
    let params = MachineParams::generic();
    let model = DefaultCostModel::new(&params);
    let target = avx2();
    let options = SchedulerOptions::default();
    let ctx = RunContext {
        target: &target,
        params: &params,
        options: &options,
        model: &model,
    };
    let state = run_passes(&pipeline, PassId::Fusion, &ctx).expect("fusion");
    let (Some(graph), Some(fusion)) = (state.graph, state.fusion) else {
        panic!("fusion artifacts missing");
    };
    insta::assert_snapshot!(fusion.report(&graph), @r"
    a: inline (element-wise)
    b: inline (element-wise)
    c: arith 24, loads 1
    out: arith 3, loads 2
    ");
}

// ── Bounds ──────────────────────────────────────────────────────────────────

#[test]
fn blur_bounds_snapshot() {
    let source = "\
input img(x: [-8, 4096], y: [-8, 4096])
func blur_x(x, y) = (img(x - 1, y) + img(x, y) + img(x + 1, y)) / 3
func blur_y(x, y) = (blur_x(x, y - 1) + blur_x(x, y) + blur_x(x, y + 1)) / 3
output blur_y(x: [0, 16], y: [0, 16])
";
    let pipeline = load(source);
    let params = MachineParams::generic();
    let model = DefaultCostModel::new(&params);
    let target = avx2();
    let options = SchedulerOptions::default();
    let ctx = RunContext {
        target: &target,
        params: &params,
        options: &options,
        model: &model,
    };
    let state = run_passes(&pipeline, PassId::Bounds, &ctx).expect("bounds");
    let bounds = state.bounds.expect("bounds artifact");
    insta::assert_snapshot!(bounds.to_string(), @r"
    blur_x: [0, 16] x [-1, 18]
    blur_y: [0, 16] x [0, 16]
    img (input): [-1, 18] x [-1, 18]
    ");
}

// ── Failures ────────────────────────────────────────────────────────────────

#[test]
fn missing_estimate_attaches_nothing() {
    let mut pipeline = load("func f(x, y) = x + y\noutput f(x: [0, 64], y)\n");
    let params = MachineParams::generic();
    let err = generate_schedules(&mut pipeline, &avx2(), &params).unwrap_err();
    assert_eq!(
        err,
        ScheduleError::MissingEstimate {
            stage: "f".into(),
            dim: "y".into()
        }
    );
    assert!(pipeline.stages.iter().all(|s| s.schedule.is_none()));
}

#[test]
fn dangling_stage_is_a_graph_error() {
    let mut pipeline = load("func unused(x) = x\nfunc out(x) = x\noutput out(x: [0, 8])\n");
    let err = generate_schedules(&mut pipeline, &avx2(), &MachineParams::generic()).unwrap_err();
    assert_eq!(
        err,
        ScheduleError::Graph(GraphError::Dangling {
            stage: "unused".into()
        })
    );
}

#[test]
fn unbounded_lookup_names_stage_and_dimension() {
    let source = "\
input idx(x: [0, 64]): i32
func lut(i) = i * 3
func out(x) = lut(idx(x))
output out(x: [0, 64])
";
    let mut pipeline = load(source);
    let err = generate_schedules(&mut pipeline, &avx2(), &MachineParams::generic()).unwrap_err();
    assert_eq!(
        err,
        ScheduleError::UnboundedRegion {
            stage: "lut".into(),
            dim: "i".into()
        }
    );
}

// ── Text form ───────────────────────────────────────────────────────────────

#[test]
fn demo_schedules_round_trip_through_text() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos");
    for name in ["blur.stg", "histogram.stg", "unsharp.stg"] {
        let source = std::fs::read_to_string(dir.join(name)).expect("demo source");
        let (pipeline, text) =
            schedule_with(&source, &MachineParams::generic(), &SchedulerOptions::default());
        let parsed = parse_schedule(&text).expect("parse emitted schedule");
        assert_eq!(autosched::emit::emit_schedule(&parsed), text, "{name}");
        assert_eq!(parsed.decisions.len(), pipeline.stages.len(), "{name}");
        for decision in &parsed.decisions {
            let stage = pipeline.find_stage(&decision.stage).expect("stage");
            assert_eq!(stage.schedule.as_ref(), Some(decision), "{name}");
        }
    }
}

#[test]
fn keyword_named_stages_round_trip_through_text() {
    let x = || Expr::var("x");
    let mut pipeline = Pipeline::new()
        .input(InputBuffer::new("src", &[("x", Range::new(-1, 1026))]))
        .stage(Stage::new(
            "over",
            &["x"],
            Expr::input("src", vec![x() - 1]) + Expr::input("src", vec![x() + 1]),
        ))
        .stage(Stage::new(
            "output",
            &["x"],
            Expr::call("over", vec![x() - 1]) * Expr::call("over", vec![x() + 1]),
        ))
        .output("output", &[("x", Range::new(1, 1022))]);
    let text = generate_schedules(&mut pipeline, &avx2(), &MachineParams::generic())
        .expect("schedule");
    let parsed = parse_schedule(&text).expect("parse emitted schedule");
    assert_eq!(autosched::emit::emit_schedule(&parsed), text);
    assert!(parsed.get("output").is_some_and(|d| d.granularity == Granularity::Root));
}

#[test]
fn update_stage_splits_name_only_pure_loops() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos");
    let source = std::fs::read_to_string(dir.join("histogram.stg")).expect("demo source");
    let (pipeline, _) = schedule_with(&source, &MachineParams::generic(), &SchedulerOptions::default());
    let hist = pipeline.find_stage("hist").expect("hist");
    let decision = hist.schedule.as_ref().expect("decision");
    assert_eq!(decision.granularity, Granularity::Root);

    let pure_loops = ["i", "i_o", "i_i"];
    let parallel = decision.parallel.as_ref().expect("initialization is parallel");
    assert!(parallel.loops.iter().all(|l| pure_loops.contains(&l.as_str())));
    for def in &hist.updates {
        for rvar in &def.rvars {
            assert!(!parallel.loops.contains(&rvar.name));
            assert!(decision.vector.as_ref().map_or(true, |v| v.loop_var != rvar.name));
        }
    }
}
