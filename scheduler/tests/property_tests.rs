// Property-based tests for scheduler invariants.
//
// Four categories:
// 1. MachineParams text round trip
// 2. Bounds monotonicity under widened output estimates
// 3. Determinism and text idempotence of generated schedules
// 4. Inlining soundness and attachment acyclicity on generated pipelines
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use autosched::emit::{emit_schedule, parse_schedule};
use autosched::pass::{PassId, StageCert};
use autosched::pipeline::{run_passes, RunContext, SchedulerState};
use autosched::resolve::load_pipeline;
use autosched::schedule::{verify_schedule, Granularity};
use autosched::*;
use proptest::prelude::*;

// ── Pipeline generator ──────────────────────────────────────────────────────

/// One generated stage body over its predecessor `p`. Every variant reads
/// `p` so no stage dangles.
fn arb_body() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("{p}(x, y) + 1"),
        Just("exp({p}(x, y))"),
        Just("{p}(x - 1, y) + {p}(x + 1, y)"),
        Just("{p}(x, y - 1) * {p}(x, y + 1)"),
        Just("sqrt({p}(x, y)) + k(x, y)"),
        Just("({p}(x, y) + {p}(x + 2, y + 2)) / 2"),
    ]
}

/// A linear chain of 1..6 stages over a 2D input, plus a constant stage `k`
/// that may be read by any of them.
fn arb_pipeline() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_body(), 1..6).prop_map(|bodies| {
        let mut src = String::from("input src(x: [-16, 4200], y: [-16, 4200])\n");
        src.push_str("func k(x, y) = 3\n");
        let mut prev = "src".to_string();
        for (i, body) in bodies.iter().enumerate() {
            let name = format!("s{i}");
            src.push_str(&format!("func {name}(x, y) = {}\n", body.replace("{p}", &prev)));
            prev = name;
        }
        // k must have a consumer.
        src.push_str(&format!("func out(x, y) = {prev}(x, y) + k(x, y)\n"));
        src.push_str("output out(x: [0, {W}], y: [0, {H}])\n");
        src
    })
}

fn with_extent(template: &str, w: i64, h: i64) -> String {
    template.replace("{W}", &w.to_string()).replace("{H}", &h.to_string())
}

fn arb_params() -> impl Strategy<Value = MachineParams> {
    (1u32..64, 1u32..65536, 1u32..200)
        .prop_map(|(p, c, b)| MachineParams::new(p, c, b).expect("positive params"))
}

fn run(source: &str, params: &MachineParams, terminal: PassId) -> (Pipeline, SchedulerState) {
    let pipeline = load_pipeline(source).expect("generated pipeline loads").pipeline;
    let target: Target = "x86-64-avx2".parse().expect("target");
    let model = DefaultCostModel::new(params);
    let options = SchedulerOptions::default();
    let ctx = RunContext {
        target: &target,
        params,
        options: &options,
        model: &model,
    };
    let state = run_passes(&pipeline, terminal, &ctx).expect("run succeeds");
    (pipeline, state)
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn machine_params_round_trip(params in arb_params()) {
        let text = params.to_string();
        let parsed: MachineParams = text.parse().expect("canonical text parses");
        prop_assert_eq!(parsed, params);
    }

    #[test]
    fn bounds_are_monotone_in_output_estimates(
        template in arb_pipeline(),
        w in 1i64..512,
        h in 1i64..512,
        dw in 0i64..256,
        dh in 0i64..256,
    ) {
        let params = MachineParams::generic();
        let (_, small) = run(&with_extent(&template, w, h), &params, PassId::Bounds);
        let (_, large) = run(&with_extent(&template, w + dw, h + dh), &params, PassId::Bounds);
        let graph = small.graph.expect("graph");
        let (small, large) = (small.bounds.expect("bounds"), large.bounds.expect("bounds"));
        for node in &graph.nodes {
            prop_assert!(
                large.region(node.id).contains(small.region(node.id)),
                "{} shrank: {} -> {}",
                node.name,
                small.region(node.id),
                large.region(node.id)
            );
        }
    }

    #[test]
    fn schedules_are_deterministic_and_idempotent(
        template in arb_pipeline(),
        params in arb_params(),
    ) {
        let source = with_extent(&template, 2048, 1024);
        let (_, first) = run(&source, &params, PassId::Emit);
        let (_, second) = run(&source, &params, PassId::Emit);
        let text = first.text.expect("text");
        prop_assert_eq!(&text, &second.text.expect("text"));

        let parsed = parse_schedule(&text).expect("emitted text parses");
        prop_assert_eq!(emit_schedule(&parsed), text);
    }

    #[test]
    fn inlined_stages_are_undecided_and_attachments_reach_root(
        template in arb_pipeline(),
        params in arb_params(),
    ) {
        let source = with_extent(&template, 1024, 1024);
        let (_, state) = run(&source, &params, PassId::Search);
        let graph = state.graph.expect("graph");
        let fusion = state.fusion.expect("fusion");
        let sched = state.schedule.expect("schedule");

        prop_assert!(verify_schedule(&graph, &fusion, &sched).all_pass());
        for id in fusion.inlined_stages() {
            let decision = sched.get(&graph.node(id).name).expect("decision");
            prop_assert!(decision.is_inline());
        }
        for decision in &sched.decisions {
            if let Granularity::At { consumer, .. } = &decision.granularity {
                let c = sched.get(consumer).expect("consumer decision");
                prop_assert!(!c.is_inline());
            }
        }
        let out = sched.get("out").expect("out");
        prop_assert_eq!(&out.granularity, &Granularity::Root);
    }
}
