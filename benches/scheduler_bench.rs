use autosched::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// Benchmark scenarios. All scenarios load without diagnostics.

const BLUR_PIPELINE: &str = "
input img(x: [0, 4100], y: [0, 4100]): u16
func blur_x(x, y): u16 = (img(x, y) + img(x + 1, y) + img(x + 2, y)) / 3
func blur_y(x, y): u16 = (blur_x(x, y) + blur_x(x, y + 1) + blur_x(x, y + 2)) / 3
output blur_y(x: [0, 4096], y: [0, 4096])
";

const ELEMENT_WISE_PIPELINE: &str = "
input img(x: [0, 2048], y: [0, 2048])
func a(x, y) = exp(img(x, y))
func b(x, y) = sqrt(a(x, y)) * 2
func c(x, y) = b(x, y) + a(x, y)
output c(x: [0, 2048], y: [0, 2048])
";

const HISTOGRAM_PIPELINE: &str = "
input img(x: [0, 1024], y: [0, 1024]): u8
func hist(i: [0, 256]): i32 = 0
update hist(clamp(img(r, s), 0, 255)) = hist(clamp(img(r, s), 0, 255)) + 1 over r: [0, 1024], s: [0, 1024]
func cdf(i: [0, 256]): i32 = hist(i) + hist(max(i - 1, 0))
output cdf(i: [0, 256])
";

fn scenarios() -> Vec<(&'static str, &'static str)> {
    vec![
        ("blur", BLUR_PIPELINE),
        ("element_wise", ELEMENT_WISE_PIPELINE),
        ("histogram", HISTOGRAM_PIPELINE),
    ]
}

/// A chain of `n` 3-point stencils over a 2D input.
fn generate_stencil_chain(n: usize) -> String {
    let mut src = String::from("input s0(x: [0, 4096], y: [0, 4096])\n");
    for i in 1..=n {
        let prev = if i == 1 { "s0".to_string() } else { format!("s{}", i - 1) };
        src.push_str(&format!(
            "func s{i}(x, y) = {prev}(x, y) + {prev}(x + 1, y) + {prev}(x, y + 1)\n"
        ));
    }
    src.push_str(&format!("output s{n}(x: [0, 2048], y: [0, 2048])\n"));
    src
}

fn load(source: &str) -> Pipeline {
    resolve::load_pipeline(source)
        .expect("benchmark scenario must load")
        .pipeline
}

// Parser latency for representative scenarios.
fn bench_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/parse_latency");
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let result = parser::parse(black_box(source));
                black_box(&result.program);
            });
        });
    }
    group.finish();
}

// Full scheduling latency (graph -> bounds -> fusion -> search -> emit).
fn bench_full_schedule_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_schedule_latency");
    let target: Target = "x86-64-avx2".parse().expect("target");
    let params = MachineParams::generic();
    for (name, source) in scenarios() {
        let pipeline = load(source);
        group.bench_with_input(BenchmarkId::from_parameter(name), &pipeline, |b, pipeline| {
            b.iter(|| {
                let mut p = pipeline.clone();
                black_box(generate_schedules(&mut p, &target, &params).expect("schedule"));
            });
        });
    }
    group.finish();
}

// Per-pass latency on the blur scenario.
fn bench_phase_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/phase_latency");
    let pipeline = load(BLUR_PIPELINE);
    let target: Target = "x86-64-avx2".parse().expect("target");
    let params = MachineParams::generic();
    let model = DefaultCostModel::new(&params);
    let options = SchedulerOptions::default();

    let graph = graph::build_graph(&pipeline).expect("graph");
    let bounds = bounds::propagate_bounds(&graph).expect("bounds");
    let fusion = inline::analyze_fusion(&graph, &model, &options);

    group.bench_function("build_graph", |b| {
        b.iter(|| black_box(graph::build_graph(black_box(&pipeline)).expect("graph")))
    });
    group.bench_function("bounds", |b| {
        b.iter(|| black_box(bounds::propagate_bounds(black_box(&graph)).expect("bounds")))
    });
    group.bench_function("fusion", |b| {
        b.iter(|| black_box(inline::analyze_fusion(black_box(&graph), &model, &options)))
    });
    group.bench_function("search", |b| {
        b.iter(|| {
            black_box(
                schedule::search_schedules(
                    &graph, &bounds, &fusion, &model, &params, &target, &options,
                )
                .expect("search"),
            )
        })
    });
    group.finish();
}

// Scaling with pipeline depth.
fn bench_schedule_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/schedule_scaling");
    let target: Target = "x86-64-avx2".parse().expect("target");
    let params = MachineParams::generic();
    for n in [4usize, 16, 64] {
        let pipeline = load(&generate_stencil_chain(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &pipeline, |b, pipeline| {
            b.iter(|| {
                let mut p = pipeline.clone();
                black_box(generate_schedules(&mut p, &target, &params).expect("schedule"));
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_latency,
    bench_full_schedule_latency,
    bench_phase_latency,
    bench_schedule_scaling,
);
criterion_main!(benches);
