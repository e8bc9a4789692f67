// schedule.rs — Schedule search
//
// Chooses, for every non-inlined stage, where it is computed (root or at a
// loop level of its single consumer), how root stages are tiled, which loops
// run in parallel and which loop is vectorized. Greedy: stages are visited
// from outputs toward inputs so every consumer's loop nest is fixed before
// its producers are priced.
//
// Preconditions: `graph`, `bounds` and `fusion` come from the same run.
// Postconditions: every stage has exactly one decision, inline iff fused;
//   attachments target effective consumers and chain to a root stage;
//   identical inputs give identical decisions.
// Failure modes: none for a bounded graph (sub-region projections inherit
//   the bounds of the whole region); `verify_schedule` certifies the result.
// Side effects: none.

use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::bounds::{required_regions, BoundsEstimate};
use crate::config::SchedulerOptions;
use crate::cost::{Cost, CostModel};
use crate::error::ScheduleError;
use crate::graph::{Callee, DefRef, StageGraph, StageNode};
use crate::id::StageId;
use crate::inline::FusionResult;
use crate::machine::{MachineParams, Target};
use crate::region::{Range, Region};

// ── Decisions ───────────────────────────────────────────────────────────────

/// Where a stage is computed and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Granularity {
    Inline,
    Root,
    /// Inside loop `loop_var` of `consumer`.
    At { consumer: String, loop_var: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileExtent {
    pub dim: String,
    pub extent: i64,
}

/// Fused outer loops run as parallel tasks of `factor` iterations each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelSplit {
    pub loops: Vec<String>,
    pub factor: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorSplit {
    pub loop_var: String,
    pub factor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDecision {
    pub stage: String,
    pub granularity: Granularity,
    /// Tiled dimensions, innermost first.
    pub tiles: Vec<TileExtent>,
    pub parallel: Option<ParallelSplit>,
    pub vector: Option<VectorSplit>,
}

impl StageDecision {
    pub fn inline(stage: &str) -> Self {
        Self::with_granularity(stage, Granularity::Inline)
    }

    pub fn root(stage: &str) -> Self {
        Self::with_granularity(stage, Granularity::Root)
    }

    fn with_granularity(stage: &str, granularity: Granularity) -> Self {
        StageDecision {
            stage: stage.to_string(),
            granularity,
            tiles: Vec::new(),
            parallel: None,
            vector: None,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.granularity == Granularity::Inline
    }

    pub fn tile_of(&self, dim: &str) -> Option<i64> {
        self.tiles.iter().find(|t| t.dim == dim).map(|t| t.extent)
    }
}

/// Decisions for every stage, in realization order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScheduledPipeline {
    pub decisions: Vec<StageDecision>,
}

impl ScheduledPipeline {
    pub fn get(&self, stage: &str) -> Option<&StageDecision> {
        self.decisions.iter().find(|d| d.stage == stage)
    }
}

// ── Loop nests ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Whole extent of an untiled dimension.
    Full,
    /// Over the tiles of a tiled dimension (`d_o`).
    Tile,
    /// Within one tile (`d_i`).
    Intra,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    pub var: String,
    pub dim: usize,
    pub kind: LoopKind,
    pub trip: i64,
}

/// Loops of one stage, outermost first: tile loops of tiled dimensions
/// (outermost dimension first), then the intra-tile or full loops of every
/// dimension (outermost dimension first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopNest {
    pub loops: Vec<Loop>,
    region: Region,
    tiles: Vec<Option<i64>>,
}

impl LoopNest {
    pub fn new(dims: &[&str], region: &Region, tiles: &[Option<i64>]) -> Self {
        let extent = |d: usize| region.ranges().get(d).map_or(1, |r| r.extent.max(0));
        let tile = |d: usize| tiles.get(d).copied().flatten();
        let mut loops = Vec::with_capacity(dims.len() * 2);
        for d in (0..dims.len()).rev() {
            if let Some(t) = tile(d) {
                loops.push(Loop {
                    var: format!("{}_o", dims[d]),
                    dim: d,
                    kind: LoopKind::Tile,
                    trip: ceil_div(extent(d), t),
                });
            }
        }
        for d in (0..dims.len()).rev() {
            loops.push(match tile(d) {
                Some(t) => Loop {
                    var: format!("{}_i", dims[d]),
                    dim: d,
                    kind: LoopKind::Intra,
                    trip: t.min(extent(d)),
                },
                None => Loop {
                    var: dims[d].to_string(),
                    dim: d,
                    kind: LoopKind::Full,
                    trip: extent(d),
                },
            });
        }
        LoopNest {
            loops,
            region: region.clone(),
            tiles: (0..dims.len()).map(tile).collect(),
        }
    }

    /// Region the whole nest covers.
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Iterations of loops `0..=level` together.
    pub fn iterations(&self, level: usize) -> u64 {
        self.loops
            .iter()
            .take(level + 1)
            .map(|l| l.trip.max(0) as u64)
            .fold(1u64, |acc, t| acc.saturating_mul(t))
    }

    /// Region computed by one iteration of loop `level`.
    pub fn sub_region(&self, level: usize) -> Region {
        let mut ranges = self.region.ranges().to_vec();
        for l in self.loops.iter().take(level + 1) {
            let Some(r) = ranges.get_mut(l.dim) else {
                continue;
            };
            r.extent = match (l.kind, self.tiles.get(l.dim).copied().flatten()) {
                (LoopKind::Tile, Some(t)) => t.min(r.extent),
                _ => 1,
            };
        }
        Region::new(ranges)
    }

    /// Region of one full tile (the whole region when untiled).
    pub fn tile_region(&self) -> Region {
        let extents: Vec<i64> = self
            .region
            .ranges()
            .iter()
            .zip(&self.tiles)
            .map(|(r, t)| t.map_or(r.extent, |t| t.min(r.extent)))
            .collect();
        self.region.with_extents(&extents)
    }
}

fn ceil_div(a: i64, b: i64) -> i64 {
    if b <= 0 {
        return a;
    }
    (a + b - 1) / b
}

/// Loop variable names of `node` under `decision`, outermost first.
pub fn loop_vars(node: &StageNode, decision: &StageDecision) -> Vec<String> {
    if decision.is_inline() {
        return Vec::new();
    }
    let dims = node.dim_names();
    let tiles: Vec<Option<i64>> = dims.iter().map(|d| decision.tile_of(d)).collect();
    let region = Region::new(node.dims.iter().map(|_| Range::new(0, 1)).collect());
    LoopNest::new(&dims, &region, &tiles)
        .loops
        .into_iter()
        .map(|l| l.var)
        .collect()
}

// ── Search ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Placement {
    decision: StageDecision,
    nest: LoopNest,
    /// Number of times the nest runs.
    instances: u64,
    cost: Cost,
}

struct Footprint {
    bytes: f64,
    dep_points: u64,
}

#[derive(Clone)]
struct TileCandidate {
    tiles: Vec<Option<i64>>,
    bytes: f64,
    halo: f64,
    area: u64,
    inner: i64,
}

impl TileCandidate {
    /// Less halo, then more area, then a longer innermost extent.
    fn better_than(&self, other: &TileCandidate) -> bool {
        match self.halo.total_cmp(&other.halo) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => (self.area, self.inner) > (other.area, other.inner),
        }
    }
}

struct Search<'a> {
    graph: &'a StageGraph,
    bounds: &'a BoundsEstimate,
    fusion: &'a FusionResult,
    model: &'a dyn CostModel,
    params: &'a MachineParams,
    target: &'a Target,
    options: &'a SchedulerOptions,
    placed: Vec<Option<Placement>>,
}

/// Choose a decision for every stage of `graph`.
#[allow(clippy::too_many_arguments)]
pub fn search_schedules(
    graph: &StageGraph,
    bounds: &BoundsEstimate,
    fusion: &FusionResult,
    model: &dyn CostModel,
    params: &MachineParams,
    target: &Target,
    options: &SchedulerOptions,
) -> Result<ScheduledPipeline, ScheduleError> {
    let mut search = Search {
        graph,
        bounds,
        fusion,
        model,
        params,
        target,
        options,
        placed: vec![None; graph.len()],
    };
    for &id in graph.order.iter().rev() {
        if fusion.is_inlined(id) {
            continue;
        }
        let placement = search.place(id)?;
        debug!(
            stage = %graph.node(id).name,
            granularity = ?placement.decision.granularity,
            cost = placement.cost.total(),
            "placed"
        );
        search.placed[id.index()] = Some(placement);
    }

    let decisions = graph
        .order
        .iter()
        .map(|&id| match &search.placed[id.index()] {
            Some(p) => p.decision.clone(),
            None => StageDecision::inline(&graph.node(id).name),
        })
        .collect();
    Ok(ScheduledPipeline { decisions })
}

impl Search<'_> {
    /// Root first, then every level of the attach target, outer to inner;
    /// a later candidate must be strictly cheaper to win.
    fn place(&self, id: StageId) -> Result<Placement, ScheduleError> {
        let node = self.graph.node(id);
        let mut best = self.root_placement(node)?;
        trace!(stage = %node.name, candidate = "root", cost = best.cost.total());

        if let Some(consumer) = self.attach_target(node) {
            let levels = self.placement_of(consumer)?.nest.loops.len();
            for level in 0..levels {
                let Some(candidate) = self.attached_placement(node, consumer, level)? else {
                    continue;
                };
                trace!(
                    stage = %node.name,
                    candidate = ?candidate.decision.granularity,
                    cost = candidate.cost.total()
                );
                if candidate.cost.total() < best.cost.total() {
                    best = candidate;
                }
            }
        }
        Ok(best)
    }

    fn placement_of(&self, id: StageId) -> Result<&Placement, ScheduleError> {
        self.placed[id.index()].as_ref().ok_or_else(|| {
            ScheduleError::Internal(format!(
                "consumer '{}' was not placed before its producers",
                self.graph.node(id).name
            ))
        })
    }

    /// The single effective consumer a stage may be computed inside.
    fn attach_target(&self, node: &StageNode) -> Option<StageId> {
        if node.is_output || !node.updates.is_empty() || node.recursive {
            return None;
        }
        match self.fusion.effective_consumers(node.id).as_slice() {
            [c] if self.fusion.reads_only_pure(*c, node.id) => Some(*c),
            _ => None,
        }
    }

    fn root_placement(&self, node: &StageNode) -> Result<Placement, ScheduleError> {
        let region = self.bounds.region(node.id);
        let tiles = self.choose_tiles(node, region)?;
        let nest = LoopNest::new(&node.dim_names(), region, &tiles);
        let live = self.footprint(node, &nest.tile_region())?.bytes;
        let cost = self.cost(node, region, 1, live);

        let decision = StageDecision {
            stage: node.name.clone(),
            granularity: Granularity::Root,
            tiles: node
                .dims
                .iter()
                .zip(&tiles)
                .filter_map(|(d, t)| {
                    t.map(|extent| TileExtent {
                        dim: d.name.clone(),
                        extent,
                    })
                })
                .collect(),
            parallel: self.parallel_split(&nest),
            vector: self.vector_split(node, &nest),
        };
        Ok(Placement {
            decision,
            nest,
            instances: 1,
            cost,
        })
    }

    fn attached_placement(
        &self,
        node: &StageNode,
        consumer: StageId,
        level: usize,
    ) -> Result<Option<Placement>, ScheduleError> {
        let cnode = self.graph.node(consumer);
        let cp = self.placement_of(consumer)?;
        let sub = cp.nest.sub_region(level);
        let required = required_regions(
            self.graph,
            cnode,
            self.fusion.effective_calls(consumer),
            &sub,
            false,
        )?;
        let Some(region) = required.get(&Callee::Stage(node.id)) else {
            return Ok(None);
        };
        let instances = cp.instances.saturating_mul(cp.nest.iterations(level));
        let nest = LoopNest::new(&node.dim_names(), region, &vec![None; node.dims.len()]);
        let live = self.footprint(node, region)?.bytes;
        let cost = self.cost(node, region, instances, live);

        let mut decision = StageDecision::with_granularity(
            &node.name,
            Granularity::At {
                consumer: cnode.name.clone(),
                loop_var: cp.nest.loops[level].var.clone(),
            },
        );
        decision.vector = self.vector_split(node, &nest);
        Ok(Some(Placement {
            decision,
            nest,
            instances,
            cost,
        }))
    }

    /// Arithmetic of all instances, memory traffic of the stage's own loads
    /// against its live footprint, and consumer reads against its storage.
    fn cost(&self, node: &StageNode, region: &Region, instances: u64, live_bytes: f64) -> Cost {
        let points = region.points() as f64;
        let pure = self.fusion.cost(node.id);
        let mut arith = points * pure.arith;
        let mut loads = points * pure.loads;
        for def in &node.updates {
            let c = self.fusion.expanded_cost(self.graph, self.model, &def.value);
            let rp = def.reduction_points() as f64;
            arith += rp * c.arith;
            loads += rp * c.loads;
        }
        let n = instances as f64;
        arith *= n;
        loads *= n;

        let storage = points * f64::from(node.elem.bytes());
        let reads = self.consumer_reads(node);
        Cost {
            arith,
            memory: self.model.memory_cost(loads, live_bytes)
                + self.model.memory_cost(reads, storage),
        }
    }

    /// Loads of `node` performed by its (already placed) consumers.
    fn consumer_reads(&self, node: &StageNode) -> f64 {
        let mut reads = 0.0;
        for c in self.fusion.effective_consumers(node.id) {
            let Some(cp) = &self.placed[c.index()] else {
                continue;
            };
            let cnode = self.graph.node(c);
            let instances = cp.instances as f64;
            let points = instances * cp.nest.region().points() as f64;
            for call in self
                .fusion
                .effective_calls(c)
                .iter()
                .filter(|call| call.callee == Callee::Stage(node.id))
            {
                reads += match call.def {
                    DefRef::Pure => points,
                    DefRef::Update(u) => {
                        instances
                            * cnode
                                .updates
                                .get(u)
                                .map_or(0.0, |d| d.reduction_points() as f64)
                    }
                };
            }
        }
        reads
    }

    /// Bytes of `region` of the stage plus everything it reads to compute it.
    fn footprint(&self, node: &StageNode, region: &Region) -> Result<Footprint, ScheduleError> {
        let required = required_regions(
            self.graph,
            node,
            self.fusion.effective_calls(node.id),
            region,
            true,
        )?;
        let mut bytes = region.points() as f64 * f64::from(node.elem.bytes());
        let mut dep_points = 0u64;
        for (callee, r) in &required {
            bytes += r.points() as f64 * f64::from(self.graph.callee_bytes(*callee));
            dep_points = dep_points.saturating_add(r.points());
        }
        Ok(Footprint { bytes, dep_points })
    }

    /// Tile extents per dimension (`None` = untiled) for a root stage.
    fn choose_tiles(&self, node: &StageNode, region: &Region) -> Result<Vec<Option<i64>>, ScheduleError> {
        let dims = node.dims.len();
        let untiled = vec![None; dims];
        let cache = self.params.cache_bytes() as f64;
        if dims < 2 || self.footprint(node, region)?.bytes <= cache {
            return Ok(untiled);
        }

        let lanes = i64::from(self.target.lanes(node.elem.bytes()));
        let per_dim: Vec<Vec<Option<i64>>> = (0..dims.min(3))
            .map(|d| {
                let extent = region.ranges()[d].extent;
                let mut t = if d == 0 {
                    lanes.max(1)
                } else {
                    self.options.min_tile_extent.max(1)
                };
                let mut candidates = Vec::new();
                while t <= self.options.max_tile_extent && t < extent {
                    candidates.push(Some(t));
                    t *= 2;
                }
                candidates.push(None);
                candidates
            })
            .collect();

        let mut best: Option<TileCandidate> = None;
        let mut smallest: Option<TileCandidate> = None;
        for mut tiles in cartesian(&per_dim) {
            if tiles.iter().all(Option::is_none) {
                continue;
            }
            tiles.resize(dims, None);
            let extents: Vec<i64> = region
                .ranges()
                .iter()
                .zip(&tiles)
                .map(|(r, t)| t.map_or(r.extent, |t| t.min(r.extent)))
                .collect();
            let tile_region = region.with_extents(&extents);
            let fp = self.footprint(node, &tile_region)?;
            let area = tile_region.points();
            let candidate = TileCandidate {
                bytes: fp.bytes,
                halo: fp.dep_points as f64 / area.max(1) as f64,
                area,
                inner: extents.first().copied().unwrap_or(1),
                tiles,
            };
            trace!(
                stage = %node.name,
                tiles = ?candidate.tiles,
                bytes = candidate.bytes,
                halo = candidate.halo,
                "tile candidate"
            );
            if smallest.as_ref().map_or(true, |s| candidate.bytes < s.bytes) {
                smallest = Some(candidate.clone());
            }
            if candidate.bytes <= cache && best.as_ref().map_or(true, |b| candidate.better_than(b)) {
                best = Some(candidate);
            }
        }
        Ok(best.or(smallest).map_or(untiled, |c| c.tiles))
    }

    /// Fuse outer loops until there are enough iterations for every core.
    fn parallel_split(&self, nest: &LoopNest) -> Option<ParallelSplit> {
        let p = u64::from(self.params.parallelism());
        if p <= 1 || nest.loops.is_empty() {
            return None;
        }
        let last = nest.loops.len() - 1;
        let mut k = 0;
        while nest.iterations(k) < p && k + 1 < last {
            k += 1;
        }
        let trips = nest.iterations(k);
        if trips < 2 {
            return None;
        }
        let per_iteration = nest.sub_region(k).points().max(1);
        let needed = self.options.min_task_points.div_ceil(per_iteration).max(1);
        let cap = (trips / p).max(1);
        Some(ParallelSplit {
            loops: nest.loops[..=k].iter().map(|l| l.var.clone()).collect(),
            factor: needed.min(cap),
        })
    }

    fn vector_split(&self, node: &StageNode, nest: &LoopNest) -> Option<VectorSplit> {
        let inner = nest.loops.last()?;
        let lanes = self.target.lanes(node.elem.bytes());
        if inner.dim != 0 || lanes < 2 || inner.trip < i64::from(lanes) {
            return None;
        }
        Some(VectorSplit {
            loop_var: inner.var.clone(),
            factor: lanes,
        })
    }
}

fn cartesian(lists: &[Vec<Option<i64>>]) -> Vec<Vec<Option<i64>>> {
    lists.iter().fold(vec![Vec::new()], |acc, list| {
        acc.iter()
            .flat_map(|prefix| {
                list.iter().map(move |&v| {
                    let mut p = prefix.clone();
                    p.push(v);
                    p
                })
            })
            .collect()
    })
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for the schedule postconditions.
#[derive(Debug, Clone)]
pub struct ScheduleCert {
    /// Every stage has exactly one decision; schedulable stages are not inline.
    pub every_stage_decided: bool,
    /// Inlined stages carry the inline decision and nothing else.
    pub inlined_stages_undecided: bool,
    /// Attachments target effective consumers and chain to a root stage.
    pub attachments_acyclic: bool,
    /// Every referenced loop variable exists in its loop nest.
    pub loop_vars_exist: bool,
}

impl crate::pass::StageCert for ScheduleCert {
    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("every_stage_decided", self.every_stage_decided),
            ("inlined_stages_undecided", self.inlined_stages_undecided),
            ("attachments_acyclic", self.attachments_acyclic),
            ("loop_vars_exist", self.loop_vars_exist),
        ]
    }
}

pub fn verify_schedule(
    graph: &StageGraph,
    fusion: &FusionResult,
    sched: &ScheduledPipeline,
) -> ScheduleCert {
    ScheduleCert {
        every_stage_decided: verify_every_stage_decided(graph, fusion, sched),
        inlined_stages_undecided: verify_inlined_stages(graph, fusion, sched),
        attachments_acyclic: verify_attachments(graph, fusion, sched),
        loop_vars_exist: verify_loop_vars(graph, sched),
    }
}

fn verify_every_stage_decided(
    graph: &StageGraph,
    fusion: &FusionResult,
    sched: &ScheduledPipeline,
) -> bool {
    sched.decisions.len() == graph.len()
        && graph.nodes.iter().all(|node| {
            let mut found = sched.decisions.iter().filter(|d| d.stage == node.name);
            match (found.next(), found.next()) {
                (Some(d), None) => fusion.is_inlined(node.id) || !d.is_inline(),
                _ => false,
            }
        })
}

fn verify_inlined_stages(graph: &StageGraph, fusion: &FusionResult, sched: &ScheduledPipeline) -> bool {
    fusion.inlined_stages().all(|id| {
        sched.get(&graph.node(id).name).is_some_and(|d| {
            d.is_inline() && d.tiles.is_empty() && d.parallel.is_none() && d.vector.is_none()
        })
    })
}

fn verify_attachments(graph: &StageGraph, fusion: &FusionResult, sched: &ScheduledPipeline) -> bool {
    for decision in &sched.decisions {
        let mut current = decision;
        let mut steps = 0;
        while let Granularity::At { consumer, .. } = &current.granularity {
            let (Some(producer), Some(c)) = (graph.id_of(&current.stage), graph.id_of(consumer))
            else {
                return false;
            };
            if fusion.is_inlined(c) || !fusion.effective_consumers(producer).contains(&c) {
                return false;
            }
            let Some(next) = sched.get(consumer) else {
                return false;
            };
            steps += 1;
            if steps > graph.len() {
                return false;
            }
            current = next;
        }
        if !decision.is_inline() && current.granularity != Granularity::Root {
            return false;
        }
    }
    true
}

fn verify_loop_vars(graph: &StageGraph, sched: &ScheduledPipeline) -> bool {
    sched.decisions.iter().all(|d| {
        let Some(id) = graph.id_of(&d.stage) else {
            return false;
        };
        let node = graph.node(id);
        let own = loop_vars(node, d);
        let tiles_ok = d.tiles.iter().all(|t| node.dims.iter().any(|dim| dim.name == t.dim));
        let parallel_ok = d
            .parallel
            .as_ref()
            .map_or(true, |p| p.loops.iter().all(|l| own.contains(l)));
        let vector_ok = d.vector.as_ref().map_or(true, |v| own.contains(&v.loop_var));
        let attach_ok = match &d.granularity {
            Granularity::At { consumer, loop_var } => graph
                .id_of(consumer)
                .and_then(|c| sched.get(consumer).map(|cd| (c, cd)))
                .is_some_and(|(c, cd)| loop_vars(graph.node(c), cd).contains(loop_var)),
            _ => true,
        };
        tiles_ok && parallel_ok && vector_ok && attach_ok
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
