// graph.rs — Stage graph construction
//
// Builds the producer/consumer graph of a pipeline: one node per stage
// (arena indexed by `StageId`, declaration order), one call edge per
// consumer → producer pair carrying every access with its per-dimension
// classification, and a realization order with producers first.
//
// Preconditions: `pipeline` stage and input names are unique.
// Postconditions: the graph is acyclic; recursive update references are a
//   node flag, never a self-edge; every non-output stage has a consumer;
//   `order` lists producers before consumers, ties broken by declaration order.
// Failure modes: missing output estimate → `ScheduleError::MissingEstimate`;
//   cycles, dangling stages, unknown outputs or callees → `GraphError`.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use crate::ast::Span;
use crate::error::{GraphError, ScheduleError};
use crate::expr::{CallKind, DimAccess, Expr};
use crate::id::{EdgeId, IdAllocator, StageId};
use crate::stage::{Definition, Dim, ElemType, InputBuffer, Pipeline, Stage};

// ── Public types ────────────────────────────────────────────────────────────

/// Which definition of a stage an access occurs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefRef {
    Pure,
    Update(usize),
}

/// What a call reads: another stage or an input buffer (by index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Callee {
    Stage(StageId),
    Input(usize),
}

/// One call site: callee, definition it occurs in, index expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub callee: Callee,
    pub def: DefRef,
    pub args: Vec<Expr>,
}

/// One access of a producer by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub def: DefRef,
    pub args: Vec<Expr>,
    pub pattern: Vec<DimAccess>,
}

/// "Consumer reads producer", with every access.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEdge {
    pub id: EdgeId,
    pub consumer: StageId,
    pub producer: StageId,
    pub accesses: Vec<Access>,
}

impl CallEdge {
    pub fn pure_only(&self) -> bool {
        self.accesses.iter().all(|a| a.def == DefRef::Pure)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageNode {
    pub id: StageId,
    pub name: String,
    pub dims: Vec<Dim>,
    pub elem: ElemType,
    pub pure: Definition,
    pub updates: Vec<Definition>,
    pub is_output: bool,
    /// An update definition reads the stage itself.
    pub recursive: bool,
    pub span: Span,
    /// Every call site except reads of the stage itself, in definition order.
    pub calls: Vec<Call>,
}

impl StageNode {
    pub fn def(&self, def: DefRef) -> Option<&Definition> {
        match def {
            DefRef::Pure => Some(&self.pure),
            DefRef::Update(i) => self.updates.get(i),
        }
    }

    pub fn dim_names(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name.as_str()).collect()
    }

    /// Fusion and inlining never touch outputs, updates or recursion.
    pub fn can_inline(&self) -> bool {
        !self.is_output && self.updates.is_empty() && !self.recursive
    }
}

/// Immutable per-run dependency graph.
#[derive(Debug, Clone)]
pub struct StageGraph {
    pub nodes: Vec<StageNode>,
    pub edges: Vec<CallEdge>,
    pub inputs: Vec<InputBuffer>,
    /// Realization order: producers before consumers.
    pub order: Vec<StageId>,
    /// Output stages in declaration order.
    pub outputs: Vec<StageId>,
    by_name: HashMap<String, StageId>,
}

impl StageGraph {
    pub fn node(&self, id: StageId) -> &StageNode {
        &self.nodes[id.index()]
    }

    pub fn id_of(&self, name: &str) -> Option<StageId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Edges whose consumer is `id`.
    pub fn producers_of(&self, id: StageId) -> impl Iterator<Item = &CallEdge> {
        self.edges.iter().filter(move |e| e.consumer == id)
    }

    /// Edges whose producer is `id`.
    pub fn consumers_of(&self, id: StageId) -> impl Iterator<Item = &CallEdge> {
        self.edges.iter().filter(move |e| e.producer == id)
    }

    /// Name of a callee (stage or input).
    pub fn callee_name(&self, callee: Callee) -> &str {
        match callee {
            Callee::Stage(id) => &self.node(id).name,
            Callee::Input(i) => &self.inputs[i].name,
        }
    }

    /// Element size of a callee in bytes.
    pub fn callee_bytes(&self, callee: Callee) -> u32 {
        match callee {
            Callee::Stage(id) => self.node(id).elem.bytes(),
            Callee::Input(i) => self.inputs[i].elem.bytes(),
        }
    }
}

// ── Estimate check ──────────────────────────────────────────────────────────

/// Every declared output must carry an estimate on every dimension. Runs
/// before any other scheduling work.
pub fn check_estimates_on_outputs(pipeline: &Pipeline) -> Result<(), ScheduleError> {
    for name in &pipeline.outputs {
        let Some(stage) = pipeline.find_stage(name) else {
            continue;
        };
        if let Some(dim) = stage.dims.iter().find(|d| d.estimate.is_none()) {
            return Err(ScheduleError::MissingEstimate {
                stage: stage.name.clone(),
                dim: dim.name.clone(),
            });
        }
    }
    Ok(())
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Build the stage graph of `pipeline`.
pub fn build_graph(pipeline: &Pipeline) -> Result<StageGraph, ScheduleError> {
    check_estimates_on_outputs(pipeline)?;

    let mut builder = GraphBuilder::new(pipeline)?;
    builder.collect_calls()?;
    builder.build_edges();
    let order = builder.realization_order()?;
    builder.check_dangling()?;

    let GraphBuilder {
        nodes,
        edges,
        by_name,
        ..
    } = builder;
    let outputs = nodes.iter().filter(|n| n.is_output).map(|n| n.id).collect();
    debug!(
        stages = nodes.len(),
        edges = edges.len(),
        inputs = pipeline.inputs.len(),
        "stage graph built"
    );
    Ok(StageGraph {
        nodes,
        edges,
        inputs: pipeline.inputs.clone(),
        order,
        outputs,
        by_name,
    })
}

/// Tiling dimension `d` introduces loops `d_o` and `d_i`; no other
/// dimension of the stage may carry either name.
fn check_loop_names(stage: &Stage) -> Result<(), GraphError> {
    for tiled in &stage.dims {
        for suffix in ["_o", "_i"] {
            let loop_var = format!("{}{suffix}", tiled.name);
            if let Some(dim) = stage.dims.iter().find(|d| d.name == loop_var) {
                return Err(GraphError::LoopNameClash {
                    stage: stage.name.clone(),
                    dim: dim.name.clone(),
                    tiled: tiled.name.clone(),
                });
            }
        }
    }
    Ok(())
}

struct GraphBuilder<'a> {
    pipeline: &'a Pipeline,
    nodes: Vec<StageNode>,
    edges: Vec<CallEdge>,
    by_name: HashMap<String, StageId>,
    inputs_by_name: HashMap<&'a str, usize>,
    ids: IdAllocator,
}

impl<'a> GraphBuilder<'a> {
    fn new(pipeline: &'a Pipeline) -> Result<Self, ScheduleError> {
        let mut ids = IdAllocator::new();
        let mut by_name = HashMap::new();
        let mut inputs_by_name = HashMap::new();
        let mut nodes = Vec::with_capacity(pipeline.stages.len());

        for (i, input) in pipeline.inputs.iter().enumerate() {
            if inputs_by_name.insert(input.name.as_str(), i).is_some() {
                return Err(GraphError::Duplicate {
                    name: input.name.clone(),
                }
                .into());
            }
        }
        for stage in &pipeline.stages {
            if inputs_by_name.contains_key(stage.name.as_str())
                || by_name.contains_key(&stage.name)
            {
                return Err(GraphError::Duplicate {
                    name: stage.name.clone(),
                }
                .into());
            }
            check_loop_names(stage)?;
            let id = ids.alloc_stage();
            by_name.insert(stage.name.clone(), id);
            nodes.push(StageNode {
                id,
                name: stage.name.clone(),
                dims: stage.dims.clone(),
                elem: stage.elem,
                pure: stage.pure.clone(),
                updates: stage.updates.clone(),
                is_output: pipeline.is_output(&stage.name),
                recursive: false,
                span: stage.span,
                calls: Vec::new(),
            });
        }

        if pipeline.outputs.is_empty() {
            return Err(GraphError::NoOutputs.into());
        }
        for name in &pipeline.outputs {
            if !by_name.contains_key(name) {
                return Err(GraphError::UnknownOutput { name: name.clone() }.into());
            }
        }

        Ok(GraphBuilder {
            pipeline,
            nodes,
            edges: Vec::new(),
            by_name,
            inputs_by_name,
            ids,
        })
    }

    /// Resolve every call site of every definition.
    fn collect_calls(&mut self) -> Result<(), ScheduleError> {
        for idx in 0..self.nodes.len() {
            let node = &self.nodes[idx];
            let mut sites: Vec<(DefRef, CallKind, String, Vec<Expr>)> = Vec::new();
            node.pure.value.visit_calls(&mut |kind, name, args| {
                sites.push((DefRef::Pure, kind, name.to_string(), args.to_vec()));
            });
            for (u, update) in node.updates.iter().enumerate() {
                let mut visit = |kind: CallKind, name: &str, args: &[Expr]| {
                    sites.push((DefRef::Update(u), kind, name.to_string(), args.to_vec()));
                };
                for arg in &update.args {
                    arg.visit_calls(&mut visit);
                }
                update.value.visit_calls(&mut visit);
            }

            let self_id = node.id;
            let consumer = node.name.clone();
            let mut calls = Vec::with_capacity(sites.len());
            let mut recursive = false;
            for (def, kind, name, args) in sites {
                let callee = self.resolve_callee(&consumer, kind, &name)?;
                let expected = match callee {
                    Callee::Stage(id) => self.nodes[id.index()].dims.len(),
                    Callee::Input(i) => self.pipeline.inputs[i].dims.len(),
                };
                if expected != args.len() {
                    return Err(GraphError::Arity {
                        consumer,
                        callee: name,
                        expected,
                        found: args.len(),
                    }
                    .into());
                }
                if callee == Callee::Stage(self_id) {
                    if def == DefRef::Pure {
                        return Err(GraphError::Cycle {
                            stages: vec![consumer.clone(), consumer],
                        }
                        .into());
                    }
                    recursive = true;
                    continue;
                }
                calls.push(Call { callee, def, args });
            }
            let node = &mut self.nodes[idx];
            node.calls = calls;
            node.recursive = recursive;
        }
        Ok(())
    }

    fn resolve_callee(
        &self,
        consumer: &str,
        kind: CallKind,
        name: &str,
    ) -> Result<Callee, ScheduleError> {
        let stage = self.by_name.get(name).map(|&id| Callee::Stage(id));
        let input = self.inputs_by_name.get(name).map(|&i| Callee::Input(i));
        let found = match kind {
            CallKind::Stage => stage.or(input),
            CallKind::Input => input.or(stage),
        };
        found.ok_or_else(|| {
            GraphError::UnknownCallee {
                consumer: consumer.to_string(),
                callee: name.to_string(),
            }
            .into()
        })
    }

    /// Group stage calls into one edge per (consumer, producer), producers in
    /// first-access order.
    fn build_edges(&mut self) {
        for node in &self.nodes {
            let mut per_producer: Vec<(StageId, Vec<Access>)> = Vec::new();
            for call in &node.calls {
                let Callee::Stage(producer) = call.callee else {
                    continue;
                };
                let pattern = call
                    .args
                    .iter()
                    .enumerate()
                    .map(|(d, arg)| arg.classify_access(node.dims.get(d).map(|dim| dim.name.as_str())))
                    .collect();
                let access = Access {
                    def: call.def,
                    args: call.args.clone(),
                    pattern,
                };
                match per_producer.iter_mut().find(|(p, _)| *p == producer) {
                    Some((_, accesses)) => accesses.push(access),
                    None => per_producer.push((producer, vec![access])),
                }
            }
            for (producer, accesses) in per_producer {
                self.edges.push(CallEdge {
                    id: self.ids.alloc_edge(),
                    consumer: node.id,
                    producer,
                    accesses,
                });
            }
        }
    }

    /// Kahn's algorithm; the ready set is ordered by `StageId` so ties follow
    /// declaration order.
    fn realization_order(&self) -> Result<Vec<StageId>, ScheduleError> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        let mut consumers: Vec<Vec<StageId>> = vec![Vec::new(); n];
        for edge in &self.edges {
            indegree[edge.consumer.index()] += 1;
            consumers[edge.producer.index()].push(edge.consumer);
        }

        let mut ready: BTreeSet<StageId> = self
            .nodes
            .iter()
            .filter(|node| indegree[node.id.index()] == 0)
            .map(|node| node.id)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &c in &consumers[id.index()] {
                indegree[c.index()] -= 1;
                if indegree[c.index()] == 0 {
                    ready.insert(c);
                }
            }
        }

        if order.len() < n {
            let cycle = self.find_cycle(&indegree, &consumers);
            return Err(GraphError::Cycle {
                stages: cycle
                    .iter()
                    .map(|id| self.nodes[id.index()].name.clone())
                    .collect(),
            }
            .into());
        }
        Ok(order)
    }

    /// Name one cycle among the nodes Kahn could not order. The first node
    /// is repeated at the end.
    fn find_cycle(&self, indegree: &[usize], consumers: &[Vec<StageId>]) -> Vec<StageId> {
        let mut visited = vec![0u8; self.nodes.len()]; // 0 = unvisited, 1 = in progress, 2 = done
        let mut path = Vec::new();
        for node in &self.nodes {
            if indegree[node.id.index()] > 0 && visited[node.id.index()] == 0 {
                if let Some(mut cycle) = dfs_cycle(node.id, consumers, &mut visited, &mut path) {
                    cycle.push(cycle[0]);
                    return cycle;
                }
            }
        }
        Vec::new()
    }

    fn check_dangling(&self) -> Result<(), ScheduleError> {
        let mut has_consumer = vec![false; self.nodes.len()];
        for edge in &self.edges {
            has_consumer[edge.producer.index()] = true;
        }
        match self
            .nodes
            .iter()
            .find(|n| !n.is_output && !has_consumer[n.id.index()])
        {
            Some(node) => Err(GraphError::Dangling {
                stage: node.name.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }
}

fn dfs_cycle(
    node: StageId,
    adj: &[Vec<StageId>],
    visited: &mut [u8],
    path: &mut Vec<StageId>,
) -> Option<Vec<StageId>> {
    visited[node.index()] = 1;
    path.push(node);

    for &next in &adj[node.index()] {
        match visited[next.index()] {
            0 => {
                if let Some(cycle) = dfs_cycle(next, adj, visited, path) {
                    return Some(cycle);
                }
            }
            1 => {
                if let Some(pos) = path.iter().position(|&n| n == next) {
                    return Some(path[pos..].to_vec());
                }
            }
            _ => {}
        }
    }

    path.pop();
    visited[node.index()] = 2;
    None
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for DimAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DimAccess::Identity => "identity",
            DimAccess::Affine => "affine",
            DimAccess::NonAffine => "non-affine",
        })
    }
}

impl fmt::Display for DefRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefRef::Pure => write!(f, "pure"),
            DefRef::Update(i) => write!(f, "update {i}"),
        }
    }
}

/// One block per stage in realization order, listing its reads.
impl fmt::Display for StageGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &id in &self.order {
            let node = self.node(id);
            write!(f, "{}({}): {}", node.name, node.dim_names().join(", "), node.elem)?;
            if node.is_output {
                write!(f, " output")?;
            }
            if node.recursive {
                write!(f, " recursive")?;
            }
            writeln!(f)?;
            for call in &node.calls {
                let pattern: Vec<String> = call
                    .args
                    .iter()
                    .enumerate()
                    .map(|(d, a)| {
                        a.classify_access(node.dims.get(d).map(|dim| dim.name.as_str()))
                            .to_string()
                    })
                    .collect();
                let args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
                writeln!(
                    f,
                    "  {} <- {}({}) [{}]",
                    call.def,
                    self.callee_name(call.callee),
                    args.join(", "),
                    pattern.join(", ")
                )?;
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
