// bounds.rs — Bounds propagation
//
// Computes, for every stage, a box that over-approximates every region the
// pipeline will ever require of it, starting from the output estimates and
// walking consumers before producers. Also exposes the projection of a
// consumer sub-region onto its callees, which the schedule search reuses for
// per-tile and per-iteration footprints.
//
// Preconditions: `graph` was built by `build_graph` (outputs carry estimates,
//   every non-output stage has a consumer).
// Postconditions: every stage region contains the union of all projections
//   from its consumers; regions are monotone in the output estimates.
// Failure modes: an index the interval oracle cannot bound on a dimension
//   without a declared domain → `ScheduleError::UnboundedRegion`.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::{GraphError, ScheduleError};
use crate::expr::{CallKind, Expr, VarEnv};
use crate::graph::{Call, Callee, DefRef, StageGraph, StageNode};
use crate::id::StageId;
use crate::region::{Interval, Range, Region};
use crate::stage::Definition;

// ── Public types ────────────────────────────────────────────────────────────

/// Per-stage (and per-input) estimated regions.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundsEstimate {
    regions: Vec<Region>,
    inputs: Vec<Option<Region>>,
    names: Vec<String>,
    input_names: Vec<String>,
    order: Vec<StageId>,
}

impl BoundsEstimate {
    pub fn region(&self, id: StageId) -> &Region {
        &self.regions[id.index()]
    }

    /// Region read from input `index`, if any stage reads it.
    pub fn input_region(&self, index: usize) -> Option<&Region> {
        self.inputs.get(index).and_then(Option::as_ref)
    }
}

/// Stages in realization order, then inputs.
impl fmt::Display for BoundsEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &id in &self.order {
            writeln!(f, "{}: {}", self.names[id.index()], self.regions[id.index()])?;
        }
        for (name, region) in self.input_names.iter().zip(&self.inputs) {
            if let Some(region) = region {
                writeln!(f, "{name} (input): {region}")?;
            }
        }
        Ok(())
    }
}

// ── Propagation ─────────────────────────────────────────────────────────────

/// Propagate output estimates to every stage and input.
pub fn propagate_bounds(graph: &StageGraph) -> Result<BoundsEstimate, ScheduleError> {
    let n = graph.len();
    let mut demand: Vec<Option<Region>> = vec![None; n];
    let mut input_demand: Vec<Option<Region>> = vec![None; graph.inputs.len()];
    let mut regions: Vec<Region> = vec![Region::default(); n];

    for &id in graph.order.iter().rev() {
        let node = graph.node(id);
        let mut region = demand[id.index()].take();
        if node.is_output {
            let estimate = estimate_region(node)?;
            region = Some(match region {
                Some(r) => r.union(&estimate),
                None => estimate,
            });
        }
        let Some(mut region) = region else {
            return Err(GraphError::Dangling {
                stage: node.name.clone(),
            }
            .into());
        };
        widen_by_updates(node, &mut region)?;

        let required = required_regions(graph, node, &node.calls, &region, true)?;
        for (callee, r) in required {
            let slot = match callee {
                Callee::Stage(p) => &mut demand[p.index()],
                Callee::Input(i) => &mut input_demand[i],
            };
            *slot = Some(match slot.take() {
                Some(prev) => prev.union(&r),
                None => r,
            });
        }
        debug!(stage = %node.name, region = %region, "bounds");
        regions[id.index()] = region;
    }

    Ok(BoundsEstimate {
        regions,
        inputs: input_demand,
        names: graph.nodes.iter().map(|n| n.name.clone()).collect(),
        input_names: graph.inputs.iter().map(|i| i.name.clone()).collect(),
        order: graph.order.clone(),
    })
}

fn estimate_region(node: &StageNode) -> Result<Region, ScheduleError> {
    node.dims
        .iter()
        .map(|d| {
            d.estimate.ok_or_else(|| ScheduleError::MissingEstimate {
                stage: node.name.clone(),
                dim: d.name.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Region::new)
}

/// Variables of `def` bound to `region` (pure variables) and to their
/// reduction ranges (reduction variables).
pub fn def_env(node: &StageNode, def: &Definition, region: &Region) -> VarEnv {
    let mut env: VarEnv = node
        .dims
        .iter()
        .zip(region.ranges())
        .map(|(d, r)| (d.name.clone(), Interval::from_range(*r)))
        .collect();
    for rvar in &def.rvars {
        env.insert(rvar.name.clone(), Interval::from_range(rvar.range));
    }
    env
}

/// Update definitions write (and recursively read) their own stage at the
/// points their left-hand side and self-reads name; widen the region to
/// cover them.
fn widen_by_updates(node: &StageNode, region: &mut Region) -> Result<(), ScheduleError> {
    if node.updates.is_empty() {
        return Ok(());
    }
    let base = region.clone();
    for def in &node.updates {
        let env = def_env(node, def, &base);
        let mut touched: Vec<&[Expr]> = vec![def.args.as_slice()];
        def.value.visit_calls(&mut |kind, name, args| {
            if kind == CallKind::Stage && name == node.name {
                touched.push(args);
            }
        });
        for args in touched {
            let fallback: Vec<Option<Range>> = node.dims.iter().map(|d| d.domain).collect();
            let names: Vec<&str> = node.dim_names();
            let written = project_args(args, &env, &fallback, &node.name, &names)?;
            *region = region.union(&written);
        }
    }
    Ok(())
}

/// Region required of every callee in `calls` when `node` computes `region`.
/// Update calls are included only when `include_updates` is set.
pub fn required_regions(
    graph: &StageGraph,
    node: &StageNode,
    calls: &[Call],
    region: &Region,
    include_updates: bool,
) -> Result<BTreeMap<Callee, Region>, ScheduleError> {
    let mut envs: BTreeMap<DefRef, VarEnv> = BTreeMap::new();
    let mut out: BTreeMap<Callee, Region> = BTreeMap::new();

    for call in calls {
        if !include_updates && call.def != DefRef::Pure {
            continue;
        }
        if !envs.contains_key(&call.def) {
            let def = node.def(call.def).ok_or_else(|| {
                ScheduleError::Internal(format!(
                    "stage '{}' has no definition {}",
                    node.name, call.def
                ))
            })?;
            envs.insert(call.def, def_env(node, def, region));
        }
        let env = &envs[&call.def];
        let required = project_call(graph, call, env)?;
        match out.get_mut(&call.callee) {
            Some(prev) => *prev = prev.union(&required),
            None => {
                out.insert(call.callee, required);
            }
        }
    }
    Ok(out)
}

fn project_call(graph: &StageGraph, call: &Call, env: &VarEnv) -> Result<Region, ScheduleError> {
    let (fallback, names): (Vec<Option<Range>>, Vec<&str>) = match call.callee {
        Callee::Stage(id) => {
            let producer = graph.node(id);
            (
                producer.dims.iter().map(|d| d.domain).collect(),
                producer.dim_names(),
            )
        }
        Callee::Input(i) => {
            let input = &graph.inputs[i];
            (
                input.domain.iter().copied().map(Some).collect(),
                input.dims.iter().map(String::as_str).collect(),
            )
        }
    };
    project_args(&call.args, env, &fallback, graph.callee_name(call.callee), &names)
}

/// Interval oracle per index, then the declared domain, then failure.
fn project_args(
    args: &[Expr],
    env: &VarEnv,
    fallback: &[Option<Range>],
    callee: &str,
    dims: &[&str],
) -> Result<Region, ScheduleError> {
    args.iter()
        .enumerate()
        .map(|(d, arg)| {
            arg.interval(env)
                .to_range()
                .or_else(|| fallback.get(d).copied().flatten())
                .ok_or_else(|| ScheduleError::UnboundedRegion {
                    stage: callee.to_string(),
                    dim: dims.get(d).map_or_else(|| d.to_string(), |s| s.to_string()),
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Region::new)
}

// ── Tests ───────────────────────────────────────────────────────────────────
