// inline.rs — Fusion analysis (inlining)
//
// Decides which stages are computed inline in their consumers instead of
// being materialized. Two rules, applied in this order in rounds until a
// round inlines nothing:
//
//   1. trivial: the stage's per-element cost (with inlined callees expanded)
//      is no higher than reading a materialized stage of the same rank;
//   2. element-wise: the stage has exactly one effective consumer, which reads
//      it only from its pure definition and only through identity accesses.
//
// Outputs, stages with update definitions and recursive stages are never
// inlined. Inlining is recorded in the result; the graph itself is immutable.
// Consumers of an inlined stage read through to its dependencies: their
// effective calls substitute the call arguments into the inlined definition.
//
// Preconditions: `graph` was built by `build_graph`.
// Postconditions: every inlined stage passed `can_inline`; effective calls
//   never name an inlined stage.
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::config::SchedulerOptions;
use crate::cost::{expr_cost, CostModel, OpCost};
use crate::expr::{CallKind, DimAccess, Expr};
use crate::graph::{Call, Callee, DefRef, StageGraph};
use crate::id::StageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineRule {
    Trivial,
    ElementWise,
}

impl InlineRule {
    pub fn name(self) -> &'static str {
        match self {
            InlineRule::Trivial => "trivial",
            InlineRule::ElementWise => "element-wise",
        }
    }
}

/// Outcome of fusion analysis, indexed by `StageId`.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionResult {
    inlined: Vec<Option<InlineRule>>,
    calls: Vec<Vec<Call>>,
    costs: Vec<OpCost>,
    changed: bool,
}

impl FusionResult {
    pub fn is_inlined(&self, id: StageId) -> bool {
        self.inlined[id.index()].is_some()
    }

    pub fn rule(&self, id: StageId) -> Option<InlineRule> {
        self.inlined[id.index()]
    }

    /// Whether any stage was inlined.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Calls of `id` with inlined callees expanded away.
    pub fn effective_calls(&self, id: StageId) -> &[Call] {
        &self.calls[id.index()]
    }

    /// Per-element cost of the pure definition with inlined callees expanded.
    pub fn cost(&self, id: StageId) -> OpCost {
        self.costs[id.index()]
    }

    /// Per-element cost of an arbitrary expression of the graph (e.g. an
    /// update value) with inlined callees expanded.
    pub fn expanded_cost(&self, graph: &StageGraph, model: &dyn CostModel, expr: &Expr) -> OpCost {
        expr_cost(model, expr, &|_: CallKind, name: &str| {
            let p = graph.id_of(name)?;
            self.inlined[p.index()].map(|_| self.costs[p.index()])
        })
    }

    /// Non-inlined stages whose effective calls read `id`, in `StageId` order.
    pub fn effective_consumers(&self, id: StageId) -> Vec<StageId> {
        let mut out: Vec<StageId> = self
            .calls
            .iter()
            .enumerate()
            .filter(|(c, calls)| {
                self.inlined[*c].is_none()
                    && calls.iter().any(|call| call.callee == Callee::Stage(id))
            })
            .map(|(c, _)| StageId(c as u32))
            .collect();
        out.dedup();
        out
    }

    /// Whether `consumer` reads `producer` only from its pure definition.
    pub fn reads_only_pure(&self, consumer: StageId, producer: StageId) -> bool {
        self.effective_calls(consumer)
            .iter()
            .filter(|c| c.callee == Callee::Stage(producer))
            .all(|c| c.def == DefRef::Pure)
    }

    pub fn inlined_stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.inlined
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .map(|(i, _)| StageId(i as u32))
    }

    /// One line per stage in realization order: the rule that inlined it or
    /// its expanded per-element cost.
    pub fn report(&self, graph: &StageGraph) -> String {
        let mut out = String::new();
        for &id in &graph.order {
            let node = graph.node(id);
            let _ = match self.rule(id) {
                Some(rule) => writeln!(out, "{}: inline ({})", node.name, rule.name()),
                None => {
                    let c = self.cost(id);
                    writeln!(out, "{}: arith {}, loads {}", node.name, c.arith, c.loads)
                }
            };
        }
        out
    }
}

// ── Analysis ────────────────────────────────────────────────────────────────

/// Run both inlining rules to a fixed point.
pub fn analyze_fusion(
    graph: &StageGraph,
    model: &dyn CostModel,
    options: &SchedulerOptions,
) -> FusionResult {
    let mut inlined: Vec<Option<InlineRule>> = vec![None; graph.len()];
    let mut changed = false;
    loop {
        let mut round = false;
        if options.inline_trivial {
            round |= apply_rule(graph, model, &mut inlined, InlineRule::Trivial);
        }
        if options.inline_element_wise {
            round |= apply_rule(graph, model, &mut inlined, InlineRule::ElementWise);
        }
        if !round {
            break;
        }
        changed = true;
    }

    let Expansion { calls, costs } = expand(graph, model, &inlined);
    FusionResult {
        inlined,
        calls,
        costs,
        changed,
    }
}

/// One pass of `rule` over the graph in realization order.
fn apply_rule(
    graph: &StageGraph,
    model: &dyn CostModel,
    inlined: &mut [Option<InlineRule>],
    rule: InlineRule,
) -> bool {
    let mut any = false;
    let mut exp = expand(graph, model, inlined);
    for &id in &graph.order {
        let node = graph.node(id);
        if inlined[id.index()].is_some() || !node.can_inline() {
            continue;
        }
        let fires = match rule {
            InlineRule::Trivial => {
                exp.costs[id.index()].weighted(model) <= model.call_cost(node.dims.len())
            }
            InlineRule::ElementWise => element_wise_consumer(graph, &exp, inlined, id).is_some(),
        };
        if fires {
            debug!(stage = %node.name, rule = rule.name(), "inlined");
            inlined[id.index()] = Some(rule);
            any = true;
            exp = expand(graph, model, inlined);
        }
    }
    any
}

/// The single consumer that reads `producer` element-wise, if there is one.
fn element_wise_consumer(
    graph: &StageGraph,
    exp: &Expansion,
    inlined: &[Option<InlineRule>],
    producer: StageId,
) -> Option<StageId> {
    let mut consumer = None;
    for &c in &graph.order {
        if inlined[c.index()].is_some() {
            continue;
        }
        let cnode = graph.node(c);
        for call in exp.calls[c.index()]
            .iter()
            .filter(|call| call.callee == Callee::Stage(producer))
        {
            match consumer {
                None => consumer = Some(c),
                Some(prev) if prev != c => return None,
                Some(_) => {}
            }
            if call.def != DefRef::Pure {
                return None;
            }
            let identity = call.args.iter().enumerate().all(|(d, arg)| {
                arg.classify_access(cnode.dims.get(d).map(|dim| dim.name.as_str()))
                    == DimAccess::Identity
            });
            if !identity {
                return None;
            }
        }
    }
    consumer
}

struct Expansion {
    calls: Vec<Vec<Call>>,
    costs: Vec<OpCost>,
}

/// Effective calls and expanded costs under the current inlining set.
/// Producers come first in realization order, so an inlined callee is
/// always expanded before its consumers.
fn expand(graph: &StageGraph, model: &dyn CostModel, inlined: &[Option<InlineRule>]) -> Expansion {
    let n = graph.len();
    let mut calls: Vec<Vec<Call>> = vec![Vec::new(); n];
    let mut costs = vec![OpCost::ZERO; n];

    for &id in &graph.order {
        let node = graph.node(id);
        let mut effective = Vec::with_capacity(node.calls.len());
        for call in &node.calls {
            match call.callee {
                Callee::Stage(p) if inlined[p.index()].is_some() => {
                    let producer = graph.node(p);
                    let bindings: HashMap<String, Expr> = producer
                        .dims
                        .iter()
                        .map(|d| d.name.clone())
                        .zip(call.args.iter().cloned())
                        .collect();
                    for inner in &calls[p.index()] {
                        effective.push(Call {
                            callee: inner.callee,
                            def: call.def,
                            args: inner.args.iter().map(|a| a.substitute(&bindings)).collect(),
                        });
                    }
                }
                _ => effective.push(call.clone()),
            }
        }

        let cost = expr_cost(model, &node.pure.value, &|_: CallKind, name: &str| {
            let p = graph.id_of(name)?;
            inlined[p.index()].map(|_| costs[p.index()])
        });
        calls[id.index()] = effective;
        costs[id.index()] = cost;
    }
    Expansion { calls, costs }
}

// ── Tests ───────────────────────────────────────────────────────────────────
