// cost.rs — Cost model for inlining and schedule search
//
// The `CostModel` trait prices arithmetic operations, loads, a call to a
// materialized stage and memory traffic for a given live footprint.
// `DefaultCostModel` is the shipped strategy: unit-cost arithmetic with
// heavier division and transcendentals, and a memory term that grows
// linearly once the footprint exceeds the last-level cache.
//
// Preconditions: none.
// Postconditions: all costs are finite and non-negative.
// Failure modes: none.
// Side effects: none.

use std::ops;

use crate::expr::{BinOp, CallKind, Expr, Intrinsic};
use crate::machine::MachineParams;

// ── Cost values ──────────────────────────────────────────────────────────

/// Per-element evaluation cost of an expression: arithmetic in operation
/// units plus the number of loads from materialized storage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OpCost {
    pub arith: f64,
    pub loads: f64,
}

impl OpCost {
    pub const ZERO: OpCost = OpCost {
        arith: 0.0,
        loads: 0.0,
    };

    /// Arithmetic plus loads priced by `model`.
    pub fn weighted(&self, model: &dyn CostModel) -> f64 {
        self.arith + self.loads * model.load_cost()
    }
}

impl ops::Add for OpCost {
    type Output = OpCost;
    fn add(self, rhs: OpCost) -> OpCost {
        OpCost {
            arith: self.arith + rhs.arith,
            loads: self.loads + rhs.loads,
        }
    }
}

/// Cost of a scheduling candidate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cost {
    pub arith: f64,
    pub memory: f64,
}

impl Cost {
    pub fn total(&self) -> f64 {
        self.arith + self.memory
    }
}

impl ops::Add for Cost {
    type Output = Cost;
    fn add(self, rhs: Cost) -> Cost {
        Cost {
            arith: self.arith + rhs.arith,
            memory: self.memory + rhs.memory,
        }
    }
}

/// Operation kinds the model prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Binary(BinOp),
    Neg,
    Intrinsic(Intrinsic),
}

// ── Model trait ──────────────────────────────────────────────────────────

pub trait CostModel {
    fn name(&self) -> &'static str;

    /// Arithmetic cost of one operation.
    fn op_cost(&self, op: OpKind) -> f64;

    /// Cost of one load from materialized storage.
    fn load_cost(&self) -> f64 {
        1.0
    }

    /// Per-element cost of reading a materialized stage of `dims` dimensions:
    /// one load plus the address arithmetic of the extra dimensions.
    fn call_cost(&self, dims: usize) -> f64 {
        self.load_cost() + dims.saturating_sub(1) as f64
    }

    /// Cost of `accesses` memory accesses while `footprint_bytes` are live.
    fn memory_cost(&self, accesses: f64, footprint_bytes: f64) -> f64;
}

/// Shipped cost model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultCostModel {
    cache_bytes: f64,
    balance: f64,
}

impl DefaultCostModel {
    pub fn new(params: &MachineParams) -> Self {
        DefaultCostModel {
            cache_bytes: params.cache_bytes() as f64,
            balance: f64::from(params.balance()),
        }
    }

    /// `1 + balance × (footprint − cache) / cache` once the footprint
    /// exceeds the cache, 1 otherwise.
    pub fn overflow_factor(&self, footprint_bytes: f64) -> f64 {
        if footprint_bytes <= self.cache_bytes {
            1.0
        } else {
            1.0 + self.balance * (footprint_bytes - self.cache_bytes) / self.cache_bytes
        }
    }
}

impl CostModel for DefaultCostModel {
    fn name(&self) -> &'static str {
        "default"
    }

    fn op_cost(&self, op: OpKind) -> f64 {
        match op {
            OpKind::Binary(BinOp::Div | BinOp::Mod) => 2.0,
            OpKind::Binary(_) | OpKind::Neg => 1.0,
            OpKind::Intrinsic(Intrinsic::Select | Intrinsic::Abs) => 1.0,
            OpKind::Intrinsic(Intrinsic::Floor | Intrinsic::Ceil) => 1.0,
            OpKind::Intrinsic(Intrinsic::Sqrt) => 4.0,
            OpKind::Intrinsic(
                Intrinsic::Exp | Intrinsic::Log | Intrinsic::Pow | Intrinsic::Sin | Intrinsic::Cos,
            ) => 8.0,
        }
    }

    fn memory_cost(&self, accesses: f64, footprint_bytes: f64) -> f64 {
        accesses * self.overflow_factor(footprint_bytes)
    }
}

// ── Expression costing ───────────────────────────────────────────────────

/// Per-element cost of `expr`. `callee` returns the expanded cost of an
/// inlined stage; any call it declines is priced as one load.
pub fn expr_cost(
    model: &dyn CostModel,
    expr: &Expr,
    callee: &dyn Fn(CallKind, &str) -> Option<OpCost>,
) -> OpCost {
    match expr {
        Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => OpCost::ZERO,
        Expr::Neg(e) => {
            expr_cost(model, e, callee)
                + OpCost {
                    arith: model.op_cost(OpKind::Neg),
                    loads: 0.0,
                }
        }
        Expr::Binary(op, a, b) => {
            expr_cost(model, a, callee)
                + expr_cost(model, b, callee)
                + OpCost {
                    arith: model.op_cost(OpKind::Binary(*op)),
                    loads: 0.0,
                }
        }
        Expr::Intrinsic(i, args) => {
            let own = OpCost {
                arith: model.op_cost(OpKind::Intrinsic(*i)),
                loads: 0.0,
            };
            args.iter()
                .fold(own, |acc, a| acc + expr_cost(model, a, callee))
        }
        Expr::Call { kind, name, args } => {
            let body = callee(*kind, name).unwrap_or(OpCost {
                arith: 0.0,
                loads: 1.0,
            });
            args.iter()
                .fold(body, |acc, a| acc + expr_cost(model, a, callee))
        }
    }
}
