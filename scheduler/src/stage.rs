// stage.rs — Stage and pipeline model
//
// A pipeline is a set of input buffers plus stages in declaration order.
// Each stage has ordered dimensions (innermost first), one pure definition,
// zero or more update definitions and an element type. Outputs carry
// per-dimension estimates. The scheduler attaches its decision to each stage
// after a successful run.
//
// Preconditions: none (data model plus builders).
// Postconditions: builder methods keep declaration order.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::{synthetic_span, Span};
use crate::expr::Expr;
use crate::region::Range;
use crate::schedule::StageDecision;

// ── Element type ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElemType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    #[default]
    F32,
    F64,
}

impl ElemType {
    pub fn bytes(self) -> u32 {
        match self {
            ElemType::U8 | ElemType::I8 => 1,
            ElemType::U16 | ElemType::I16 => 2,
            ElemType::U32 | ElemType::I32 | ElemType::F32 => 4,
            ElemType::F64 => 8,
        }
    }

    pub fn from_name(name: &str) -> Option<ElemType> {
        Some(match name {
            "u8" => ElemType::U8,
            "u16" => ElemType::U16,
            "u32" => ElemType::U32,
            "i8" => ElemType::I8,
            "i16" => ElemType::I16,
            "i32" => ElemType::I32,
            "f32" => ElemType::F32,
            "f64" => ElemType::F64,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ElemType::U8 => "u8",
            ElemType::U16 => "u16",
            ElemType::U32 => "u32",
            ElemType::I8 => "i8",
            ElemType::I16 => "i16",
            ElemType::I32 => "i32",
            ElemType::F32 => "f32",
            ElemType::F64 => "f64",
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Dimensions and definitions ───────────────────────────────────────────

/// One dimension of a stage. `domain` is the declared extent (if any);
/// `estimate` is set on outputs only.
#[derive(Debug, Clone, PartialEq)]
pub struct Dim {
    pub name: String,
    pub domain: Option<Range>,
    pub estimate: Option<Range>,
}

impl Dim {
    pub fn new(name: &str) -> Self {
        Dim {
            name: name.to_string(),
            domain: None,
            estimate: None,
        }
    }
}

/// A reduction variable of an update definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionVar {
    pub name: String,
    pub range: Range,
}

/// A pure or update definition: `stage(args) = value` for every point of
/// the pure domain (pure) or every point of the reduction domain (update).
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub args: Vec<Expr>,
    pub value: Expr,
    pub rvars: Vec<ReductionVar>,
    pub span: Span,
}

impl Definition {
    /// Update definition `stage(args) = value` with no reduction domain yet.
    pub fn update(args: Vec<Expr>, value: Expr) -> Self {
        Definition {
            args,
            value,
            rvars: Vec::new(),
            span: synthetic_span(),
        }
    }

    /// Add a reduction variable ranging over `range`.
    pub fn over(mut self, name: &str, range: Range) -> Self {
        self.rvars.push(ReductionVar {
            name: name.to_string(),
            range,
        });
        self
    }

    /// Number of points in the reduction domain (1 when there is none).
    pub fn reduction_points(&self) -> u64 {
        self.rvars
            .iter()
            .map(|r| r.range.extent.max(0) as u64)
            .fold(1u64, |acc, e| acc.saturating_mul(e))
    }
}

// ── Stage ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub dims: Vec<Dim>,
    pub elem: ElemType,
    pub pure: Definition,
    pub updates: Vec<Definition>,
    pub span: Span,
    /// Decision attached by the last successful scheduling run.
    pub schedule: Option<StageDecision>,
}

impl Stage {
    /// Stage `name(dims...) = value`, `f32`, no domains.
    pub fn new(name: &str, dims: &[&str], value: Expr) -> Self {
        Stage {
            name: name.to_string(),
            dims: dims.iter().map(|d| Dim::new(d)).collect(),
            elem: ElemType::default(),
            pure: Definition {
                args: dims.iter().map(|d| Expr::var(d)).collect(),
                value,
                rvars: Vec::new(),
                span: synthetic_span(),
            },
            updates: Vec::new(),
            span: synthetic_span(),
            schedule: None,
        }
    }

    pub fn with_type(mut self, elem: ElemType) -> Self {
        self.elem = elem;
        self
    }

    /// Declare the domain of dimension `dim`. Unknown names are ignored.
    pub fn with_domain(mut self, dim: &str, range: Range) -> Self {
        if let Some(d) = self.dims.iter_mut().find(|d| d.name == dim) {
            d.domain = Some(range);
        }
        self
    }

    pub fn with_update(mut self, update: Definition) -> Self {
        self.updates.push(update);
        self
    }

    pub fn dim_names(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name.as_str()).collect()
    }
}

// ── Input buffer ─────────────────────────────────────────────────────────

/// An externally supplied array. Never scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBuffer {
    pub name: String,
    pub dims: Vec<String>,
    pub domain: Vec<Range>,
    pub elem: ElemType,
    pub span: Span,
}

impl InputBuffer {
    pub fn new(name: &str, dims: &[(&str, Range)]) -> Self {
        InputBuffer {
            name: name.to_string(),
            dims: dims.iter().map(|(n, _)| n.to_string()).collect(),
            domain: dims.iter().map(|(_, r)| *r).collect(),
            elem: ElemType::default(),
            span: synthetic_span(),
        }
    }

    pub fn with_type(mut self, elem: ElemType) -> Self {
        self.elem = elem;
        self
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    pub inputs: Vec<InputBuffer>,
    pub stages: Vec<Stage>,
    /// Declared output names, in declaration order.
    pub outputs: Vec<String>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, input: InputBuffer) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Declare `name` as an output with estimates for the listed dimensions.
    /// Dimensions left out keep no estimate.
    pub fn output(mut self, name: &str, estimates: &[(&str, Range)]) -> Self {
        if !self.outputs.iter().any(|o| o == name) {
            self.outputs.push(name.to_string());
        }
        if let Some(stage) = self.stage_mut(name) {
            for (dim, range) in estimates {
                if let Some(d) = stage.dims.iter_mut().find(|d| d.name == *dim) {
                    d.estimate = Some(*range);
                }
            }
        }
        self
    }

    pub fn find_stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_mut(&mut self, name: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    pub fn find_input(&self, name: &str) -> Option<&InputBuffer> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elem_type_names_round_trip() {
        for name in ["u8", "u16", "u32", "i8", "i16", "i32", "f32", "f64"] {
            let ty = ElemType::from_name(name).expect("known type");
            assert_eq!(ty.name(), name);
        }
        assert_eq!(ElemType::from_name("f16"), None);
        assert_eq!(ElemType::default().bytes(), 4);
    }

    #[test]
    fn stage_builder_sets_pure_args() {
        let s = Stage::new("f", &["x", "y"], Expr::var("x") + Expr::var("y"))
            .with_type(ElemType::U8)
            .with_domain("y", Range::new(0, 8));
        assert_eq!(s.pure.args, vec![Expr::var("x"), Expr::var("y")]);
        assert_eq!(s.dims[1].domain, Some(Range::new(0, 8)));
        assert_eq!(s.elem.bytes(), 1);
    }

    #[test]
    fn output_sets_partial_estimates() {
        let p = Pipeline::new()
            .stage(Stage::new("f", &["x", "y"], Expr::int(0)))
            .output("f", &[("x", Range::new(0, 64))]);
        let f = p.find_stage("f").expect("stage f");
        assert!(p.is_output("f"));
        assert_eq!(f.dims[0].estimate, Some(Range::new(0, 64)));
        assert_eq!(f.dims[1].estimate, None);
        assert_eq!(p.outputs, vec!["f".to_string()]);
    }

    #[test]
    fn reduction_points_multiply() {
        let u = Definition::update(vec![Expr::int(0)], Expr::int(1))
            .over("r", Range::new(0, 10))
            .over("s", Range::new(5, 3));
        assert_eq!(u.reduction_points(), 30);
    }
}
