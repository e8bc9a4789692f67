// resolve.rs — Name resolution for `.stg` pipelines
//
// Walks the parsed AST, resolves every name against the global tables of
// inputs and stages (forward references allowed), lowers expressions into the
// scheduler's expression IR and assembles a `Pipeline`.
//
// Preconditions: `program` is a well-formed AST from the parser.
// Postconditions: returns the pipeline plus all accumulated diagnostics; the
//   pipeline is only meaningful when no diagnostic is an error.
// Failure modes: unknown names, duplicate definitions, arity mismatches,
//   unknown element types, misplaced updates/outputs and empty ranges produce
//   `Diagnostic` entries. Resolution continues past errors.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{self, DimDecl, Ident, Program, RangeLit, Span, StatementKind};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::expr::{Expr, Intrinsic};
use crate::region::Range;
use crate::stage::{Definition, ElemType, InputBuffer, Pipeline, ReductionVar, Stage};

// ── Public types ────────────────────────────────────────────────────────────

/// Result of name resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub pipeline: Pipeline,
    pub diagnostics: Vec<Diagnostic>,
}

/// A pipeline loaded from source, with the warnings it produced.
#[derive(Debug)]
pub struct Loaded {
    pub pipeline: Pipeline,
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy)]
enum Global {
    Input { index: usize, arity: usize, span: Span },
    Stage { index: usize, arity: usize, span: Span },
}

impl Global {
    fn span(self) -> Span {
        match self {
            Global::Input { span, .. } | Global::Stage { span, .. } => span,
        }
    }
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Resolve a parsed program into a pipeline.
pub fn resolve(program: &Program) -> ResolveResult {
    let mut ctx = ResolveCtx::default();
    ctx.collect_globals(program);
    ctx.resolve_statements(program);
    ResolveResult {
        pipeline: Pipeline {
            inputs: ctx.inputs,
            stages: ctx.stages,
            outputs: ctx.outputs,
        },
        diagnostics: ctx.diagnostics,
    }
}

/// Parse and resolve `source`. On any error-level diagnostic returns every
/// diagnostic collected so far.
pub fn load_pipeline(source: &str) -> Result<Loaded, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    let mut diagnostics: Vec<Diagnostic> = parsed
        .errors
        .iter()
        .map(|e| {
            Diagnostic::new(DiagLevel::Error, *e.span(), format!("syntax error: {e}"))
                .with_code(codes::E0001)
        })
        .collect();
    let Some(program) = parsed.program else {
        return Err(diagnostics);
    };
    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    let result = resolve(&program);
    diagnostics.extend(result.diagnostics);
    if diagnostics.iter().any(Diagnostic::is_error) {
        return Err(diagnostics);
    }
    Ok(Loaded {
        pipeline: result.pipeline,
        warnings: diagnostics,
    })
}

// ── Internal context ────────────────────────────────────────────────────────

#[derive(Default)]
struct ResolveCtx {
    globals: HashMap<String, Global>,
    inputs: Vec<InputBuffer>,
    stages: Vec<Stage>,
    outputs: Vec<String>,
    /// Stages whose `func` statement has been seen; updates must follow it.
    defined: Vec<bool>,
    diagnostics: Vec<Diagnostic>,
}

impl ResolveCtx {
    fn error(&mut self, code: DiagCode, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }

    // ── Pass 1: global tables ──

    fn collect_globals(&mut self, program: &Program) {
        for stmt in &program.statements {
            let (name, arity, is_input) = match &stmt.kind {
                StatementKind::Input(i) => (&i.name, i.dims.len(), true),
                StatementKind::Func(f) => (&f.name, f.dims.len(), false),
                _ => continue,
            };
            if let Some(prev) = self.globals.get(&name.name).copied() {
                let diag = Diagnostic::new(
                    DiagLevel::Error,
                    name.span,
                    format!("'{}' is defined more than once", name.name),
                )
                .with_code(codes::E0002)
                .with_related(prev.span(), "first defined here");
                self.diagnostics.push(diag);
                continue;
            }
            let global = if is_input {
                Global::Input {
                    index: self.inputs.len(),
                    arity,
                    span: name.span,
                }
            } else {
                Global::Stage {
                    index: self.stages.len(),
                    arity,
                    span: name.span,
                }
            };
            // Placeholders keep indices stable; filled in by pass 2.
            if is_input {
                self.inputs.push(InputBuffer::new(&name.name, &[]));
            } else {
                self.stages.push(Stage::new(&name.name, &[], Expr::int(0)));
                self.defined.push(false);
            }
            self.globals.insert(name.name.clone(), global);
        }
    }

    // ── Pass 2: statements ──

    fn resolve_statements(&mut self, program: &Program) {
        for stmt in &program.statements {
            match &stmt.kind {
                StatementKind::Input(input) => self.resolve_input(input),
                StatementKind::Func(func) => self.resolve_func(func, stmt.span),
                StatementKind::Update(update) => self.resolve_update(update, stmt.span),
                StatementKind::Output(output) => self.resolve_output(output),
            }
        }
    }

    /// Only the first definition of a duplicated name owns the global slot.
    fn owns(&self, name: &Ident) -> Option<Global> {
        self.globals
            .get(&name.name)
            .copied()
            .filter(|g| g.span() == name.span)
    }

    fn resolve_input(&mut self, input: &ast::InputStmt) {
        let Some(Global::Input { index, .. }) = self.owns(&input.name) else {
            return;
        };
        let elem = self.elem_type(input.elem.as_ref());
        let mut dims = Vec::new();
        let mut domain = Vec::new();
        self.check_dim_names(&input.dims);
        for dim in &input.dims {
            let Some(lit) = dim.range else {
                self.error(
                    codes::E0007,
                    dim.name.span,
                    format!(
                        "dimension '{}' of input '{}' needs a domain",
                        dim.name.name, input.name.name
                    ),
                );
                continue;
            };
            if let Some(range) = self.range(lit) {
                dims.push(dim.name.name.clone());
                domain.push(range);
            }
        }
        self.inputs[index] = InputBuffer {
            name: input.name.name.clone(),
            dims,
            domain,
            elem,
            span: input.name.span,
        };
    }

    fn resolve_func(&mut self, func: &ast::FuncStmt, span: Span) {
        let Some(Global::Stage { index, .. }) = self.owns(&func.name) else {
            return;
        };
        let elem = self.elem_type(func.elem.as_ref());
        self.check_dim_names(&func.dims);
        let names: Vec<&str> = func.dims.iter().map(|d| d.name.name.as_str()).collect();
        let value = self.lower(&func.value, &names);

        let mut stage = Stage::new(&func.name.name, &names, value).with_type(elem);
        for dim in &func.dims {
            if let Some(lit) = dim.range {
                if let Some(range) = self.range(lit) {
                    stage = stage.with_domain(&dim.name.name, range);
                }
            }
        }
        stage.span = func.name.span;
        stage.pure.span = span;
        self.stages[index] = stage;
        self.defined[index] = true;
    }

    fn resolve_update(&mut self, update: &ast::UpdateStmt, span: Span) {
        let index = match self.globals.get(&update.name.name).copied() {
            Some(Global::Stage { index, .. }) => index,
            Some(Global::Input { .. }) => {
                self.error(
                    codes::E0006,
                    update.name.span,
                    format!("cannot update input '{}'", update.name.name),
                );
                return;
            }
            None => {
                self.error(
                    codes::E0003,
                    update.name.span,
                    format!("update of undefined stage '{}'", update.name.name),
                );
                return;
            }
        };
        if !self.defined[index] {
            self.error(
                codes::E0006,
                update.name.span,
                format!(
                    "update of '{}' appears before its definition",
                    update.name.name
                ),
            );
            return;
        }
        let expected = self.stages[index].dims.len();
        if update.args.len() != expected {
            self.error(
                codes::E0004,
                update.name.span,
                format!(
                    "update of '{}' has {} indices, expected {expected}",
                    update.name.name,
                    update.args.len()
                ),
            );
            return;
        }

        let pure: Vec<String> = self.stages[index].dims.iter().map(|d| d.name.clone()).collect();
        let mut rvars = Vec::new();
        for rv in &update.rvars {
            if pure.contains(&rv.name.name) || rvars.iter().any(|r: &ReductionVar| r.name == rv.name.name) {
                self.error(
                    codes::E0002,
                    rv.name.span,
                    format!("variable '{}' is declared more than once", rv.name.name),
                );
                continue;
            }
            if let Some(range) = self.range(rv.range) {
                rvars.push(ReductionVar {
                    name: rv.name.name.clone(),
                    range,
                });
            }
        }

        let mut scope: Vec<&str> = pure.iter().map(String::as_str).collect();
        scope.extend(rvars.iter().map(|r| r.name.as_str()));
        let args = update.args.iter().map(|a| self.lower(a, &scope)).collect();
        let value = self.lower(&update.value, &scope);
        self.stages[index].updates.push(Definition {
            args,
            value,
            rvars,
            span,
        });
    }

    fn resolve_output(&mut self, output: &ast::OutputStmt) {
        let index = match self.globals.get(&output.name.name).copied() {
            Some(Global::Stage { index, .. }) => index,
            Some(Global::Input { .. }) => {
                self.error(
                    codes::E0006,
                    output.name.span,
                    format!("input '{}' cannot be an output", output.name.name),
                );
                return;
            }
            None => {
                self.error(
                    codes::E0003,
                    output.name.span,
                    format!("output of undefined stage '{}'", output.name.name),
                );
                return;
            }
        };
        if self.outputs.contains(&output.name.name) {
            self.error(
                codes::E0002,
                output.name.span,
                format!("'{}' is declared as an output more than once", output.name.name),
            );
            return;
        }
        let expected: Vec<String> = self.stages[index].dims.iter().map(|d| d.name.clone()).collect();
        if output.dims.len() != expected.len() {
            self.error(
                codes::E0004,
                output.name.span,
                format!(
                    "output '{}' lists {} dimensions, expected {}",
                    output.name.name,
                    output.dims.len(),
                    expected.len()
                ),
            );
            return;
        }
        for (dim, name) in output.dims.iter().zip(&expected) {
            if dim.name.name != *name {
                self.error(
                    codes::E0006,
                    dim.name.span,
                    format!("output dimension '{}' does not match '{name}'", dim.name.name),
                );
                return;
            }
        }

        let mut estimates = Vec::new();
        for dim in &output.dims {
            if let Some(range) = dim.range.and_then(|lit| self.range(lit)) {
                estimates.push((dim.name.name.as_str(), range));
            }
        }
        self.outputs.push(output.name.name.clone());
        let stage = &mut self.stages[index];
        for (name, range) in estimates {
            if let Some(d) = stage.dims.iter_mut().find(|d| d.name == name) {
                d.estimate = Some(range);
            }
        }
    }

    // ── Helpers ──

    fn elem_type(&mut self, ident: Option<&Ident>) -> ElemType {
        let Some(ident) = ident else {
            return ElemType::default();
        };
        match ElemType::from_name(&ident.name) {
            Some(ty) => ty,
            None => {
                self.error(
                    codes::E0005,
                    ident.span,
                    format!("unknown element type '{}'", ident.name),
                );
                ElemType::default()
            }
        }
    }

    fn range(&mut self, lit: RangeLit) -> Option<Range> {
        if lit.extent < 1 {
            self.error(
                codes::E0007,
                lit.span,
                format!("range [{}, {}] is empty", lit.min, lit.extent),
            );
            return None;
        }
        if lit.min.checked_add(lit.extent).is_none() {
            self.error(codes::E0007, lit.span, "range end overflows");
            return None;
        }
        Some(Range::new(lit.min, lit.extent))
    }

    fn check_dim_names(&mut self, dims: &[DimDecl]) {
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].iter().any(|d| d.name.name == dim.name.name) {
                self.error(
                    codes::E0002,
                    dim.name.span,
                    format!("dimension '{}' is declared more than once", dim.name.name),
                );
            } else if let Some(global) = self.globals.get(&dim.name.name) {
                let diag = Diagnostic::new(
                    DiagLevel::Warning,
                    dim.name.span,
                    format!("dimension '{}' shadows a global name", dim.name.name),
                )
                .with_code(codes::W0001)
                .with_related(global.span(), "global defined here");
                self.diagnostics.push(diag);
            }
        }
    }

    /// Lower an AST expression. Errors yield a `0` placeholder.
    fn lower(&mut self, expr: &ast::Expr, scope: &[&str]) -> Expr {
        match &expr.kind {
            ast::ExprKind::Int(v) => Expr::Int(*v),
            ast::ExprKind::Float(v) => Expr::Float(*v),
            ast::ExprKind::Var(id) => {
                if scope.contains(&id.name.as_str()) {
                    Expr::var(&id.name)
                } else if self.globals.contains_key(&id.name) {
                    self.error(
                        codes::E0004,
                        id.span,
                        format!("'{}' is read without indices", id.name),
                    );
                    Expr::int(0)
                } else {
                    self.error(codes::E0003, id.span, format!("undefined variable '{}'", id.name));
                    Expr::int(0)
                }
            }
            ast::ExprKind::Neg(inner) => Expr::Neg(Box::new(self.lower(inner, scope))),
            ast::ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.lower(lhs, scope);
                let rhs = self.lower(rhs, scope);
                Expr::binary(*op, lhs, rhs)
            }
            ast::ExprKind::Call { name, args } => self.lower_call(name, args, scope),
        }
    }

    fn lower_call(&mut self, name: &Ident, args: &[ast::Expr], scope: &[&str]) -> Expr {
        let mut lowered: Vec<Expr> = args.iter().map(|a| self.lower(a, scope)).collect();

        match self.globals.get(&name.name).copied() {
            Some(Global::Stage { arity, .. }) => {
                if !self.check_arity(name, arity, lowered.len()) {
                    return Expr::int(0);
                }
                return Expr::call(&name.name, lowered);
            }
            Some(Global::Input { arity, .. }) => {
                if !self.check_arity(name, arity, lowered.len()) {
                    return Expr::int(0);
                }
                return Expr::input(&name.name, lowered);
            }
            None => {}
        }

        match name.name.as_str() {
            "min" | "max" => {
                if !self.check_arity(name, 2, lowered.len()) {
                    return Expr::int(0);
                }
                let b = lowered.pop().unwrap_or(Expr::Int(0));
                let a = lowered.pop().unwrap_or(Expr::Int(0));
                if name.name == "min" {
                    Expr::min(a, b)
                } else {
                    Expr::max(a, b)
                }
            }
            "clamp" => {
                if !self.check_arity(name, 3, lowered.len()) {
                    return Expr::int(0);
                }
                let hi = lowered.pop().unwrap_or(Expr::Int(0));
                let lo = lowered.pop().unwrap_or(Expr::Int(0));
                let e = lowered.pop().unwrap_or(Expr::Int(0));
                Expr::clamp(e, lo, hi)
            }
            other => match Intrinsic::from_name(other) {
                Some(intrinsic) => {
                    if !self.check_arity(name, intrinsic.arity(), lowered.len()) {
                        return Expr::int(0);
                    }
                    Expr::Intrinsic(intrinsic, lowered)
                }
                None => {
                    self.error(codes::E0003, name.span, format!("undefined function '{other}'"));
                    Expr::int(0)
                }
            },
        }
    }

    fn check_arity(&mut self, name: &Ident, expected: usize, found: usize) -> bool {
        if expected == found {
            return true;
        }
        self.error(
            codes::E0004,
            name.span,
            format!(
                "'{}' takes {expected} arguments, found {found}",
                name.name
            ),
        );
        false
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    const BLUR: &str = "\
input img(x: [0, 1026], y: [0, 1026]): u16
func blur_x(x, y): u16 = (img(x, y) + img(x + 1, y) + img(x + 2, y)) / 3
func blur_y(x, y): u16 = (blur_x(x, y) + blur_x(x, y + 1) + blur_x(x, y + 2)) / 3
output blur_y(x: [0, 1024], y: [0, 1024])
";

    fn load_ok(source: &str) -> Pipeline {
        match load_pipeline(source) {
            Ok(loaded) => loaded.pipeline,
            Err(diags) => panic!("unexpected diagnostics: {diags:#?}"),
        }
    }

    fn codes_of(source: &str) -> Vec<DiagCode> {
        match load_pipeline(source) {
            Ok(_) => Vec::new(),
            Err(diags) => diags.iter().filter_map(|d| d.code).collect(),
        }
    }

    #[test]
    fn blur_resolves() {
        let p = load_ok(BLUR);
        assert_eq!(p.inputs.len(), 1);
        assert_eq!(p.inputs[0].elem, ElemType::U16);
        assert_eq!(p.inputs[0].domain, vec![Range::new(0, 1026), Range::new(0, 1026)]);
        assert_eq!(p.stages.len(), 2);
        assert_eq!(p.outputs, vec!["blur_y".to_string()]);
        let out = p.find_stage("blur_y").expect("blur_y");
        assert_eq!(out.dims[1].estimate, Some(Range::new(0, 1024)));
        assert!(out.dims.iter().all(|d| d.domain.is_none()));
        let mut callees = Vec::new();
        out.pure.value.visit_calls(&mut |_, name, _| callees.push(name.to_string()));
        assert_eq!(callees, vec!["blur_x"; 3]);
    }

    #[test]
    fn forward_reference_is_allowed() {
        let p = load_ok("func out(x) = f(x) + 1\nfunc f(x) = x * 2\noutput out(x: [0, 8])\n");
        assert_eq!(p.stages[0].name, "out");
    }

    #[test]
    fn histogram_update_with_reduction_domain() {
        let p = load_ok(
            "input img(x: [0, 64]): u8\n\
             func hist(i: [0, 256]): i32 = 0\n\
             update hist(clamp(img(r), 0, 255)) = hist(clamp(img(r), 0, 255)) + 1 over r: [0, 64]\n\
             output hist(i: [0, 256])\n",
        );
        let hist = p.find_stage("hist").expect("hist");
        assert_eq!(hist.elem, ElemType::I32);
        assert_eq!(hist.dims[0].domain, Some(Range::new(0, 256)));
        assert_eq!(hist.updates.len(), 1);
        let update = &hist.updates[0];
        assert_eq!(update.rvars[0].name, "r");
        assert_eq!(update.reduction_points(), 64);
        assert!(matches!(update.args[0], Expr::Binary(BinOp::Min, _, _)));
    }

    #[test]
    fn intrinsics_lower() {
        let p = load_ok("func out(x) = select(x < 4, sqrt(x), max(x, 2))\noutput out(x: [0, 8])\n");
        let Expr::Intrinsic(Intrinsic::Select, args) = &p.stages[0].pure.value else {
            panic!("expected select");
        };
        assert!(matches!(args[1], Expr::Intrinsic(Intrinsic::Sqrt, _)));
        assert!(matches!(args[2], Expr::Binary(BinOp::Max, _, _)));
    }

    #[test]
    fn syntax_error_is_e0001() {
        let found = codes_of("func f(x) = \n");
        assert!(!found.is_empty());
        assert!(found.iter().all(|c| *c == codes::E0001));
    }

    #[test]
    fn duplicate_definition_is_e0002() {
        assert_eq!(
            codes_of("func f(x) = x\nfunc f(x) = x + 1\noutput f(x: [0, 4])\n"),
            vec![codes::E0002]
        );
    }

    #[test]
    fn undefined_names_are_e0003() {
        assert_eq!(
            codes_of("func f(x) = g(x) + y\noutput f(x: [0, 4])\n"),
            vec![codes::E0003, codes::E0003]
        );
    }

    #[test]
    fn arity_mismatch_is_e0004() {
        assert_eq!(
            codes_of("input a(x: [0, 4], y: [0, 4])\nfunc f(x) = a(x)\noutput f(x: [0, 4])\n"),
            vec![codes::E0004]
        );
        assert_eq!(
            codes_of("func f(x) = sqrt(x, x)\noutput f(x: [0, 4])\n"),
            vec![codes::E0004]
        );
    }

    #[test]
    fn unknown_type_is_e0005() {
        assert_eq!(
            codes_of("func f(x): f16 = x\noutput f(x: [0, 4])\n"),
            vec![codes::E0005]
        );
    }

    #[test]
    fn misplaced_statements_are_e0006() {
        assert_eq!(
            codes_of("input a(x: [0, 4])\nupdate a(0) = 1\nfunc f(x) = a(x)\noutput f(x: [0, 4])\n"),
            vec![codes::E0006]
        );
        assert_eq!(
            codes_of("update f(0) = 1\nfunc f(x) = x\noutput f(x: [0, 4])\n"),
            vec![codes::E0006]
        );
        assert_eq!(
            codes_of("input a(x: [0, 4])\noutput a(x: [0, 4])\n"),
            vec![codes::E0006]
        );
    }

    #[test]
    fn empty_range_is_e0007() {
        assert_eq!(
            codes_of("func f(x: [0, 0]) = x\noutput f(x: [0, 4])\n"),
            vec![codes::E0007]
        );
        assert_eq!(
            codes_of("input a(x)\nfunc f(x) = a(x)\noutput f(x: [0, 4])\n"),
            vec![codes::E0007]
        );
    }

    #[test]
    fn shadowing_dimension_warns() {
        let loaded = load_pipeline("input x(i: [0, 4])\nfunc f(x) = x\noutput f(x: [0, 4])\n")
            .expect("warnings only");
        assert_eq!(loaded.warnings.len(), 1);
        assert_eq!(loaded.warnings[0].code, Some(codes::W0001));
        assert_eq!(loaded.warnings[0].level, DiagLevel::Warning);
    }

    #[test]
    fn output_without_estimate_still_loads() {
        let p = load_ok("func f(x, y) = x + y\noutput f(x: [0, 4], y)\n");
        let f = p.find_stage("f").expect("f");
        assert_eq!(f.dims[0].estimate, Some(Range::new(0, 4)));
        assert_eq!(f.dims[1].estimate, None);
    }
}
