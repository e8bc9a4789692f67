// expr.rs — Expression IR for stage definitions
//
// Values and index expressions of pure and update definitions. Provides the
// queries the scheduler needs from expressions: call enumeration, simultaneous
// variable substitution, affine classification of access indices and
// interval evaluation (the bounds oracle).
//
// Preconditions: none.
// Postconditions: `interval` over-approximates every value the expression can
//   take when each variable ranges over its environment interval.
// Failure modes: none (unknown variables and data-dependent values evaluate
//   to an unbounded interval).
// Side effects: none.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops;

use crate::region::Interval;

// ── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
        }
    }
}

/// Built-in functions other than `min`/`max` (which are binary operators).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Intrinsic {
    Select,
    Abs,
    Sqrt,
    Exp,
    Log,
    Pow,
    Sin,
    Cos,
    Floor,
    Ceil,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Intrinsic> {
        Some(match name {
            "select" => Intrinsic::Select,
            "abs" => Intrinsic::Abs,
            "sqrt" => Intrinsic::Sqrt,
            "exp" => Intrinsic::Exp,
            "log" => Intrinsic::Log,
            "pow" => Intrinsic::Pow,
            "sin" => Intrinsic::Sin,
            "cos" => Intrinsic::Cos,
            "floor" => Intrinsic::Floor,
            "ceil" => Intrinsic::Ceil,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::Select => "select",
            Intrinsic::Abs => "abs",
            Intrinsic::Sqrt => "sqrt",
            Intrinsic::Exp => "exp",
            Intrinsic::Log => "log",
            Intrinsic::Pow => "pow",
            Intrinsic::Sin => "sin",
            Intrinsic::Cos => "cos",
            Intrinsic::Floor => "floor",
            Intrinsic::Ceil => "ceil",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Intrinsic::Select => 3,
            Intrinsic::Pow => 2,
            _ => 1,
        }
    }
}

/// What a call reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    Stage,
    Input,
}

// ── Expression tree ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Intrinsic(Intrinsic, Vec<Expr>),
    Call {
        kind: CallKind,
        name: String,
        args: Vec<Expr>,
    },
}

/// Variable name → value interval.
pub type VarEnv = HashMap<String, Interval>;

/// `Σ coeff·var + constant` with non-zero coefficients only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Affine {
    pub terms: BTreeMap<String, i64>,
    pub constant: i64,
}

impl Affine {
    fn constant(c: i64) -> Self {
        Affine {
            terms: BTreeMap::new(),
            constant: c,
        }
    }

    fn var(name: &str) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(name.to_string(), 1);
        Affine { terms, constant: 0 }
    }

    fn combine(mut self, other: Affine, sign: i64) -> Option<Affine> {
        for (v, c) in other.terms {
            let slot = self.terms.entry(v).or_insert(0);
            *slot = slot.checked_add(c.checked_mul(sign)?)?;
        }
        self.terms.retain(|_, c| *c != 0);
        self.constant = self.constant.checked_add(other.constant.checked_mul(sign)?)?;
        Some(self)
    }

    fn scale(mut self, k: i64) -> Option<Affine> {
        for c in self.terms.values_mut() {
            *c = c.checked_mul(k)?;
        }
        self.terms.retain(|_, c| *c != 0);
        self.constant = self.constant.checked_mul(k)?;
        Some(self)
    }

    /// True when the form is exactly `var`.
    pub fn is_identity_of(&self, var: &str) -> bool {
        self.constant == 0 && self.terms.len() == 1 && self.terms.get(var) == Some(&1)
    }
}

/// Per-dimension classification of an access index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimAccess {
    /// The index is exactly the consumer's variable for the same dimension.
    Identity,
    Affine,
    NonAffine,
}

impl Expr {
    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    pub fn int(v: i64) -> Expr {
        Expr::Int(v)
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            kind: CallKind::Stage,
            name: name.to_string(),
            args,
        }
    }

    pub fn input(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            kind: CallKind::Input,
            name: name.to_string(),
            args,
        }
    }

    pub fn min(a: Expr, b: Expr) -> Expr {
        Expr::Binary(BinOp::Min, Box::new(a), Box::new(b))
    }

    pub fn max(a: Expr, b: Expr) -> Expr {
        Expr::Binary(BinOp::Max, Box::new(a), Box::new(b))
    }

    /// `clamp(e, lo, hi)` lowered to `min(max(e, lo), hi)`.
    pub fn clamp(e: Expr, lo: Expr, hi: Expr) -> Expr {
        Expr::min(Expr::max(e, lo), hi)
    }

    pub fn select(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::Intrinsic(Intrinsic::Select, vec![cond, then, otherwise])
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Expr {
        Expr::Binary(op, Box::new(a), Box::new(b))
    }

    /// Visit every call in the tree, outer calls before the calls nested in
    /// their arguments, left to right.
    pub fn visit_calls<'a>(&'a self, f: &mut impl FnMut(CallKind, &'a str, &'a [Expr])) {
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => {}
            Expr::Neg(e) => e.visit_calls(f),
            Expr::Binary(_, a, b) => {
                a.visit_calls(f);
                b.visit_calls(f);
            }
            Expr::Intrinsic(_, args) => {
                for a in args {
                    a.visit_calls(f);
                }
            }
            Expr::Call { kind, name, args } => {
                f(*kind, name.as_str(), args.as_slice());
                for a in args {
                    a.visit_calls(f);
                }
            }
        }
    }

    /// Simultaneous substitution of variables. Replacements are not
    /// themselves rewritten.
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Expr {
        match self {
            Expr::Var(v) => map.get(v).cloned().unwrap_or_else(|| self.clone()),
            Expr::Int(_) | Expr::Float(_) => self.clone(),
            Expr::Neg(e) => Expr::Neg(Box::new(e.substitute(map))),
            Expr::Binary(op, a, b) => {
                Expr::Binary(*op, Box::new(a.substitute(map)), Box::new(b.substitute(map)))
            }
            Expr::Intrinsic(i, args) => {
                Expr::Intrinsic(*i, args.iter().map(|a| a.substitute(map)).collect())
            }
            Expr::Call { kind, name, args } => Expr::Call {
                kind: *kind,
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(map)).collect(),
            },
        }
    }

    /// Linear form over integer variables, if the expression has one.
    pub fn as_affine(&self) -> Option<Affine> {
        match self {
            Expr::Int(v) => Some(Affine::constant(*v)),
            Expr::Var(v) => Some(Affine::var(v)),
            Expr::Neg(e) => e.as_affine()?.scale(-1),
            Expr::Binary(BinOp::Add, a, b) => a.as_affine()?.combine(b.as_affine()?, 1),
            Expr::Binary(BinOp::Sub, a, b) => a.as_affine()?.combine(b.as_affine()?, -1),
            Expr::Binary(BinOp::Mul, a, b) => {
                let (fa, fb) = (a.as_affine()?, b.as_affine()?);
                if fa.terms.is_empty() {
                    fb.scale(fa.constant)
                } else if fb.terms.is_empty() {
                    fa.scale(fb.constant)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Classify this access index against the consumer variable `var` of the
    /// same dimension.
    pub fn classify_access(&self, var: Option<&str>) -> DimAccess {
        match self.as_affine() {
            Some(form) if var.is_some_and(|v| form.is_identity_of(v)) => DimAccess::Identity,
            Some(_) => DimAccess::Affine,
            None => DimAccess::NonAffine,
        }
    }

    /// Interval of values the expression can take under `env`. Non-integer
    /// values are enclosed by rounding outward.
    pub fn interval(&self, env: &VarEnv) -> Interval {
        self.bound(env).0
    }

    /// Enclosing interval, and whether the value may be fractional. Calls
    /// and transcendental results count as fractional; variables are integer.
    fn bound(&self, env: &VarEnv) -> (Interval, bool) {
        match self {
            Expr::Int(v) => (Interval::point(*v), false),
            Expr::Float(v) => {
                let enclosing = if v.is_finite() && v.abs() < i64::MAX as f64 {
                    Interval::new(v.floor() as i64, v.ceil() as i64)
                } else {
                    Interval::everything()
                };
                (enclosing, true)
            }
            Expr::Var(v) => (env.get(v).copied().unwrap_or_else(Interval::everything), false),
            Expr::Neg(e) => {
                let (i, frac) = e.bound(env);
                (i.neg(), frac)
            }
            Expr::Binary(op, a, b) => {
                let ((ia, fa), (ib, fb)) = (a.bound(env), b.bound(env));
                let frac = fa || fb;
                let i = match op {
                    BinOp::Add => ia.add(&ib),
                    BinOp::Sub => ia.sub(&ib),
                    BinOp::Mul => ia.mul(&ib),
                    BinOp::Div if frac => ia.div_real(&ib),
                    BinOp::Div => ia.div(&ib),
                    BinOp::Mod if frac => ia.modulo_real(&ib),
                    BinOp::Mod => ia.modulo(&ib),
                    BinOp::Min => ia.min_with(&ib),
                    BinOp::Max => ia.max_with(&ib),
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                        return (Interval::new(0, 1), false);
                    }
                };
                (i, frac)
            }
            Expr::Intrinsic(i, args) => {
                let arg = |k: usize| {
                    args.get(k)
                        .map(|a| a.bound(env))
                        .unwrap_or_else(|| (Interval::everything(), true))
                };
                match i {
                    Intrinsic::Select => {
                        let ((it, ft), (ie, fe)) = (arg(1), arg(2));
                        (it.union(&ie), ft || fe)
                    }
                    Intrinsic::Abs => {
                        let (a, frac) = arg(0);
                        (a.abs(), frac)
                    }
                    // The enclosure has integer ends, so rounding stays inside it.
                    Intrinsic::Floor | Intrinsic::Ceil => (arg(0).0, true),
                    Intrinsic::Sin | Intrinsic::Cos => (Interval::new(-1, 1), true),
                    Intrinsic::Sqrt | Intrinsic::Exp | Intrinsic::Log | Intrinsic::Pow => {
                        (Interval::everything(), true)
                    }
                }
            }
            // Data-dependent.
            Expr::Call { .. } => (Interval::everything(), true),
        }
    }
}

// ── Operator sugar (programmatic construction) ──────────────────────────────

impl ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, self, rhs)
    }
}

impl ops::Add<i64> for Expr {
    type Output = Expr;
    fn add(self, rhs: i64) -> Expr {
        Expr::binary(BinOp::Add, self, Expr::Int(rhs))
    }
}

impl ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Sub, self, rhs)
    }
}

impl ops::Sub<i64> for Expr {
    type Output = Expr;
    fn sub(self, rhs: i64) -> Expr {
        Expr::binary(BinOp::Sub, self, Expr::Int(rhs))
    }
}

impl ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, self, rhs)
    }
}

impl ops::Mul<i64> for Expr {
    type Output = Expr;
    fn mul(self, rhs: i64) -> Expr {
        Expr::binary(BinOp::Mul, self, Expr::Int(rhs))
    }
}

impl ops::Div<i64> for Expr {
    type Output = Expr;
    fn div(self, rhs: i64) -> Expr {
        Expr::binary(BinOp::Div, self, Expr::Int(rhs))
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Float(v) => write!(f, "{v:?}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Neg(e) => write!(f, "-({e})"),
            Expr::Binary(op @ (BinOp::Min | BinOp::Max), a, b) => {
                write!(f, "{}({a}, {b})", op.symbol())
            }
            Expr::Binary(op, a, b) => write!(f, "({a} {} {b})", op.symbol()),
            Expr::Intrinsic(i, args) => {
                write!(f, "{}(", i.name())?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Expr::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::var("x")
    }

    fn y() -> Expr {
        Expr::var("y")
    }

    fn env(pairs: &[(&str, Interval)]) -> VarEnv {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn affine_of_shifted_var() {
        let form = (x() + 2).as_affine().expect("affine");
        assert_eq!(form.constant, 2);
        assert_eq!(form.terms.get("x"), Some(&1));
        assert!(!form.is_identity_of("x"));
    }

    #[test]
    fn affine_cancels_terms() {
        let form = (x() + y() - y()).as_affine().expect("affine");
        assert!(form.is_identity_of("x"));
    }

    #[test]
    fn affine_scaled() {
        let form = (x() * 2 + 1).as_affine().expect("affine");
        assert_eq!(form.terms.get("x"), Some(&2));
        assert_eq!(form.constant, 1);
    }

    #[test]
    fn product_of_vars_is_not_affine() {
        assert!((x() * y()).as_affine().is_none());
        assert!((x() / 2).as_affine().is_none());
    }

    #[test]
    fn classify_accesses() {
        assert_eq!(x().classify_access(Some("x")), DimAccess::Identity);
        assert_eq!(x().classify_access(Some("y")), DimAccess::Affine);
        assert_eq!((x() + 1).classify_access(Some("x")), DimAccess::Affine);
        let data = Expr::input("lut", vec![x()]);
        assert_eq!(data.classify_access(Some("x")), DimAccess::NonAffine);
    }

    #[test]
    fn substitute_is_simultaneous() {
        let e = x() + y();
        let map: HashMap<String, Expr> =
            [("x".to_string(), y()), ("y".to_string(), x())].into_iter().collect();
        assert_eq!(e.substitute(&map), y() + x());
    }

    #[test]
    fn visit_calls_outer_first() {
        let e = Expr::input("img", vec![Expr::call("idx", vec![x()]), y()]);
        let mut seen = Vec::new();
        e.visit_calls(&mut |kind, name, _| seen.push((kind, name.to_string())));
        assert_eq!(
            seen,
            vec![
                (CallKind::Input, "img".to_string()),
                (CallKind::Stage, "idx".to_string()),
            ]
        );
    }

    #[test]
    fn interval_of_stencil_index() {
        let e = env(&[("x", Interval::new(0, 99))]);
        assert_eq!((x() - 1).interval(&e), Interval::new(-1, 98));
        assert_eq!((x() * 2 + 1).interval(&e), Interval::new(1, 199));
    }

    #[test]
    fn interval_of_clamped_data_dependent_index() {
        let e = env(&[("r", Interval::new(0, 1023))]);
        let idx = Expr::clamp(Expr::input("img", vec![Expr::var("r")]), Expr::int(0), Expr::int(255));
        assert_eq!(idx.interval(&e), Interval::new(0, 255));
    }

    #[test]
    fn interval_of_unbounded_call_index() {
        let e = env(&[("x", Interval::new(0, 9))]);
        let idx = Expr::input("lut", vec![x()]);
        assert!(!idx.interval(&e).is_bounded());
    }

    #[test]
    fn interval_of_modulo() {
        let e = env(&[("x", Interval::new(0, 1000))]);
        let idx = Expr::binary(BinOp::Mod, x(), Expr::int(16));
        assert_eq!(idx.interval(&e), Interval::new(0, 15));
    }

    #[test]
    fn interval_of_float_division_rounds_outward() {
        let e = env(&[("x", Interval::new(0, 9))]);
        let half = Expr::binary(BinOp::Div, x(), Expr::Float(2.0));
        assert_eq!(half.interval(&e), Interval::new(0, 5));
        let up = Expr::Intrinsic(Intrinsic::Ceil, vec![half]);
        assert_eq!(up.interval(&e), Interval::new(0, 5));
        // Integer division still floors.
        assert_eq!((x() / 2).interval(&e), Interval::new(0, 4));
    }

    #[test]
    fn interval_of_float_division_over_negative_range() {
        let e = env(&[("x", Interval::new(-5, 5))]);
        let half = Expr::binary(BinOp::Div, x(), Expr::Float(2.0));
        assert_eq!(half.interval(&e), Interval::new(-3, 3));
    }

    #[test]
    fn fractional_literal_is_enclosed() {
        let e = env(&[("x", Interval::new(0, 3))]);
        assert_eq!((x() * Expr::Float(1.5)).interval(&e), Interval::new(0, 6));
    }

    #[test]
    fn clamped_call_divided_uses_real_division() {
        let e = env(&[("x", Interval::new(0, 9))]);
        let v = Expr::clamp(Expr::input("img", vec![x()]), Expr::int(0), Expr::int(9));
        assert_eq!(Expr::binary(BinOp::Div, v, Expr::int(2)).interval(&e), Interval::new(0, 5));
    }

    #[test]
    fn display_renders_calls_and_ops() {
        let e = Expr::call("f", vec![x() + 1, Expr::min(y(), Expr::int(3))]);
        assert_eq!(e.to_string(), "f((x + 1), min(y, 3))");
    }
}
