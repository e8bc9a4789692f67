// AST node types for `.stg` pipeline descriptions.
//
// One node per statement form (`input`, `func`, `update`, `output`) plus the
// expression tree. Every node carries a `SimpleSpan` for error reporting in
// name resolution.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::expr::BinOp;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// Span for stages and definitions built programmatically rather than parsed.
pub fn synthetic_span() -> Span {
    (0..0).into()
}

// ── Root ──

/// A complete pipeline description: a sequence of top-level statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
    pub span: Span,
}

// ── Statements ──

/// A top-level statement with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Input(InputStmt),
    Func(FuncStmt),
    Update(UpdateStmt),
    Output(OutputStmt),
}

// ── input_stmt: 'input' IDENT '(' dim_decl, ... ')' (':' IDENT)? ──

#[derive(Debug, Clone, PartialEq)]
pub struct InputStmt {
    pub name: Ident,
    pub dims: Vec<DimDecl>,
    pub elem: Option<Ident>,
}

// ── func_stmt: 'func' IDENT '(' dim_decl, ... ')' (':' IDENT)? '=' expr ──

#[derive(Debug, Clone, PartialEq)]
pub struct FuncStmt {
    pub name: Ident,
    pub dims: Vec<DimDecl>,
    pub elem: Option<Ident>,
    pub value: Expr,
}

// ── update_stmt: 'update' IDENT '(' expr, ... ')' '=' expr ('over' rvar_decl, ...)? ──

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub name: Ident,
    pub args: Vec<Expr>,
    pub value: Expr,
    pub rvars: Vec<RVarDecl>,
}

// ── output_stmt: 'output' IDENT '(' dim_decl, ... ')' ──

#[derive(Debug, Clone, PartialEq)]
pub struct OutputStmt {
    pub name: Ident,
    pub dims: Vec<DimDecl>,
}

// ── Declarations ──

/// `x` or `x: [min, extent]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DimDecl {
    pub name: Ident,
    pub range: Option<RangeLit>,
}

/// `r: [min, extent]` in an `over` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct RVarDecl {
    pub name: Ident,
    pub range: RangeLit,
}

/// `[min, extent]` literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeLit {
    pub min: i64,
    pub extent: i64,
    pub span: Span,
}

/// An identifier with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    /// Bare identifier: a pure or reduction variable.
    Var(Ident),
    /// `name(args)`: a stage, an input buffer or an intrinsic.
    Call { name: Ident, args: Vec<Expr> },
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}
