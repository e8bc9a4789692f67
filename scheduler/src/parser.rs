// Parser for `.stg` pipeline descriptions.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators. Grammar (one statement per line):
//
//   input  IDENT '(' dim_decl, ... ')' [':' TYPE]
//   func   IDENT '(' dim_decl, ... ')' [':' TYPE] '=' expr
//   update IDENT '(' expr, ... ')' '=' expr ['over' IDENT ':' range, ...]
//   output IDENT '(' dim_decl, ... ')'
//
//   dim_decl = IDENT [':' range]        range = '[' ['-'] INT ',' INT ']'
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::expr::BinOp;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a pipeline source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

fn binary(lhs: Expr, (op, rhs): (BinOp, Expr)) -> Expr {
    let span: SimpleSpan = (lhs.span.start()..rhs.span.end()).into();
    Expr {
        kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
        span,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Range: '[' ['-'] INT ',' INT ']' ──

    let signed_int = just(Token::Minus)
        .or_not()
        .then(select! { Token::Int(v) => v })
        .map(|(neg, v)| if neg.is_some() { -v } else { v });

    let range = signed_int
        .clone()
        .then_ignore(just(Token::Comma))
        .then(signed_int)
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map_with(|(min, extent), e| RangeLit {
            min,
            extent,
            span: e.span(),
        });

    // ── Dimension declarations ──

    let dim_decl = ident
        .clone()
        .then(just(Token::Colon).ignore_then(range.clone()).or_not())
        .map(|(name, range)| DimDecl { name, range });

    let dim_list = dim_decl
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let elem_type = just(Token::Colon).ignore_then(ident.clone()).or_not();

    // ── Expressions ──

    let expr = recursive(|expr| {
        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let call = ident
            .clone()
            .then(args)
            .map_with(|(name, args), e| Expr {
                kind: ExprKind::Call { name, args },
                span: e.span(),
            });

        let var = ident.clone().map(|id: Ident| {
            let span = id.span;
            Expr {
                kind: ExprKind::Var(id),
                span,
            }
        });

        let literal = select! {
            Token::Int(v) = e => Expr { kind: ExprKind::Int(v), span: e.span() },
            Token::Float(v) = e => Expr { kind: ExprKind::Float(v), span: e.span() },
        };

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = choice((literal, call, var, parens));

        let unary = just(Token::Minus)
            .map_with(|_, e| -> SimpleSpan { e.span() })
            .repeated()
            .foldr(atom, |minus: SimpleSpan, rhs: Expr| {
                let span: SimpleSpan = (minus.start()..rhs.span.end()).into();
                Expr {
                    kind: ExprKind::Neg(Box::new(rhs)),
                    span,
                }
            });

        let product_op = select! {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
        };
        let product = unary
            .clone()
            .foldl(product_op.then(unary).repeated(), binary);

        let sum_op = select! {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
        };
        let sum = product
            .clone()
            .foldl(sum_op.then(product).repeated(), binary);

        let compare_op = select! {
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::EqEq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
        };
        sum.clone()
            .then(compare_op.then(sum).or_not())
            .map(|(lhs, rest)| match rest {
                Some(rhs) => binary(lhs, rhs),
                None => lhs,
            })
    });

    // ── input_stmt ──

    let input_stmt = just(Token::Input)
        .ignore_then(ident.clone())
        .then(dim_list.clone())
        .then(elem_type.clone())
        .map(|((name, dims), elem)| StatementKind::Input(InputStmt { name, dims, elem }));

    // ── func_stmt ──

    let func_stmt = just(Token::Func)
        .ignore_then(ident.clone())
        .then(dim_list.clone())
        .then(elem_type)
        .then_ignore(just(Token::Equals))
        .then(expr.clone())
        .map(|(((name, dims), elem), value)| {
            StatementKind::Func(FuncStmt {
                name,
                dims,
                elem,
                value,
            })
        });

    // ── update_stmt ──

    let rvar_decl = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then(range)
        .map(|(name, range)| RVarDecl { name, range });

    let update_stmt = just(Token::Update)
        .ignore_then(ident.clone())
        .then(
            expr.clone()
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then_ignore(just(Token::Equals))
        .then(expr)
        .then(
            just(Token::Over)
                .ignore_then(
                    rvar_decl
                        .separated_by(just(Token::Comma))
                        .at_least(1)
                        .collect::<Vec<_>>(),
                )
                .or_not(),
        )
        .map(|(((name, args), value), rvars)| {
            StatementKind::Update(UpdateStmt {
                name,
                args,
                value,
                rvars: rvars.unwrap_or_default(),
            })
        });

    // ── output_stmt ──

    let output_stmt = just(Token::Output)
        .ignore_then(ident)
        .then(dim_list)
        .map(|(name, dims)| StatementKind::Output(OutputStmt { name, dims }));

    // ── Statement dispatch ──

    let statement = choice((input_stmt, func_stmt, update_stmt, output_stmt)).map_with(
        |kind, e| Statement {
            kind,
            span: e.span(),
        },
    );

    // ── Program ──

    nl.clone()
        .ignore_then(
            statement
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(move |statements, e| Program {
            statements,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.program.expect("expected program")
    }

    fn parse_one_stmt(source: &str) -> Statement {
        let prog = parse_ok(source);
        assert_eq!(prog.statements.len(), 1, "expected 1 statement");
        prog.statements.into_iter().next().unwrap()
    }

    fn func_value(source: &str) -> Expr {
        let s = parse_one_stmt(source);
        let StatementKind::Func(f) = s.kind else {
            panic!("expected Func")
        };
        f.value
    }

    // ── Empty / blank ──

    #[test]
    fn empty_program() {
        let prog = parse_ok("");
        assert!(prog.statements.is_empty());
    }

    #[test]
    fn blank_lines_and_comments_only() {
        let prog = parse_ok("\n# nothing here\n\n");
        assert!(prog.statements.is_empty());
    }

    // ── input_stmt ──

    #[test]
    fn input_with_domains_and_type() {
        let s = parse_one_stmt("input img(x: [0, 1026], y: [-1, 1026]): u16");
        let StatementKind::Input(input) = &s.kind else {
            panic!("expected Input")
        };
        assert_eq!(input.name.name, "img");
        assert_eq!(input.dims.len(), 2);
        let y = input.dims[1].range.expect("y range");
        assert_eq!((y.min, y.extent), (-1, 1026));
        assert_eq!(input.elem.as_ref().map(|e| e.name.as_str()), Some("u16"));
    }

    // ── func_stmt ──

    #[test]
    fn func_without_type() {
        let s = parse_one_stmt("func f(x, y) = x + y");
        let StatementKind::Func(f) = &s.kind else {
            panic!("expected Func")
        };
        assert_eq!(f.name.name, "f");
        assert!(f.elem.is_none());
        assert!(f.dims.iter().all(|d| d.range.is_none()));
    }

    #[test]
    fn func_with_domain_and_type() {
        let s = parse_one_stmt("func hist(i: [0, 256]): i32 = 0");
        let StatementKind::Func(f) = &s.kind else {
            panic!("expected Func")
        };
        assert_eq!(f.dims[0].range.map(|r| r.extent), Some(256));
        assert!(matches!(f.value.kind, ExprKind::Int(0)));
    }

    #[test]
    fn product_binds_tighter_than_sum() {
        let value = func_value("func f(x) = x + 2 * x");
        let ExprKind::Binary(BinOp::Add, _, rhs) = value.kind else {
            panic!("expected Add at root")
        };
        assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn sum_is_left_associative() {
        let value = func_value("func f(x) = x - 1 - 2");
        let ExprKind::Binary(BinOp::Sub, lhs, rhs) = value.kind else {
            panic!("expected Sub at root")
        };
        assert!(matches!(lhs.kind, ExprKind::Binary(BinOp::Sub, _, _)));
        assert!(matches!(rhs.kind, ExprKind::Int(2)));
    }

    #[test]
    fn comparison_at_lowest_precedence() {
        let value = func_value("func f(x) = x + 1 < 4");
        assert!(matches!(value.kind, ExprKind::Binary(BinOp::Lt, _, _)));
    }

    #[test]
    fn unary_minus() {
        let value = func_value("func f(x) = -x * 2");
        let ExprKind::Binary(BinOp::Mul, lhs, _) = value.kind else {
            panic!("expected Mul at root")
        };
        assert!(matches!(lhs.kind, ExprKind::Neg(_)));
    }

    #[test]
    fn calls_and_parens() {
        let value = func_value("func f(x, y) = (g(x - 1, y) + g(x + 1, y)) / 2");
        let ExprKind::Binary(BinOp::Div, lhs, _) = value.kind else {
            panic!("expected Div at root")
        };
        let ExprKind::Binary(BinOp::Add, a, _) = lhs.kind else {
            panic!("expected Add")
        };
        let ExprKind::Call { name, args } = a.kind else {
            panic!("expected Call")
        };
        assert_eq!(name.name, "g");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn float_literal() {
        let value = func_value("func f(x) = 0.25 * g(x)");
        let ExprKind::Binary(_, lhs, _) = value.kind else {
            panic!("expected Binary")
        };
        assert!(matches!(lhs.kind, ExprKind::Float(v) if v == 0.25));
    }

    // ── update_stmt ──

    #[test]
    fn update_with_over_clause() {
        let s = parse_one_stmt(
            "update hist(clamp(img(r, s), 0, 255)) = hist(clamp(img(r, s), 0, 255)) + 1 over r: [0, 1024], s: [0, 768]",
        );
        let StatementKind::Update(u) = &s.kind else {
            panic!("expected Update")
        };
        assert_eq!(u.name.name, "hist");
        assert_eq!(u.args.len(), 1);
        assert_eq!(u.rvars.len(), 2);
        assert_eq!(u.rvars[1].name.name, "s");
        assert_eq!(u.rvars[1].range.extent, 768);
    }

    #[test]
    fn update_without_over_clause() {
        let s = parse_one_stmt("update f(0) = f(0) + 1");
        let StatementKind::Update(u) = &s.kind else {
            panic!("expected Update")
        };
        assert!(u.rvars.is_empty());
    }

    // ── output_stmt ──

    #[test]
    fn output_with_estimates() {
        let s = parse_one_stmt("output blur_y(x: [0, 1024], y: [0, 768])");
        let StatementKind::Output(o) = &s.kind else {
            panic!("expected Output")
        };
        assert_eq!(o.name.name, "blur_y");
        assert_eq!(o.dims[1].range.map(|r| r.extent), Some(768));
    }

    #[test]
    fn multiple_statements() {
        let prog = parse_ok(
            "input img(x: [0, 100]): u8\n\nfunc f(x) = img(x)\noutput f(x: [0, 100])\n",
        );
        assert_eq!(prog.statements.len(), 3);
    }

    // ── Spans ──

    #[test]
    fn spans_cover_statement() {
        let prog = parse_ok("func f(x) = x");
        assert_eq!(prog.statements[0].span, SimpleSpan::from(0..13));
    }

    #[test]
    fn binary_span_merges_operands() {
        let value = func_value("func f(x) = x + 12");
        assert_eq!(value.span, SimpleSpan::from(12..18));
    }

    // ── Errors ──

    #[test]
    fn error_missing_equals() {
        let result = parse("func f(x) x + 1");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn error_unknown_statement() {
        let result = parse("stage f(x) = x");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn lex_errors_are_merged() {
        let result = parse("func f(x) = x $ 1");
        assert!(!result.errors.is_empty());
    }
}
