// emit.rs — Canonical schedule text
//
// Renders scheduling decisions one line per stage, in realization order:
//
//   <stage>: inline
//   <stage>: root [tile(<dim>=<n>, ...)] [parallel(<loop>[+<loop>...], <n>)] [vectorize(<loop>, <n>)]
//   <stage>: compute_at(<consumer>, <loop>) [vectorize(<loop>, <n>)]
//
// and parses the same syntax back, line by line, with the pipeline lexer.
//
// Tile, parallel and vectorize directives split the loops of the stage's pure
// definition only. Update definitions run serially, in declaration order,
// over their reduction domains, after the pure definition of the same region.
//
// Preconditions: none.
// Postconditions: `emit_schedule(&parse_schedule(&emit_schedule(s))?) ==
//   emit_schedule(s)`.
// Failure modes: malformed lines → `ScheduleError::MalformedSchedule` with the
//   1-based line number.
// Side effects: none.

use std::fmt;

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::error::ScheduleError;
use crate::lexer::Token;
use crate::schedule::{
    Granularity, ParallelSplit, ScheduledPipeline, StageDecision, TileExtent, VectorSplit,
};

// ── Rendering ───────────────────────────────────────────────────────────────

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Inline => write!(f, "inline"),
            Granularity::Root => write!(f, "root"),
            Granularity::At { consumer, loop_var } => {
                write!(f, "compute_at({consumer}, {loop_var})")
            }
        }
    }
}

impl fmt::Display for StageDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.granularity)?;
        if !self.tiles.is_empty() {
            let tiles: Vec<String> = self
                .tiles
                .iter()
                .map(|t| format!("{}={}", t.dim, t.extent))
                .collect();
            write!(f, " tile({})", tiles.join(", "))?;
        }
        if let Some(p) = &self.parallel {
            write!(f, " parallel({}, {})", p.loops.join("+"), p.factor)?;
        }
        if let Some(v) = &self.vector {
            write!(f, " vectorize({}, {})", v.loop_var, v.factor)?;
        }
        Ok(())
    }
}

impl fmt::Display for ScheduledPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.decisions {
            writeln!(f, "{d}")?;
        }
        Ok(())
    }
}

/// Canonical text of `sched`.
pub fn emit_schedule(sched: &ScheduledPipeline) -> String {
    sched.to_string()
}

// ── Parsing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Directive {
    Tile(Vec<(String, i64)>),
    Parallel(Vec<String>, i64),
    Vectorize(String, i64),
}

type RawDecision = (String, Granularity, Vec<Directive>);

/// Parse canonical schedule text. Blank lines and `#` comments are skipped.
pub fn parse_schedule(text: &str) -> Result<ScheduledPipeline, ScheduleError> {
    let mut sched = ScheduledPipeline::default();
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let source = raw.trim();
        if source.is_empty() || source.starts_with('#') {
            continue;
        }
        let (stage, granularity, directives) = parse_line(line, source)?;
        if sched.get(&stage).is_some() {
            return Err(malformed(line, format!("stage '{stage}' is scheduled twice")));
        }
        sched
            .decisions
            .push(build_decision(line, stage, granularity, directives)?);
    }
    Ok(sched)
}

fn malformed(line: usize, reason: impl Into<String>) -> ScheduleError {
    ScheduleError::MalformedSchedule {
        line,
        reason: reason.into(),
    }
}

fn parse_line(line: usize, source: &str) -> Result<RawDecision, ScheduleError> {
    let lexed = crate::lexer::lex(source);
    if let Some(e) = lexed.errors.first() {
        return Err(malformed(line, e.message.clone()));
    }
    let len = source.len();
    let tokens = lexed.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (raw, errors) = decision_parser(source).parse(stream).into_output_errors();
    match (raw, errors.first()) {
        (Some(raw), None) => Ok(raw),
        (_, Some(e)) => Err(malformed(line, e.to_string())),
        (None, None) => Err(malformed(line, "unparseable line")),
    }
}

fn decision_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, RawDecision, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // Pipeline keywords are plain names here.
    let word = one_of([
        Token::Ident,
        Token::Input,
        Token::Func,
        Token::Update,
        Token::Output,
        Token::Over,
    ])
    .map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });
    let keyword_word = word.clone();
    let keyword =
        move |name: &'static str| keyword_word.clone().filter(move |w: &String| w == name);
    let int = select! { Token::Int(v) => v };
    let comma = just(Token::Comma);

    // ── Granularity ──

    let granularity = choice((
        keyword("inline").to(Granularity::Inline),
        keyword("root").to(Granularity::Root),
        keyword("compute_at").ignore_then(
            word.clone()
                .then_ignore(comma.clone())
                .then(word.clone())
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map(|(consumer, loop_var)| Granularity::At { consumer, loop_var }),
        ),
    ));

    // ── Directives ──

    let tile = keyword("tile").ignore_then(
        word.clone()
            .then_ignore(just(Token::Equals))
            .then(int)
            .separated_by(comma.clone())
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(Directive::Tile),
    );

    let parallel = keyword("parallel").ignore_then(
        word.clone()
            .separated_by(just(Token::Plus))
            .at_least(1)
            .collect::<Vec<_>>()
            .then_ignore(comma.clone())
            .then(int)
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|(loops, factor)| Directive::Parallel(loops, factor)),
    );

    let vectorize = keyword("vectorize").ignore_then(
        word.clone()
            .then_ignore(comma)
            .then(int)
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|(var, factor)| Directive::Vectorize(var, factor)),
    );

    word.then_ignore(just(Token::Colon))
        .then(granularity)
        .then(choice((tile, parallel, vectorize)).repeated().collect::<Vec<_>>())
        .map(|((stage, granularity), directives)| (stage, granularity, directives))
}

/// Check directive placement and numeric ranges.
fn build_decision(
    line: usize,
    stage: String,
    granularity: Granularity,
    directives: Vec<Directive>,
) -> Result<StageDecision, ScheduleError> {
    let is_root = granularity == Granularity::Root;
    let is_inline = granularity == Granularity::Inline;
    let mut decision = StageDecision {
        stage,
        granularity,
        tiles: Vec::new(),
        parallel: None,
        vector: None,
    };

    for directive in directives {
        match directive {
            Directive::Tile(tiles) => {
                if !is_root {
                    return Err(malformed(line, "only root stages can be tiled"));
                }
                if !decision.tiles.is_empty() {
                    return Err(malformed(line, "duplicate tile directive"));
                }
                for (dim, extent) in tiles {
                    if extent < 1 {
                        return Err(malformed(line, format!("tile extent of '{dim}' must be positive")));
                    }
                    if decision.tile_of(&dim).is_some() {
                        return Err(malformed(line, format!("dimension '{dim}' tiled twice")));
                    }
                    decision.tiles.push(TileExtent { dim, extent });
                }
            }
            Directive::Parallel(loops, factor) => {
                if !is_root {
                    return Err(malformed(line, "only root stages can be parallel"));
                }
                if decision.parallel.is_some() {
                    return Err(malformed(line, "duplicate parallel directive"));
                }
                let factor = u64::try_from(factor)
                    .ok()
                    .filter(|f| *f >= 1)
                    .ok_or_else(|| malformed(line, "parallel factor must be positive"))?;
                decision.parallel = Some(ParallelSplit { loops, factor });
            }
            Directive::Vectorize(loop_var, factor) => {
                if is_inline {
                    return Err(malformed(line, "inline stages cannot be vectorized"));
                }
                if decision.vector.is_some() {
                    return Err(malformed(line, "duplicate vectorize directive"));
                }
                let factor = u32::try_from(factor)
                    .ok()
                    .filter(|f| *f >= 1)
                    .ok_or_else(|| malformed(line, "vector width must be a positive 32-bit integer"))?;
                decision.vector = Some(VectorSplit { loop_var, factor });
            }
        }
    }
    Ok(decision)
}

// ── Tests ───────────────────────────────────────────────────────────────────
