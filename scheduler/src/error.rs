// error.rs — Scheduling error kinds
//
// Every failure of a scheduling run is a `ScheduleError`. All are fatal for
// the run; none are retried. Each converts into a coded `Diagnostic` that
// points at the offending stage when the pipeline came from source text.
//
// Preconditions: none.
// Postconditions: `to_diagnostic` always yields an error-level diagnostic.
// Failure modes: none.
// Side effects: none.

use thiserror::Error;

use crate::ast::{synthetic_span, Span};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::stage::Pipeline;

/// Structural problems of the stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("dependency cycle through stages {}", .stages.join(" -> "))]
    Cycle { stages: Vec<String> },

    #[error("stage '{stage}' is not an output and has no consumers")]
    Dangling { stage: String },

    #[error("output '{name}' is not a stage of the pipeline")]
    UnknownOutput { name: String },

    #[error("pipeline declares no outputs")]
    NoOutputs,

    #[error("stage '{consumer}' reads unknown stage or input '{callee}'")]
    UnknownCallee { consumer: String, callee: String },

    #[error("stage '{consumer}' reads '{callee}' with {found} indices, expected {expected}")]
    Arity {
        consumer: String,
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("name '{name}' is defined more than once")]
    Duplicate { name: String },

    #[error("dimension '{dim}' of stage '{stage}' clashes with the tile loops of '{tiled}'")]
    LoopNameClash {
        stage: String,
        dim: String,
        tiled: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("output '{stage}' has no estimate for dimension '{dim}'")]
    MissingEstimate { stage: String, dim: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("region of stage '{stage}' along '{dim}' cannot be bounded")]
    UnboundedRegion { stage: String, dim: String },

    #[error("malformed machine parameters '{input}': {reason}")]
    MalformedMachineParams { input: String, reason: String },

    #[error("malformed target '{input}': {reason}")]
    MalformedTarget { input: String, reason: String },

    #[error("malformed schedule at line {line}: {reason}")]
    MalformedSchedule { line: usize, reason: String },

    #[error("schedule verification failed: {}", .failed.join(", "))]
    Verification { failed: Vec<String> },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScheduleError {
    pub fn code(&self) -> DiagCode {
        match self {
            ScheduleError::MissingEstimate { .. } => codes::E0100,
            ScheduleError::Graph(GraphError::Cycle { .. }) => codes::E0101,
            ScheduleError::Graph(GraphError::Dangling { .. }) => codes::E0102,
            ScheduleError::Graph(_) => codes::E0103,
            ScheduleError::UnboundedRegion { .. } => codes::E0200,
            ScheduleError::MalformedMachineParams { .. } => codes::E0300,
            ScheduleError::MalformedTarget { .. } => codes::E0301,
            ScheduleError::MalformedSchedule { .. } => codes::E0400,
            ScheduleError::Verification { .. } | ScheduleError::Internal(_) => codes::E0500,
        }
    }

    /// Name of the stage the error is about, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            ScheduleError::MissingEstimate { stage, .. }
            | ScheduleError::UnboundedRegion { stage, .. } => Some(stage.as_str()),
            ScheduleError::Graph(GraphError::Dangling { stage }) => Some(stage.as_str()),
            ScheduleError::Graph(GraphError::Cycle { stages }) => stages.first().map(String::as_str),
            ScheduleError::Graph(GraphError::LoopNameClash { stage, .. }) => Some(stage.as_str()),
            ScheduleError::Graph(GraphError::UnknownCallee { consumer, .. })
            | ScheduleError::Graph(GraphError::Arity { consumer, .. }) => Some(consumer.as_str()),
            ScheduleError::Graph(GraphError::UnknownOutput { name })
            | ScheduleError::Graph(GraphError::Duplicate { name }) => Some(name.as_str()),
            _ => None,
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            ScheduleError::MissingEstimate { .. } => {
                Some("give every output dimension an estimate: output f(x: [min, extent], ...)")
            }
            ScheduleError::UnboundedRegion { .. } => {
                Some("declare a domain for the dimension: func f(x: [min, extent]) = ...")
            }
            ScheduleError::Graph(GraphError::Dangling { .. }) => {
                Some("remove the stage or declare it as an output")
            }
            ScheduleError::Graph(GraphError::LoopNameClash { .. }) => {
                Some("rename the dimension: '<dim>_o' and '<dim>_i' name the tile loops of '<dim>'")
            }
            ScheduleError::MalformedMachineParams { .. } => {
                Some("expected '<parallelism>,<cache_kb>,<balance>' with positive integers")
            }
            ScheduleError::MalformedTarget { .. } => {
                Some("expected '<arch>-<bits>[-<feature>...]', e.g. x86-64-avx2, or 'host'")
            }
            _ => None,
        }
    }

    /// Convert into a user-facing diagnostic. The span points at the
    /// offending stage when it is known.
    pub fn to_diagnostic(&self, pipeline: Option<&Pipeline>) -> Diagnostic {
        let span: Span = self
            .stage()
            .and_then(|name| pipeline.and_then(|p| p.find_stage(name)))
            .map(|s| s.span)
            .unwrap_or_else(synthetic_span);
        let mut diag =
            Diagnostic::new(DiagLevel::Error, span, self.to_string()).with_code(self.code());
        if let Some(hint) = self.hint() {
            diag = diag.with_hint(hint);
        }
        if let (ScheduleError::Graph(GraphError::Cycle { stages }), Some(p)) = (self, pipeline) {
            for name in stages.iter().skip(1) {
                if let Some(stage) = p.find_stage(name) {
                    diag = diag.with_related(stage.span, format!("'{name}' is on the cycle"));
                }
            }
        }
        diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_names_stages() {
        let err = ScheduleError::from(GraphError::Cycle {
            stages: vec!["a".into(), "b".into(), "a".into()],
        });
        assert_eq!(err.to_string(), "dependency cycle through stages a -> b -> a");
        assert_eq!(err.code(), codes::E0101);
        assert_eq!(err.stage(), Some("a"));
    }

    #[test]
    fn missing_estimate_diagnostic() {
        let err = ScheduleError::MissingEstimate {
            stage: "out".into(),
            dim: "y".into(),
        };
        let diag = err.to_diagnostic(None);
        assert_eq!(diag.code, Some(codes::E0100));
        assert!(diag.message.contains("'out'"));
        assert!(diag.message.contains("'y'"));
        assert!(diag.hint.is_some());
    }

    #[test]
    fn unbounded_region_names_stage_and_dim() {
        let err = ScheduleError::UnboundedRegion {
            stage: "lut".into(),
            dim: "i".into(),
        };
        assert_eq!(
            err.to_string(),
            "region of stage 'lut' along 'i' cannot be bounded"
        );
        assert_eq!(err.code(), codes::E0200);
    }
}
