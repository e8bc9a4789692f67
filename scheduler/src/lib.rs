// autosched — automatic schedule generation for stage pipelines
//
// Library root. Front end (lexer, parser, resolve) builds a `Pipeline`;
// the scheduling passes (graph, bounds, inline, schedule, emit) run through
// the pass runner in `pipeline`.

pub mod ast;
pub mod bounds;
pub mod config;
pub mod cost;
pub mod diag;
pub mod dot;
pub mod emit;
pub mod error;
pub mod expr;
pub mod graph;
pub mod id;
pub mod inline;
pub mod lexer;
pub mod machine;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod region;
pub mod resolve;
pub mod schedule;
pub mod stage;

pub use config::SchedulerOptions;
pub use cost::{CostModel, DefaultCostModel};
pub use error::{GraphError, ScheduleError};
pub use machine::{MachineParams, Target};
pub use pipeline::{generate_schedules, generate_schedules_with};
pub use stage::Pipeline;
