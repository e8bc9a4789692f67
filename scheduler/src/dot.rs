// dot.rs — Graphviz DOT output for stage graphs
//
// Transforms a StageGraph into DOT format suitable for rendering with `dot`.
// Inputs are parallelograms, stages boxes, outputs double-bordered. When a
// fusion result is given, inlined stages are drawn dashed.
//
// Preconditions: `graph` is a fully constructed StageGraph; `fusion`, if
//   present, was computed on it.
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::graph::{Callee, StageGraph};
use crate::inline::FusionResult;

/// Emit the stage graph as a Graphviz DOT string.
pub fn emit_dot(graph: &StageGraph, fusion: Option<&FusionResult>) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "digraph autosched {{");
    let _ = writeln!(buf, "    rankdir=LR;");
    let _ = writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];");
    let _ = writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];");

    if !graph.inputs.is_empty() {
        let _ = writeln!(buf);
        for (i, input) in graph.inputs.iter().enumerate() {
            let _ = writeln!(
                buf,
                "    in{i} [label=\"{} (input)\", shape=parallelogram];",
                input.name
            );
        }
    }

    let _ = writeln!(buf);
    for &id in &graph.order {
        let node = graph.node(id);
        let mut attrs = vec![
            format!("label=\"{}({})\\n{}\"", node.name, node.dim_names().join(", "), node.elem),
            "shape=box".to_string(),
        ];
        if node.is_output {
            attrs.push("peripheries=2".to_string());
        }
        if fusion.is_some_and(|f| f.is_inlined(id)) {
            attrs.push("style=dashed".to_string());
        } else if node.recursive {
            attrs.push("style=bold".to_string());
        }
        let _ = writeln!(buf, "    s{} [{}];", id.index(), attrs.join(", "));
    }

    // Edges: producer -> consumer, labeled with the number of accesses.
    let _ = writeln!(buf);
    for &id in &graph.order {
        let node = graph.node(id);
        let mut reads: BTreeMap<Callee, usize> = BTreeMap::new();
        for call in &node.calls {
            *reads.entry(call.callee).or_insert(0) += 1;
        }
        for (callee, count) in reads {
            let source = match callee {
                Callee::Stage(p) => format!("s{}", p.index()),
                Callee::Input(i) => format!("in{i}"),
            };
            let label = if count > 1 {
                format!(" [label=\"x{count}\"]")
            } else {
                String::new()
            };
            let _ = writeln!(buf, "    {source} -> s{}{label};", id.index());
        }
    }

    let _ = writeln!(buf, "}}");
    buf
}

// ── Tests ───────────────────────────────────────────────────────────────────
