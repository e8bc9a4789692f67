// pass.rs — Pass descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the scheduler's passes (loading the pipeline is outside the
// runner), their dependency edges, and the artifacts they produce. The runner
// uses `required_passes` to run only what an --emit target needs.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each scheduler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    BuildGraph,
    Bounds,
    Fusion,
    Search,
    Emit,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Graph,    // StageGraph
    Bounds,   // BoundsEstimate
    Fusion,   // FusionResult
    Schedule, // ScheduledPipeline
    Cert,     // ScheduleCert
    Text,     // canonical schedule text
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a scheduler pass.
pub struct PassDescriptor {
    /// Name used in verbose output and timing logs.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions, documentation only.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::BuildGraph => PassDescriptor {
            name: "build_graph",
            inputs: &[],
            outputs: &[ArtifactId::Graph],
            invariants: "acyclic, every stage reaches an output, realization order fixed",
        },
        PassId::Bounds => PassDescriptor {
            name: "bounds",
            inputs: &[PassId::BuildGraph],
            outputs: &[ArtifactId::Bounds],
            invariants: "every stage and input has a finite region",
        },
        PassId::Fusion => PassDescriptor {
            name: "fusion",
            inputs: &[PassId::BuildGraph],
            outputs: &[ArtifactId::Fusion],
            invariants: "outputs and stages with updates are never inlined",
        },
        PassId::Search => PassDescriptor {
            name: "search",
            inputs: &[PassId::Bounds, PassId::Fusion],
            outputs: &[ArtifactId::Schedule, ArtifactId::Cert],
            invariants: "one decision per stage, attachments acyclic",
        },
        PassId::Emit => PassDescriptor {
            name: "emit",
            inputs: &[PassId::Search],
            outputs: &[ArtifactId::Text],
            invariants: "one line per stage in realization order",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 5] = [
    PassId::BuildGraph,
    PassId::Bounds,
    PassId::Fusion,
    PassId::Search,
    PassId::Emit,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Certificates ───────────────────────────────────────────────────────────

/// Result of checking a pass's postconditions. Each obligation is a named
/// boolean; the certificate passes when all of them hold.
pub trait StageCert {
    fn all_pass(&self) -> bool {
        self.obligations().iter().all(|(_, ok)| *ok)
    }

    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that do not hold.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_fusion_skips_bounds() {
        let passes = required_passes(PassId::Fusion);
        assert_eq!(passes, vec![PassId::BuildGraph, PassId::Fusion]);
    }

    #[test]
    fn required_passes_emit_includes_all() {
        let passes = required_passes(PassId::Emit);
        assert_eq!(passes, ALL_PASSES.to_vec());
    }

    #[test]
    fn required_passes_build_graph_is_minimal() {
        assert_eq!(required_passes(PassId::BuildGraph), vec![PassId::BuildGraph]);
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            assert!(
                !descriptor(*pass).outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependencies_precede_dependents() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass);
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                assert!(
                    dep_pos < self_pos,
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }

    struct Fixed(Vec<(&'static str, bool)>);

    impl StageCert for Fixed {
        fn obligations(&self) -> Vec<(&'static str, bool)> {
            self.0.clone()
        }
    }

    #[test]
    fn cert_fails_when_any_obligation_fails() {
        let ok = Fixed(vec![("a", true), ("b", true)]);
        assert!(ok.all_pass());
        assert!(ok.failed().is_empty());

        let bad = Fixed(vec![("a", true), ("b", false)]);
        assert!(!bad.all_pass());
        assert_eq!(bad.failed(), vec!["b"]);
    }
}
