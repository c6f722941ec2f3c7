// pass.rs — Pass descriptor module: metadata, dependency resolution, certificates
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Certificates ───────────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass met its post-conditions.
pub trait StageCert {
    /// True iff every obligation holds.
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse is handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Lower,
    Verify,
    AnalyzeScopes,
    BuildController,
    Codegen,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Machines,    // Vec<ActorMachine>
    MachineCert, // Vec<MachineCert>
    ScopePlans,  // Vec<ScopeInitPlan>
    Controllers, // Vec<Controller>
    Generated,   // Vec<GeneratedCode>
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[],
            outputs: &[ArtifactId::Machines],
            invariants: "indices dense and ordered, ports resolved, one initial state",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::MachineCert],
            invariants: "A1-A5: references in range, acyclic scopes, valid initial, guarded execs, no test-only cycles",
        },
        PassId::AnalyzeScopes => PassDescriptor {
            name: "analyze_scopes",
            inputs: &[PassId::Verify],
            outputs: &[ArtifactId::ScopePlans],
            invariants: "every read scope initialized since its last invalidation",
        },
        PassId::BuildController => PassDescriptor {
            name: "build_controller",
            inputs: &[PassId::AnalyzeScopes],
            outputs: &[ArtifactId::Controllers],
            invariants: "C1-C3: valid jumps, dispatch = wait targets, ordered initializers",
        },
        PassId::Codegen => PassDescriptor {
            name: "codegen",
            inputs: &[PassId::BuildController],
            outputs: &[ArtifactId::Generated],
            invariants: "one scheduling routine per actor for the selected target",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 5] = [
    PassId::Lower,
    PassId::Verify,
    PassId::AnalyzeScopes,
    PassId::BuildController,
    PassId::Codegen,
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

// ── Tests ──────────────────────────────────────────────────────────────────
