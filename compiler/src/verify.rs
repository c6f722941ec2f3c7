// verify.rs — Actor machine well-formedness (A1-A5)
//
// Checks an `ActorMachine` before any analysis touches it.
//
// Preconditions: none; the machine may come from untrusted JSON.
// Postconditions: `MachineCert` records A1-A5. When `all_pass()` holds, every
//   accessor on the machine is in range, the scope relation is a DAG, and
//   every control cycle leaves the trampoline through a Wait or an Exec.
// Failure modes: A1-A3 and A5 violations produce E02xx errors; A4 violations and
//   unreachable states produce W03xx warnings.
// Side effects: none.

use crate::am::{ActorMachine, Condition, Direction, Instruction};
use crate::ast::Span;
use crate::diag::{codes, Diagnostic};
use crate::id::StateId;
use crate::pass::StageCert;

// ── Certificate ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MachineCert {
    /// A1: every index reference is within its list.
    pub a1_references_in_range: bool,
    /// A2: the scope dependency relation is acyclic.
    pub a2_scopes_acyclic: bool,
    /// A3: at least one state, and the initial state exists.
    pub a3_initial_valid: bool,
    /// A4: every exec's port rates are covered by a dominating port test.
    /// Advisory: a violation is a warning, not a failed pass.
    pub a4_execs_guarded: bool,
    /// A5: every cycle of the state graph passes through a Wait or an Exec.
    pub a5_no_test_cycles: bool,
}

impl StageCert for MachineCert {
    fn all_pass(&self) -> bool {
        self.a1_references_in_range
            && self.a2_scopes_acyclic
            && self.a3_initial_valid
            && self.a5_no_test_cycles
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("A1_references_in_range", self.a1_references_in_range),
            ("A2_scopes_acyclic", self.a2_scopes_acyclic),
            ("A3_initial_valid", self.a3_initial_valid),
            ("A4_execs_guarded", self.a4_execs_guarded),
            ("A5_no_test_cycles", self.a5_no_test_cycles),
        ]
    }
}

pub struct VerifyResult {
    pub cert: MachineCert,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Verify one actor machine. `span` locates the actor in its source file
/// (any span will do for machines loaded from JSON).
pub fn verify_actor_machine(am: &ActorMachine, span: Span) -> VerifyResult {
    let mut checker = Checker {
        am,
        span,
        diagnostics: Vec::new(),
    };
    let a1 = checker.check_references();
    let a2 = checker.check_scope_cycles();
    let a3 = checker.check_initial();
    let (a4, a5) = if a1 && a3 {
        checker.warn_unreachable();
        (checker.check_guards(), checker.check_test_cycles())
    } else {
        (false, false)
    };
    VerifyResult {
        cert: MachineCert {
            a1_references_in_range: a1,
            a2_scopes_acyclic: a2,
            a3_initial_valid: a3,
            a4_execs_guarded: a4,
            a5_no_test_cycles: a5,
        },
        diagnostics: checker.diagnostics,
    }
}

struct Checker<'a> {
    am: &'a ActorMachine,
    span: Span,
    diagnostics: Vec<Diagnostic>,
}

impl Checker<'_> {
    fn error(&mut self, code: crate::diag::DiagCode, message: String) {
        self.diagnostics.push(
            Diagnostic::error(self.span, format!("actor '{}': {message}", self.am.name))
                .with_code(code),
        );
    }

    fn warning(&mut self, code: crate::diag::DiagCode, message: String) {
        self.diagnostics.push(
            Diagnostic::warning(self.span, format!("actor '{}': {message}", self.am.name))
                .with_code(code),
        );
    }

    fn in_range(&mut self, ok: &mut bool, index: usize, len: usize, what: impl FnOnce() -> String) {
        if index >= len {
            *ok = false;
            self.error(
                codes::E0201,
                format!("{} out of range (have {len})", what()),
            );
        }
    }

    // ── A1 ──

    fn check_references(&mut self) -> bool {
        let am = self.am;
        let mut ok = true;
        let n_scopes = am.scopes.len();

        for (i, scope) in am.scopes.iter().enumerate() {
            for r in &scope.reads {
                self.in_range(&mut ok, r.index(), n_scopes, || {
                    format!("scope {i} reads {r}")
                });
            }
        }

        for (i, cond) in am.conditions.iter().enumerate() {
            match cond {
                Condition::Port(p) => {
                    let len = match p.direction {
                        Direction::Input => am.inputs.len(),
                        Direction::Output => am.outputs.len(),
                    };
                    self.in_range(&mut ok, p.port.index(), len, || {
                        format!("condition c{i} names port {}", p.port)
                    });
                }
                Condition::Predicate(pred) => {
                    for r in &pred.reads {
                        self.in_range(&mut ok, r.index(), n_scopes, || {
                            format!("condition c{i} reads {r}")
                        });
                    }
                }
            }
        }

        for (i, t) in am.transitions.iter().enumerate() {
            for rate in &t.input_rates {
                self.in_range(&mut ok, rate.port.index(), am.inputs.len(), || {
                    format!("transition t{i} consumes from input {}", rate.port)
                });
            }
            for rate in &t.output_rates {
                self.in_range(&mut ok, rate.port.index(), am.outputs.len(), || {
                    format!("transition t{i} produces to output {}", rate.port)
                });
            }
            for r in t.reads.iter().chain(&t.kills) {
                self.in_range(&mut ok, r.index(), n_scopes, || {
                    format!("transition t{i} refers to {r}")
                });
            }
        }

        let n_states = am.states.len();
        for id in am.state_ids() {
            let instr = am.state(id).instruction;
            match instr {
                Instruction::Test { condition, .. } => {
                    self.in_range(&mut ok, condition.index(), am.conditions.len(), || {
                        format!("state {id} tests {condition}")
                    });
                }
                Instruction::Exec { transition, .. } => {
                    self.in_range(&mut ok, transition.index(), am.transitions.len(), || {
                        format!("state {id} executes {transition}")
                    });
                }
                Instruction::Wait { .. } => {}
            }
            for succ in instr.successors() {
                self.in_range(&mut ok, succ.index(), n_states, || {
                    format!("state {id} jumps to {succ}")
                });
            }
        }

        ok
    }

    // ── A2 ──

    fn check_scope_cycles(&mut self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let am = self.am;
        let scopes = &am.scopes;
        let mut marks = vec![Mark::White; scopes.len()];
        let mut ok = true;

        for root in 0..scopes.len() {
            if marks[root] != Mark::White {
                continue;
            }
            // Iterative DFS: (scope, next read to visit).
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::Grey;
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let reads = &scopes[node].reads;
                if top.1 < reads.len() {
                    let dep = reads[top.1].index();
                    top.1 += 1;
                    if dep >= scopes.len() {
                        continue;
                    }
                    match marks[dep] {
                        Mark::White => {
                            marks[dep] = Mark::Grey;
                            stack.push((dep, 0));
                        }
                        Mark::Grey => {
                            ok = false;
                            self.error(
                                codes::E0202,
                                format!("scope dependency cycle through scope{dep}"),
                            );
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    stack.pop();
                }
            }
        }
        ok
    }

    // ── A3 ──

    fn check_initial(&mut self) -> bool {
        if self.am.states.is_empty() {
            self.error(codes::E0203, "controller has no states".into());
            return false;
        }
        if self.am.initial.index() >= self.am.states.len() {
            self.error(
                codes::E0203,
                format!("initial state {} does not exist", self.am.initial),
            );
            return false;
        }
        true
    }

    // ── A5 ──

    /// A cycle made only of Test states never reaches a Wait, so the
    /// scheduling routine would spin on it without returning.
    fn check_test_cycles(&mut self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let am = self.am;
        let n = am.states.len();
        let is_test = |s: usize| matches!(am.states[s].instruction, Instruction::Test { .. });
        let test_succs = |s: usize| -> Vec<usize> {
            match am.states[s].instruction {
                Instruction::Test {
                    if_true, if_false, ..
                } => [if_true.index(), if_false.index()]
                    .into_iter()
                    .filter(|&t| is_test(t))
                    .collect(),
                _ => Vec::new(),
            }
        };

        let mut marks = vec![Mark::White; n];
        let mut ok = true;
        for root in (0..n).filter(|&s| is_test(s)) {
            if marks[root] != Mark::White {
                continue;
            }
            let mut stack = vec![(root, test_succs(root), 0usize)];
            marks[root] = Mark::Grey;
            while let Some(top) = stack.last_mut() {
                if top.2 < top.1.len() {
                    let next = top.1[top.2];
                    top.2 += 1;
                    match marks[next] {
                        Mark::White => {
                            marks[next] = Mark::Grey;
                            stack.push((next, test_succs(next), 0));
                        }
                        Mark::Grey => {
                            ok = false;
                            self.error(
                                codes::E0204,
                                format!(
                                    "state {} lies on a cycle of tests with no wait or exec",
                                    StateId::from_index(next)
                                ),
                            );
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[top.0] = Mark::Black;
                    stack.pop();
                }
            }
        }
        ok
    }

    // ── Reachability ──

    fn warn_unreachable(&mut self) {
        let am = self.am;
        let mut seen = vec![false; am.states.len()];
        let mut stack = vec![am.initial];
        seen[am.initial.index()] = true;
        while let Some(s) = stack.pop() {
            for succ in am.state(s).instruction.successors() {
                if !seen[succ.index()] {
                    seen[succ.index()] = true;
                    stack.push(succ);
                }
            }
        }
        for (i, reached) in seen.iter().enumerate() {
            if !reached {
                self.warning(
                    codes::W0302,
                    format!("state {} is unreachable", StateId::from_index(i)),
                );
            }
        }
    }

    // ── A4 ──

    /// Forward must-analysis of guaranteed tokens (per input) and room
    /// (per output). Entry states guarantee nothing; a passed port test
    /// raises the guarantee to its threshold; an exec lowers it by its rate.
    fn check_guards(&mut self) -> bool {
        let am = self.am;
        let entry = Guarantee {
            tokens: vec![0; am.inputs.len()],
            room: vec![0; am.outputs.len()],
        };

        let mut state_in: Vec<Option<Guarantee>> = vec![None; am.states.len()];
        let mut worklist: Vec<StateId> = Vec::new();
        for s in std::iter::once(am.initial).chain(am.wait_targets()) {
            if state_in[s.index()].is_none() {
                state_in[s.index()] = Some(entry.clone());
                worklist.push(s);
            }
        }

        while let Some(s) = worklist.pop() {
            let Some(g) = state_in[s.index()].clone() else {
                continue;
            };
            let edges: Vec<(StateId, Guarantee)> = match am.state(s).instruction {
                Instruction::Test {
                    condition,
                    if_true,
                    if_false,
                } => {
                    let mut on_true = g.clone();
                    if let Condition::Port(p) = am.condition(condition) {
                        let slot = match p.direction {
                            Direction::Input => &mut on_true.tokens[p.port.index()],
                            Direction::Output => &mut on_true.room[p.port.index()],
                        };
                        *slot = (*slot).max(p.threshold);
                    }
                    vec![(if_true, on_true), (if_false, g)]
                }
                Instruction::Wait { target } => vec![(target, entry.clone())],
                Instruction::Exec { transition, target } => {
                    let t = am.transition(transition);
                    let mut after = g;
                    for r in &t.input_rates {
                        let slot = &mut after.tokens[r.port.index()];
                        *slot = slot.saturating_sub(r.tokens);
                    }
                    for r in &t.output_rates {
                        let slot = &mut after.room[r.port.index()];
                        *slot = slot.saturating_sub(r.tokens);
                    }
                    vec![(target, after)]
                }
            };

            for (succ, out) in edges {
                let slot = &mut state_in[succ.index()];
                let changed = match slot {
                    None => {
                        *slot = Some(out);
                        true
                    }
                    Some(existing) => existing.meet(&out),
                };
                if changed {
                    worklist.push(succ);
                }
            }
        }

        let mut ok = true;
        for s in am.state_ids() {
            let Instruction::Exec { transition, .. } = am.state(s).instruction else {
                continue;
            };
            let Some(g) = &state_in[s.index()] else {
                continue;
            };
            let t = am.transition(transition);
            let mut unguarded = Vec::new();
            for r in &t.input_rates {
                if g.tokens[r.port.index()] < r.tokens {
                    unguarded.push(format!(
                        "consumes {} from '{}' (guaranteed {})",
                        r.tokens,
                        am.port_name(r.port, Direction::Input),
                        g.tokens[r.port.index()]
                    ));
                }
            }
            for r in &t.output_rates {
                if g.room[r.port.index()] < r.tokens {
                    unguarded.push(format!(
                        "produces {} to '{}' (guaranteed room {})",
                        r.tokens,
                        am.port_name(r.port, Direction::Output),
                        g.room[r.port.index()]
                    ));
                }
            }
            for what in unguarded {
                ok = false;
                self.warning(
                    codes::W0301,
                    format!("state {s} executes {transition}, which {what}"),
                );
            }
        }
        ok
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Guarantee {
    tokens: Vec<u32>,
    room: Vec<u32>,
}

impl Guarantee {
    /// Elementwise minimum. Returns true if `self` changed.
    fn meet(&mut self, other: &Guarantee) -> bool {
        let mut changed = false;
        for (a, b) in self
            .tokens
            .iter_mut()
            .zip(&other.tokens)
            .chain(self.room.iter_mut().zip(&other.room))
        {
            if *b < *a {
                *a = *b;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::*;
    use crate::id::*;

    fn span() -> Span {
        use chumsky::span::Span as _;
        Span::new((), 0..0)
    }

    fn from_source(src: &str) -> ActorMachine {
        let parsed = crate::parser::parse(src);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let lowered = crate::lower::lower_file(&parsed.file.unwrap());
        assert!(!lowered.has_errors(), "{:?}", lowered.diagnostics);
        lowered.machines.into_iter().next().unwrap()
    }

    fn codes_of(result: &VerifyResult) -> Vec<&'static str> {
        result
            .diagnostics
            .iter()
            .filter_map(|d| d.code.map(|c| c.0))
            .collect()
    }

    const COPY: &str = r#"
        actor Copy {
            input IN; output OUT;
            condition 0 = tokens IN 1;
            condition 1 = space OUT 1;
            transition 0 = "copy" consume IN 1 produce OUT 1;
            initial 0;
            state 0 = test 0 -> 1 else 3;
            state 1 = test 1 -> 2 else 3;
            state 2 = exec 0 -> 0;
            state 3 = wait -> 0;
        }
    "#;

    #[test]
    fn guarded_copy_passes_everything() {
        let result = verify_actor_machine(&from_source(COPY), span());
        assert!(result.cert.all_pass());
        assert!(result.cert.a4_execs_guarded);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unguarded_consumption_warns() {
        let am = from_source(
            r#"actor A {
                input IN;
                transition 0 = "eat" consume IN 1;
                initial 0;
                state 0 = exec 0 -> 1;
                state 1 = wait -> 0;
            }"#,
        );
        let result = verify_actor_machine(&am, span());
        assert!(result.cert.all_pass());
        assert!(!result.cert.a4_execs_guarded);
        assert_eq!(codes_of(&result), vec!["W0301"]);
    }

    #[test]
    fn guard_is_lost_after_consuming_it() {
        // One test for 1 token, then two execs consuming 1 each.
        let am = from_source(
            r#"actor A {
                input IN;
                condition 0 = tokens IN 1;
                transition 0 = "eat" consume IN 1;
                initial 0;
                state 0 = test 0 -> 1 else 3;
                state 1 = exec 0 -> 2;
                state 2 = exec 0 -> 3;
                state 3 = wait -> 0;
            }"#,
        );
        let result = verify_actor_machine(&am, span());
        assert_eq!(codes_of(&result), vec!["W0301"]);
        assert!(result.diagnostics[0].message.contains("S2"));
    }

    #[test]
    fn guard_must_hold_on_every_path() {
        // S3 is reachable with and without the test passing.
        let am = from_source(
            r#"actor A {
                input IN;
                condition 0 = tokens IN 1;
                condition 1 = guard "flag";
                transition 0 = "eat" consume IN 1;
                initial 0;
                state 0 = test 1 -> 1 else 2;
                state 1 = test 0 -> 2 else 4;
                state 2 = exec 0 -> 4;
                state 3 = wait -> 0;
                state 4 = wait -> 0;
            }"#,
        );
        let result = verify_actor_machine(&am, span());
        assert_eq!(codes_of(&result), vec!["W0302", "W0301"]);
    }

    #[test]
    fn dangling_state_target_is_an_error() {
        let mut am = from_source(COPY);
        am.states[3].instruction = Instruction::Wait { target: StateId(9) };
        let result = verify_actor_machine(&am, span());
        assert!(!result.cert.a1_references_in_range);
        assert!(!result.cert.all_pass());
        assert_eq!(codes_of(&result), vec!["E0201"]);
    }

    #[test]
    fn dangling_port_is_an_error() {
        let mut am = from_source(COPY);
        am.transitions[0].output_rates[0].port = PortId(4);
        let result = verify_actor_machine(&am, span());
        assert!(!result.cert.a1_references_in_range);
    }

    #[test]
    fn scope_cycle_is_an_error() {
        let am = from_source(
            r#"actor A {
                scope 0 transient reads [1];
                scope 1 transient reads [0];
                initial 0;
                state 0 = wait -> 0;
            }"#,
        );
        let result = verify_actor_machine(&am, span());
        assert!(!result.cert.a2_scopes_acyclic);
        assert_eq!(codes_of(&result), vec!["E0202"]);
    }

    #[test]
    fn self_reading_scope_is_a_cycle() {
        let am = from_source(
            "actor A { scope 0 persistent reads [0]; initial 0; state 0 = wait -> 0; }",
        );
        assert!(!verify_actor_machine(&am, span()).cert.a2_scopes_acyclic);
    }

    #[test]
    fn bad_initial_is_an_error() {
        let mut am = from_source(COPY);
        am.initial = StateId(17);
        let result = verify_actor_machine(&am, span());
        assert!(!result.cert.a3_initial_valid);
        assert_eq!(codes_of(&result), vec!["E0203"]);
    }

    #[test]
    fn empty_controller_is_an_error() {
        let mut am = from_source(COPY);
        am.states.clear();
        am.initial = StateId(0);
        let result = verify_actor_machine(&am, span());
        assert!(!result.cert.a3_initial_valid);
    }

    #[test]
    fn test_only_cycle_is_an_error() {
        let am = from_source(
            r#"actor Spin {
                input IN;
                condition 0 = tokens IN 1;
                initial 0;
                state 0 = test 0 -> 0 else 1;
                state 1 = wait -> 0;
            }"#,
        );
        let result = verify_actor_machine(&am, span());
        assert!(!result.cert.a5_no_test_cycles);
        assert!(!result.cert.all_pass());
        assert_eq!(codes_of(&result), vec!["E0204"]);
        assert!(result.diagnostics[0].message.contains("S0"));
    }

    #[test]
    fn longer_test_cycle_is_found() {
        let am = from_source(
            r#"actor Loop {
                input IN; output OUT;
                condition 0 = tokens IN 1;
                condition 1 = space OUT 1;
                initial 0;
                state 0 = test 0 -> 1 else 2;
                state 1 = test 1 -> 0 else 2;
                state 2 = wait -> 0;
            }"#,
        );
        let result = verify_actor_machine(&am, span());
        assert!(!result.cert.a5_no_test_cycles);
        assert_eq!(codes_of(&result), vec!["E0204"]);
    }

    #[test]
    fn cycles_through_exec_or_wait_are_fine() {
        let result = verify_actor_machine(&from_source(COPY), span());
        assert!(result.cert.a5_no_test_cycles);

        // Tests may share successors without forming a cycle.
        let am = from_source(
            r#"actor Diamond {
                input IN;
                condition 0 = tokens IN 1;
                condition 1 = guard "a";
                transition 0 = "eat" consume IN 1;
                initial 0;
                state 0 = test 1 -> 1 else 2;
                state 1 = test 0 -> 3 else 4;
                state 2 = test 0 -> 3 else 4;
                state 3 = exec 0 -> 0;
                state 4 = wait -> 0;
            }"#,
        );
        let result = verify_actor_machine(&am, span());
        assert!(result.cert.a5_no_test_cycles);
        assert!(result.cert.all_pass());
    }
}
