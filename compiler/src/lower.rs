// lower.rs — Source lowering (AST → ActorMachine)
//
// Turns each parsed `actor { ... }` block into an `ActorMachine`: resolves
// port names to dense port ids, checks that explicit indices are dense and
// in declaration order, and collects the designated initial state.
//
// Preconditions: `file` is the parser's output (possibly from a file that
//   also produced parse errors; lowering still runs on what parsed).
// Postconditions: one `ActorMachine` per actor that lowered without errors.
//   Index references into other lists (state targets, condition ids, ...)
//   are copied through unchecked; `verify` checks them.
// Failure modes: naming/ordering violations produce E01xx diagnostics; the
//   offending actor is dropped from the result.
// Side effects: none.

use std::collections::HashMap;

use crate::am::{
    ActorMachine, Condition, Direction, Instruction, PortCondition, PortDecl, PortRate,
    PredicateCondition, Scope, ScopeKind, State, Transition,
};
use crate::ast::{
    ActorDef, ConditionBody, File, Ident, Index, InstrAst, ItemKind, RateKind, ScopeLifetime,
    Span,
};
use crate::diag::{codes, Diagnostic};
use crate::id::{ConditionId, IdAllocator, PortId, ScopeId, StateId, TransitionId};

// ── Output types ────────────────────────────────────────────────────────────

pub struct LowerResult {
    pub machines: Vec<ActorMachine>,
    /// Span of each machine's actor name, parallel to `machines`.
    pub spans: Vec<Span>,
    pub diagnostics: Vec<Diagnostic>,
}

impl LowerResult {
    pub fn has_errors(&self) -> bool {
        crate::diag::has_errors(&self.diagnostics)
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub fn lower_file(file: &File) -> LowerResult {
    let mut machines = Vec::new();
    let mut spans = Vec::new();
    let mut diagnostics = Vec::new();
    let mut seen: HashMap<&str, Span> = HashMap::new();

    for actor in &file.actors {
        if let Some(prev) = seen.get(actor.name.name.as_str()) {
            diagnostics.push(
                Diagnostic::error(
                    actor.name.span,
                    format!("duplicate actor '{}'", actor.name.name),
                )
                .with_code(codes::E0105)
                .with_related(*prev, "first defined here"),
            );
            continue;
        }
        seen.insert(&actor.name.name, actor.name.span);

        let mut lowerer = ActorLowerer::new(actor);
        let machine = lowerer.lower();
        let failed = crate::diag::has_errors(&lowerer.diagnostics);
        diagnostics.append(&mut lowerer.diagnostics);
        if let (Some(machine), false) = (machine, failed) {
            machines.push(machine);
            spans.push(actor.name.span);
        }
    }

    LowerResult {
        machines,
        spans,
        diagnostics,
    }
}

// ── Per-actor lowering ──────────────────────────────────────────────────────

struct ActorLowerer<'a> {
    actor: &'a ActorDef,
    ports: HashMap<&'a str, (Direction, PortId, Span)>,
    inputs: Vec<PortDecl>,
    outputs: Vec<PortDecl>,
    input_ids: IdAllocator,
    output_ids: IdAllocator,
    scope_ids: IdAllocator,
    condition_ids: IdAllocator,
    transition_ids: IdAllocator,
    state_ids: IdAllocator,
    scopes: Vec<Scope>,
    conditions: Vec<Condition>,
    transitions: Vec<Transition>,
    states: Vec<State>,
    initial: Option<(StateId, Span)>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ActorLowerer<'a> {
    fn new(actor: &'a ActorDef) -> Self {
        ActorLowerer {
            actor,
            ports: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_ids: IdAllocator::new(),
            output_ids: IdAllocator::new(),
            scope_ids: IdAllocator::new(),
            condition_ids: IdAllocator::new(),
            transition_ids: IdAllocator::new(),
            state_ids: IdAllocator::new(),
            scopes: Vec::new(),
            conditions: Vec::new(),
            transitions: Vec::new(),
            states: Vec::new(),
            initial: None,
            diagnostics: Vec::new(),
        }
    }

    fn lower(&mut self) -> Option<ActorMachine> {
        let actor = self.actor;

        // Ports first: items may use a port before its declaration line.
        for item in &actor.items {
            match &item.kind {
                ItemKind::Input(name) => self.declare_port(name, Direction::Input),
                ItemKind::Output(name) => self.declare_port(name, Direction::Output),
                _ => {}
            }
        }

        for item in &actor.items {
            match &item.kind {
                ItemKind::Input(_) | ItemKind::Output(_) => {}
                ItemKind::Scope(s) => {
                    self.expect_next(s.index, "scope", IndexSpace::Scope);
                    let reads = self.scope_list(&s.reads);
                    self.scopes.push(Scope {
                        kind: match s.lifetime {
                            ScopeLifetime::Transient => ScopeKind::Transient,
                            ScopeLifetime::Persistent => ScopeKind::Persistent,
                        },
                        declarations: s.declarations.iter().map(|d| d.name.clone()).collect(),
                        reads,
                    });
                }
                ItemKind::Condition(c) => {
                    self.expect_next(c.index, "condition", IndexSpace::Condition);
                    let condition = match &c.body {
                        ConditionBody::Tokens { port, count } => {
                            self.port_condition(port, *count, Direction::Input)
                        }
                        ConditionBody::Space { port, count } => {
                            self.port_condition(port, *count, Direction::Output)
                        }
                        ConditionBody::Guard { expr, reads, .. } => {
                            Condition::Predicate(PredicateCondition {
                                expr: expr.clone(),
                                reads: self.scope_list(reads),
                            })
                        }
                    };
                    self.conditions.push(condition);
                }
                ItemKind::Transition(t) => {
                    self.expect_next(t.index, "transition", IndexSpace::Transition);
                    let mut input_rates = Vec::new();
                    let mut output_rates = Vec::new();
                    for rate in &t.rates {
                        let (direction, list) = match rate.kind {
                            RateKind::Consume => (Direction::Input, &mut input_rates),
                            RateKind::Produce => (Direction::Output, &mut output_rates),
                        };
                        let port = self.resolve_port(&rate.port, direction);
                        let tokens = self.narrow(rate.count);
                        list.push(PortRate { port, tokens });
                    }
                    let reads = self.scope_list(&t.reads);
                    let kills = self.scope_list(&t.kills);
                    self.transitions.push(Transition {
                        body: t.body.clone(),
                        input_rates,
                        output_rates,
                        reads,
                        kills,
                        latency: t.latency.map_or(0, |l| l.value),
                    });
                }
                ItemKind::Initial(index) => {
                    let id = StateId(self.narrow(*index));
                    match self.initial {
                        Some((_, prev)) => self.diagnostics.push(
                            Diagnostic::error(index.span, "initial state declared twice")
                                .with_code(codes::E0104)
                                .with_related(prev, "first declared here"),
                        ),
                        None => self.initial = Some((id, index.span)),
                    }
                }
                ItemKind::State(s) => {
                    self.expect_next(s.index, "state", IndexSpace::State);
                    let instruction = match s.instr {
                        InstrAst::Test {
                            condition,
                            if_true,
                            if_false,
                        } => Instruction::Test {
                            condition: ConditionId(self.narrow(condition)),
                            if_true: StateId(self.narrow(if_true)),
                            if_false: StateId(self.narrow(if_false)),
                        },
                        InstrAst::Wait { target } => Instruction::Wait {
                            target: StateId(self.narrow(target)),
                        },
                        InstrAst::Exec { transition, target } => Instruction::Exec {
                            transition: TransitionId(self.narrow(transition)),
                            target: StateId(self.narrow(target)),
                        },
                    };
                    self.states.push(State { instruction });
                }
            }
        }

        let Some((initial, _)) = self.initial else {
            self.diagnostics.push(
                Diagnostic::error(
                    self.actor.name.span,
                    format!("actor '{}' has no initial state", self.actor.name.name),
                )
                .with_code(codes::E0104)
                .with_hint("add `initial 0;`"),
            );
            return None;
        };

        Some(ActorMachine {
            name: self.actor.name.name.clone(),
            inputs: std::mem::take(&mut self.inputs),
            outputs: std::mem::take(&mut self.outputs),
            scopes: std::mem::take(&mut self.scopes),
            conditions: std::mem::take(&mut self.conditions),
            transitions: std::mem::take(&mut self.transitions),
            states: std::mem::take(&mut self.states),
            initial,
        })
    }

    // ── Helpers ──

    fn declare_port(&mut self, name: &'a Ident, direction: Direction) {
        if let Some((_, _, prev)) = self.ports.get(name.name.as_str()) {
            self.diagnostics.push(
                Diagnostic::error(name.span, format!("duplicate port '{}'", name.name))
                    .with_code(codes::E0103)
                    .with_related(*prev, "first declared here"),
            );
            return;
        }
        let (ids, decls) = match direction {
            Direction::Input => (&mut self.input_ids, &mut self.inputs),
            Direction::Output => (&mut self.output_ids, &mut self.outputs),
        };
        let id = PortId(ids.alloc());
        decls.push(PortDecl {
            name: name.name.clone(),
        });
        self.ports.insert(&name.name, (direction, id, name.span));
    }

    fn resolve_port(&mut self, name: &Ident, expected: Direction) -> PortId {
        match self.ports.get(name.name.as_str()) {
            Some(&(direction, id, _)) if direction == expected => id,
            Some(&(_, _, decl)) => {
                let (want, have) = match expected {
                    Direction::Input => ("input", "output"),
                    Direction::Output => ("output", "input"),
                };
                self.diagnostics.push(
                    Diagnostic::error(
                        name.span,
                        format!("'{}' is an {have} port, expected an {want} port", name.name),
                    )
                    .with_code(codes::E0106)
                    .with_related(decl, "declared here"),
                );
                PortId(0)
            }
            None => {
                let decl = match expected {
                    Direction::Input => "input",
                    Direction::Output => "output",
                };
                self.diagnostics.push(
                    Diagnostic::error(name.span, format!("unknown port '{}'", name.name))
                        .with_code(codes::E0102)
                        .with_hint(format!("declare it with `{decl} {};`", name.name)),
                );
                PortId(0)
            }
        }
    }

    fn port_condition(&mut self, port: &Ident, count: Index, direction: Direction) -> Condition {
        let port = self.resolve_port(port, direction);
        let threshold = self.narrow(count);
        Condition::Port(PortCondition {
            port,
            direction,
            threshold,
        })
    }

    fn scope_list(&mut self, list: &[Index]) -> Vec<ScopeId> {
        list.iter().map(|i| ScopeId(self.narrow(*i))).collect()
    }

    fn narrow(&mut self, index: Index) -> u32 {
        match u32::try_from(index.value) {
            Ok(v) => v,
            Err(_) => {
                self.diagnostics.push(
                    Diagnostic::error(index.span, format!("{} does not fit in 32 bits", index.value))
                        .with_code(codes::E0107),
                );
                0
            }
        }
    }

    fn expect_next(&mut self, index: Index, what: &str, list: IndexSpace) {
        let alloc = match list {
            IndexSpace::Scope => &mut self.scope_ids,
            IndexSpace::Condition => &mut self.condition_ids,
            IndexSpace::Transition => &mut self.transition_ids,
            IndexSpace::State => &mut self.state_ids,
        };
        let expected = alloc.alloc() as u64;
        if index.value != expected {
            self.diagnostics.push(
                Diagnostic::error(
                    index.span,
                    format!("{what} {} declared out of order", index.value),
                )
                .with_code(codes::E0101)
                .with_hint(format!("the next {what} must be numbered {expected}")),
            );
        }
    }
}

#[derive(Clone, Copy)]
enum IndexSpace {
    Scope,
    Condition,
    Transition,
    State,
}
