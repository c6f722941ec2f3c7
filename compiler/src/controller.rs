// controller.rs — Compiled controller IR
//
// The scheduling routine of one actor, fully resolved: a dispatch table of
// resumption labels, and per state the scope initializers to run followed
// by exactly one operation. Every per-target emitter and the runtime
// trampoline read this structure; none of them re-derive anything from the
// actor machine.
//
// Preconditions: `am` passed verification; `plan` was computed for `am`.
// Postconditions: `verify_controller` obligations C1-C3 hold.
// Failure modes: `Controller::entry` panics on a program counter that is not
//   a resumption label (an internal-consistency fault).
// Side effects: none.

use std::fmt;

use crate::am::{ActorMachine, Condition, Direction, Instruction};
use crate::id::{ConditionId, PortId, ScopeId, StateId, TransitionId};
use crate::pass::StageCert;
use crate::scopes::{InitStrategy, ScopeInfo, ScopeInitPlan};

// ── Public types ────────────────────────────────────────────────────────────

/// Persisted resumption point between scheduling calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramCounter {
    /// Never scheduled: start at the initial state.
    #[default]
    Fresh,
    /// Suspended at a Wait; resume at its target.
    At(StateId),
}

/// Why a failed test could not make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// An input port held fewer tokens than the threshold.
    Starvation { port: PortId },
    /// An output port had less room than the threshold.
    Fullness { port: PortId },
    /// A predicate evaluated false.
    Suspended { condition: ConditionId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Test {
        condition: ConditionId,
        on_true: StateId,
        on_false: StateId,
        block: BlockReason,
        /// The false branch leads straight to a Wait: report the condition
        /// to a virtual-time host.
        notify_wait: bool,
    },
    Wait {
        resume: StateId,
    },
    Exec {
        transition: TransitionId,
        target: StateId,
        latency: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Transient scopes to initialize before `op`, in dependency order.
    pub inits: Vec<ScopeId>,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    pub actor: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub conditions: Vec<Condition>,
    pub transition_bodies: Vec<String>,
    pub strategy: InitStrategy,
    pub initial: StateId,
    /// Resumption labels (Wait targets), ascending.
    pub dispatch: Vec<StateId>,
    /// Scopes to initialize once at actor construction.
    pub construction: Vec<ScopeId>,
    pub steps: Vec<Step>,
}

impl Controller {
    pub fn step(&self, state: StateId) -> &Step {
        &self.steps[state.index()]
    }

    pub fn is_resume_point(&self, state: StateId) -> bool {
        self.dispatch.binary_search(&state).is_ok()
    }

    /// Map a persisted program counter to the state to start from.
    pub fn entry(&self, pc: ProgramCounter) -> StateId {
        match pc {
            ProgramCounter::Fresh => self.initial,
            ProgramCounter::At(state) => {
                assert!(
                    self.is_resume_point(state),
                    "actor '{}': program counter {state} is not a Wait target",
                    self.actor
                );
                state
            }
        }
    }

    pub fn state_count(&self) -> usize {
        self.steps.len()
    }

    pub fn port_name(&self, port: PortId, direction: Direction) -> &str {
        match direction {
            Direction::Input => &self.inputs[port.index()],
            Direction::Output => &self.outputs[port.index()],
        }
    }

    /// Short human-readable rendering of a condition (`tokens(IN, 1)`).
    pub fn describe_condition(&self, id: ConditionId) -> String {
        match &self.conditions[id.index()] {
            Condition::Port(p) => {
                let kind = match p.direction {
                    Direction::Input => "tokens",
                    Direction::Output => "space",
                };
                format!(
                    "{kind}({}, {})",
                    self.port_name(p.port, p.direction),
                    p.threshold
                )
            }
            Condition::Predicate(p) => format!("({})", p.expr),
        }
    }
}

// ── Construction ────────────────────────────────────────────────────────────

pub fn build_controller(am: &ActorMachine, plan: &ScopeInitPlan) -> Controller {
    let steps = am
        .state_ids()
        .map(|s| {
            let op = match am.state(s).instruction {
                Instruction::Test {
                    condition,
                    if_true,
                    if_false,
                } => {
                    let block = match am.condition(condition) {
                        Condition::Port(p) => match p.direction {
                            Direction::Input => BlockReason::Starvation { port: p.port },
                            Direction::Output => BlockReason::Fullness { port: p.port },
                        },
                        Condition::Predicate(_) => BlockReason::Suspended { condition },
                    };
                    Op::Test {
                        condition,
                        on_true: if_true,
                        on_false: if_false,
                        block,
                        notify_wait: am.state(if_false).instruction.is_wait(),
                    }
                }
                Instruction::Wait { target } => Op::Wait { resume: target },
                Instruction::Exec { transition, target } => Op::Exec {
                    transition,
                    target,
                    latency: am.transition(transition).latency,
                },
            };
            Step {
                inits: plan.at(s).to_vec(),
                op,
            }
        })
        .collect();

    let controller = Controller {
        actor: am.name.clone(),
        inputs: am.inputs.iter().map(|p| p.name.clone()).collect(),
        outputs: am.outputs.iter().map(|p| p.name.clone()).collect(),
        conditions: am.conditions.clone(),
        transition_bodies: am.transitions.iter().map(|t| t.body.clone()).collect(),
        strategy: plan.strategy,
        initial: am.initial,
        dispatch: am.wait_targets(),
        construction: plan.construction.clone(),
        steps,
    };
    tracing::debug!(
        actor = %controller.actor,
        states = controller.steps.len(),
        resume_points = controller.dispatch.len(),
        "controller built"
    );
    controller
}

// ── Certificate ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControllerCert {
    /// C1: every jump target and the initial state name an existing state.
    pub c1_jump_targets_valid: bool,
    /// C2: the dispatch table holds exactly the Wait targets.
    pub c2_dispatch_matches_waits: bool,
    /// C3: initializer lists hold only transient scopes, once each, in
    /// dependency order.
    pub c3_inits_ordered: bool,
}

impl StageCert for ControllerCert {
    fn all_pass(&self) -> bool {
        self.c1_jump_targets_valid && self.c2_dispatch_matches_waits && self.c3_inits_ordered
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("C1_jump_targets_valid", self.c1_jump_targets_valid),
            ("C2_dispatch_matches_waits", self.c2_dispatch_matches_waits),
            ("C3_inits_ordered", self.c3_inits_ordered),
        ]
    }
}

pub fn verify_controller(controller: &Controller, info: &ScopeInfo) -> ControllerCert {
    let n = controller.steps.len();
    let valid = |s: StateId| s.index() < n;

    let c1 = valid(controller.initial)
        && controller.steps.iter().all(|step| match step.op {
            Op::Test {
                on_true, on_false, ..
            } => valid(on_true) && valid(on_false),
            Op::Wait { resume } => valid(resume),
            Op::Exec { target, .. } => valid(target),
        });

    let mut waits: Vec<StateId> = controller
        .steps
        .iter()
        .filter_map(|step| match step.op {
            Op::Wait { resume } => Some(resume),
            _ => None,
        })
        .collect();
    waits.sort();
    waits.dedup();
    let c2 = waits == controller.dispatch;

    let c3 = controller
        .steps
        .iter()
        .map(|step| &step.inits)
        .chain(std::iter::once(&controller.construction))
        .enumerate()
        .all(|(i, inits)| {
            let is_construction = i == n;
            inits.iter().enumerate().all(|(pos, &scope)| {
                (is_construction || info.is_transient(scope))
                    && inits[pos + 1..]
                        .iter()
                        .all(|&later| later != scope && !info.depends_on(scope, later))
            })
        });

    ControllerCert {
        c1_jump_targets_valid: c1,
        c2_dispatch_matches_waits: c2,
        c3_inits_ordered: c3,
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Starvation { port } => write!(f, "starvation {port}"),
            BlockReason::Fullness { port } => write!(f, "fullness {port}"),
            BlockReason::Suspended { condition } => write!(f, "suspended {condition}"),
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "controller {} ({})", self.actor, self.strategy)?;
        write!(f, "  dispatch: fresh -> {}", self.initial)?;
        for s in &self.dispatch {
            write!(f, ", {s}")?;
        }
        writeln!(f)?;
        if !self.construction.is_empty() {
            write!(f, "  construct:")?;
            for s in &self.construction {
                write!(f, " {s}")?;
            }
            writeln!(f)?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            write!(f, "  {}:", StateId::from_index(i))?;
            for s in &step.inits {
                write!(f, " init {s};")?;
            }
            match &step.op {
                Op::Test {
                    condition,
                    on_true,
                    on_false,
                    block,
                    notify_wait,
                } => {
                    write!(
                        f,
                        " test {condition} {} ? {on_true} : {on_false} [{block}]",
                        self.describe_condition(*condition)
                    )?;
                    if *notify_wait {
                        write!(f, " notify")?;
                    }
                }
                Op::Wait { resume } => write!(f, " wait -> {resume}")?,
                Op::Exec {
                    transition,
                    target,
                    latency,
                } => {
                    write!(
                        f,
                        " exec {transition} \"{}\" -> {target}",
                        self.transition_bodies[transition.index()]
                    )?;
                    if *latency > 0 {
                        write!(f, " latency {latency}")?;
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
