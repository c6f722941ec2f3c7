// instance.rs — A running actor: controller, behavior, ports, program counter
//
// `schedule` walks the controller from the persisted program counter until
// it reaches a Wait, as one trampoline loop over state ids. Nothing in the
// loop blocks; a blocked actor is only visible through the returned status.
//
// Preconditions: `ports` match the controller's port lists.
// Postconditions: on return the program counter names a Wait target; any
//   firing makes the call report `Progress`.
// Failure modes: panics on wiring mismatches and on a program counter that
//   is not a Wait target.
// Side effects: runs the behavior's scope initializers, predicates and
//   transition bodies; reads and writes the actor's channels.

use std::fmt;
use std::sync::Arc;

use crate::controller::{BlockReason, Controller, Op, ProgramCounter};

use super::behavior::{ActorBehavior, Ports};
use super::condition;
use super::vtime::{ScheduleReport, TraceEntry, VirtualTime};

// ── Status ──────────────────────────────────────────────────────────────────

/// Result of one scheduling call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// At least one transition fired.
    Progress,
    /// Blocked on tokens at an input port.
    Starvation,
    /// Blocked on room at an output port.
    Fullness,
    /// Blocked on a predicate, or no test failed.
    Suspended,
}

impl From<BlockReason> for Status {
    fn from(reason: BlockReason) -> Self {
        match reason {
            BlockReason::Starvation { .. } => Status::Starvation,
            BlockReason::Fullness { .. } => Status::Fullness,
            BlockReason::Suspended { .. } => Status::Suspended,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Progress => write!(f, "progress"),
            Status::Starvation => write!(f, "starvation"),
            Status::Fullness => write!(f, "fullness"),
            Status::Suspended => write!(f, "suspended"),
        }
    }
}

// ── Instance ────────────────────────────────────────────────────────────────

pub struct ActorInstance<T, B> {
    name: String,
    controller: Arc<Controller>,
    behavior: B,
    ports: Ports<T>,
    pc: ProgramCounter,
    virtual_time: VirtualTime,
    last_block: Option<BlockReason>,
    record_trace: bool,
    trace: Vec<TraceEntry>,
    firings: u64,
}

impl<T, B: ActorBehavior<T>> ActorInstance<T, B> {
    /// Wire an actor and run its construction-time scope initializers.
    pub fn new(
        name: impl Into<String>,
        controller: Arc<Controller>,
        mut behavior: B,
        ports: Ports<T>,
    ) -> Self {
        let name = name.into();
        assert_eq!(
            ports.input_count(),
            controller.inputs.len(),
            "actor '{name}': {} input channels wired for {} input ports",
            ports.input_count(),
            controller.inputs.len()
        );
        assert_eq!(
            ports.output_count(),
            controller.outputs.len(),
            "actor '{name}': {} output channels wired for {} output ports",
            ports.output_count(),
            controller.outputs.len()
        );
        for &scope in &controller.construction {
            behavior.init_scope(scope, &ports);
        }
        ActorInstance {
            name,
            controller,
            behavior,
            ports,
            pc: ProgramCounter::Fresh,
            virtual_time: 0,
            last_block: None,
            record_trace: false,
            trace: Vec::new(),
            firings: 0,
        }
    }

    /// Record a `TraceEntry` for every firing in virtual-time mode.
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.record_trace = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn ports(&self) -> &Ports<T> {
        &self.ports
    }

    pub fn program_counter(&self) -> ProgramCounter {
        self.pc
    }

    pub fn virtual_time(&self) -> VirtualTime {
        self.virtual_time
    }

    /// Block reason of the most recent call that hit a failed test.
    pub fn last_block(&self) -> Option<BlockReason> {
        self.last_block
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn firings(&self) -> u64 {
        self.firings
    }

    /// Run until the next Wait.
    pub fn schedule(&mut self) -> Status {
        self.run(None).status
    }

    /// Run until the next Wait on the virtual time axis, starting no earlier
    /// than `suggested`.
    pub fn schedule_at(&mut self, suggested: VirtualTime) -> ScheduleReport {
        self.run(Some(suggested))
    }

    fn run(&mut self, suggested: Option<VirtualTime>) -> ScheduleReport {
        let controller = Arc::clone(&self.controller);
        let timed = suggested.is_some();
        let mut clock = suggested.map_or(self.virtual_time, |s| s.max(self.virtual_time));
        let mut state = controller.entry(self.pc);
        let mut progress = false;
        let mut block = None;
        let mut fired = Vec::new();
        let mut waited = None;
        if !timed {
            // Untimed firings stamp their tokens with 0.
            self.ports.set_now(0);
        }

        loop {
            let step = controller.step(state);
            for &scope in &step.inits {
                self.behavior.init_scope(scope, &self.ports);
            }
            match step.op {
                Op::Test {
                    condition,
                    on_true,
                    on_false,
                    block: reason,
                    notify_wait,
                } => {
                    let cond = &controller.conditions[condition.index()];
                    let holds = if timed {
                        let decision = condition::evaluate_timed(
                            condition,
                            cond,
                            &mut self.behavior,
                            &self.ports,
                        );
                        clock = clock.max(decision.time);
                        decision.holds
                    } else {
                        condition::evaluate(condition, cond, &mut self.behavior, &self.ports)
                    };
                    tracing::trace!(actor = %self.name, %state, %condition, holds, "test");
                    if holds {
                        state = on_true;
                    } else {
                        block = Some(reason);
                        if notify_wait {
                            waited = Some(condition);
                        }
                        state = on_false;
                    }
                }
                Op::Wait { resume } => {
                    tracing::trace!(actor = %self.name, %state, %resume, "wait");
                    self.pc = ProgramCounter::At(resume);
                    break;
                }
                Op::Exec {
                    transition,
                    target,
                    latency,
                } => {
                    if timed {
                        if self.record_trace {
                            self.trace.push(TraceEntry {
                                transition,
                                start: clock,
                                latency,
                            });
                        }
                        clock += latency;
                        self.ports.set_now(clock);
                    }
                    tracing::trace!(actor = %self.name, %state, %transition, clock, "exec");
                    fired.push(transition);
                    self.behavior.execute(transition, &self.ports);
                    self.firings += 1;
                    progress = true;
                    state = target;
                }
            }
        }

        if timed {
            self.virtual_time = clock;
        }
        if block.is_some() {
            self.last_block = block;
        }
        let status = if progress {
            Status::Progress
        } else {
            block.map_or(Status::Suspended, Status::from)
        };
        ScheduleReport {
            status,
            fired,
            waited,
            virtual_time: self.virtual_time,
        }
    }
}

impl<T, B> fmt::Debug for ActorInstance<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorInstance")
            .field("name", &self.name)
            .field("pc", &self.pc)
            .field("virtual_time", &self.virtual_time)
            .field("firings", &self.firings)
            .finish()
    }
}
