// behavior.rs — Actor action bodies and port access
//
// The scheduling routine never touches tokens itself. Scope initializers,
// predicates and transition bodies are supplied by an `ActorBehavior`, which
// reaches the actor's channels through `Ports`.

use crate::id::{ConditionId, PortId, ScopeId, TransitionId};

use super::channel::{Reader, Writer};
use super::vtime::VirtualTime;

// ── Ports ───────────────────────────────────────────────────────────────────

/// The channel endpoints of one actor, indexed like the machine's port lists.
#[derive(Debug)]
pub struct Ports<T> {
    inputs: Vec<Reader<T>>,
    outputs: Vec<Writer<T>>,
    now: VirtualTime,
}

impl<T> Ports<T> {
    pub fn new(inputs: Vec<Reader<T>>, outputs: Vec<Writer<T>>) -> Self {
        Ports {
            inputs,
            outputs,
            now: 0,
        }
    }

    pub fn input(&self, port: PortId) -> &Reader<T> {
        &self.inputs[port.index()]
    }

    pub fn output(&self, port: PortId) -> &Writer<T> {
        &self.outputs[port.index()]
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Virtual time at which the running transition completes; 0 when the
    /// actor is scheduled without a clock.
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    pub(crate) fn set_now(&mut self, now: VirtualTime) {
        self.now = now;
    }

    /// Stage and commit one token on `port`, stamped with `now()`.
    pub fn send(&self, port: PortId, token: T) {
        let out = self.output(port);
        out.write_at(token, self.now);
        out.write_advance(1);
    }
}

impl<T: Clone> Ports<T> {
    /// Copy out and consume `n` tokens from `port`.
    pub fn take(&self, port: PortId, n: usize) -> Vec<T> {
        self.input(port).take(n)
    }
}

// ── Behavior ────────────────────────────────────────────────────────────────

/// Everything a scheduling routine calls out to.
pub trait ActorBehavior<T> {
    /// (Re)initialize one scope.
    fn init_scope(&mut self, _scope: ScopeId, _ports: &Ports<T>) {}

    /// Evaluate a predicate condition. Machines without predicates never
    /// reach this.
    fn predicate(&mut self, condition: ConditionId, _ports: &Ports<T>) -> bool {
        panic!("predicate {condition} evaluated but the behavior defines no predicates")
    }

    /// Evaluate a predicate and report the earliest virtual time at which
    /// its outcome is decided.
    fn predicate_timed(&mut self, condition: ConditionId, ports: &Ports<T>) -> (bool, VirtualTime) {
        (self.predicate(condition, ports), 0)
    }

    /// Run the body of `transition`. The guard tests preceding the firing
    /// have already passed.
    fn execute(&mut self, transition: TransitionId, ports: &Ports<T>);
}
