// am.rs — Actor machine data model
//
// The immutable description of one actor: ports, scopes, conditions,
// transitions, and the controller (a graph of single-instruction states).
// Produced by `lower` (from `.am` source) or deserialized from JSON, and
// never mutated afterwards.
//
// Preconditions: none (data-only module).
// Postconditions: none (data-only module).
// Failure modes: accessor methods panic on out-of-range ids; run
//                `verify::verify_actor_machine` first.
// Side effects: none.

use serde::{Deserialize, Serialize};

use crate::id::{ConditionId, PortId, ScopeId, StateId, TransitionId};

// ── Root ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMachine {
    pub name: String,
    pub inputs: Vec<PortDecl>,
    pub outputs: Vec<PortDecl>,
    pub scopes: Vec<Scope>,
    pub conditions: Vec<Condition>,
    pub transitions: Vec<Transition>,
    pub states: Vec<State>,
    pub initial: StateId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDecl {
    pub name: String,
}

// ── Scopes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// Initialized once at actor construction, never invalidated.
    Persistent,
    /// Invalidated at every `Wait` and by transitions that kill it.
    Transient,
}

/// A group of variable declarations with one initialization procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    #[serde(default)]
    pub declarations: Vec<String>,
    /// Scopes whose values this scope's initializer reads.
    #[serde(default)]
    pub reads: Vec<ScopeId>,
}

impl Scope {
    pub fn is_persistent(&self) -> bool {
        self.kind == ScopeKind::Persistent
    }
}

// ── Conditions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Condition {
    /// Token availability (input) or free space (output) on one port.
    Port(PortCondition),
    /// Opaque guard expression, evaluated by the injected evaluator.
    Predicate(PredicateCondition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCondition {
    pub port: PortId,
    pub direction: Direction,
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateCondition {
    pub expr: String,
    #[serde(default)]
    pub reads: Vec<ScopeId>,
}

impl Condition {
    pub fn as_port(&self) -> Option<&PortCondition> {
        match self {
            Condition::Port(p) => Some(p),
            Condition::Predicate(_) => None,
        }
    }

    /// Scopes the condition reads. Port conditions read none.
    pub fn reads(&self) -> &[ScopeId] {
        match self {
            Condition::Port(_) => &[],
            Condition::Predicate(p) => &p.reads,
        }
    }
}

// ── Transitions ─────────────────────────────────────────────────────────────

/// Tokens moved on one port by one firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRate {
    pub port: PortId,
    pub tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Opaque action body (name or text) handed to the executor.
    pub body: String,
    #[serde(default)]
    pub input_rates: Vec<PortRate>,
    #[serde(default)]
    pub output_rates: Vec<PortRate>,
    #[serde(default)]
    pub reads: Vec<ScopeId>,
    #[serde(default)]
    pub kills: Vec<ScopeId>,
    /// Virtual-time cost of one firing.
    #[serde(default)]
    pub latency: u64,
}

impl Transition {
    pub fn input_rate(&self, port: PortId) -> u32 {
        self.input_rates
            .iter()
            .filter(|r| r.port == port)
            .map(|r| r.tokens)
            .sum()
    }

    pub fn output_rate(&self, port: PortId) -> u32 {
        self.output_rates
            .iter()
            .filter(|r| r.port == port)
            .map(|r| r.tokens)
            .sum()
    }
}

// ── Controller ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Instruction {
    Test {
        condition: ConditionId,
        if_true: StateId,
        if_false: StateId,
    },
    Wait {
        target: StateId,
    },
    Exec {
        transition: TransitionId,
        target: StateId,
    },
}

impl Instruction {
    /// Control-flow successors, in (true, false) order for tests.
    pub fn successors(&self) -> impl Iterator<Item = StateId> {
        let (a, b) = match *self {
            Instruction::Test {
                if_true, if_false, ..
            } => (Some(if_true), Some(if_false)),
            Instruction::Wait { target } => (Some(target), None),
            Instruction::Exec { target, .. } => (Some(target), None),
        };
        a.into_iter().chain(b)
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, Instruction::Wait { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub instruction: Instruction,
}

// ── Accessors ───────────────────────────────────────────────────────────────

impl ActorMachine {
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.index()]
    }

    pub fn condition(&self, id: ConditionId) -> &Condition {
        &self.conditions[id.index()]
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.index()]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn port_name(&self, port: PortId, direction: Direction) -> &str {
        match direction {
            Direction::Input => &self.inputs[port.index()].name,
            Direction::Output => &self.outputs[port.index()].name,
        }
    }

    pub fn state_ids(&self) -> impl Iterator<Item = StateId> {
        (0..self.states.len()).map(StateId::from_index)
    }

    /// All targets of `Wait` instructions, ascending, deduplicated.
    pub fn wait_targets(&self) -> Vec<StateId> {
        let mut targets: Vec<StateId> = self
            .states
            .iter()
            .filter_map(|s| match s.instruction {
                Instruction::Wait { target } => Some(target),
                _ => None,
            })
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Predecessor lists, indexed by state.
    pub fn predecessors(&self) -> Vec<Vec<StateId>> {
        let mut preds = vec![Vec::new(); self.states.len()];
        for id in self.state_ids() {
            for succ in self.state(id).instruction.successors() {
                preds[succ.index()].push(id);
            }
        }
        preds
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> ActorMachine {
        ActorMachine {
            name: "tiny".into(),
            inputs: vec![PortDecl { name: "IN".into() }],
            outputs: vec![],
            scopes: vec![Scope {
                kind: ScopeKind::Transient,
                declarations: vec![],
                reads: vec![],
            }],
            conditions: vec![Condition::Port(PortCondition {
                port: PortId(0),
                direction: Direction::Input,
                threshold: 1,
            })],
            transitions: vec![Transition {
                body: "drop".into(),
                input_rates: vec![PortRate {
                    port: PortId(0),
                    tokens: 1,
                }],
                output_rates: vec![],
                reads: vec![],
                kills: vec![],
                latency: 0,
            }],
            states: vec![
                State {
                    instruction: Instruction::Test {
                        condition: ConditionId(0),
                        if_true: StateId(1),
                        if_false: StateId(2),
                    },
                },
                State {
                    instruction: Instruction::Exec {
                        transition: TransitionId(0),
                        target: StateId(0),
                    },
                },
                State {
                    instruction: Instruction::Wait { target: StateId(0) },
                },
            ],
            initial: StateId(0),
        }
    }

    #[test]
    fn wait_targets_are_collected() {
        assert_eq!(tiny().wait_targets(), vec![StateId(0)]);
    }

    #[test]
    fn predecessors_follow_edges() {
        let preds = tiny().predecessors();
        assert_eq!(preds[0], vec![StateId(1), StateId(2)]);
        assert_eq!(preds[1], vec![StateId(0)]);
        assert_eq!(preds[2], vec![StateId(0)]);
    }

    #[test]
    fn json_roundtrip_preserves_machine() {
        let am = tiny();
        let back = ActorMachine::from_json(&am.to_json()).expect("valid json");
        assert_eq!(am, back);
    }

    #[test]
    fn transition_rates_sum_per_port() {
        let am = tiny();
        assert_eq!(am.transition(TransitionId(0)).input_rate(PortId(0)), 1);
        assert_eq!(am.transition(TransitionId(0)).output_rate(PortId(0)), 0);
    }
}
