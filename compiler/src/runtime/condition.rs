// condition.rs — Condition evaluation against live channels
//
// Port conditions are answered from channel counters and never have side
// effects. Predicates are delegated to the actor's behavior.

use crate::am::{Condition, Direction};
use crate::id::ConditionId;

use super::behavior::{ActorBehavior, Ports};
use super::vtime::VirtualTime;

/// Outcome of a timed evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub holds: bool,
    /// Earliest virtual time at which the outcome is decided.
    pub time: VirtualTime,
}

pub fn evaluate<T, B: ActorBehavior<T>>(
    id: ConditionId,
    condition: &Condition,
    behavior: &mut B,
    ports: &Ports<T>,
) -> bool {
    match condition {
        Condition::Port(p) => match p.direction {
            Direction::Input => ports.input(p.port).available() >= p.threshold as usize,
            Direction::Output => ports.output(p.port).room_for_write() >= p.threshold as usize,
        },
        Condition::Predicate(_) => behavior.predicate(id, ports),
    }
}

/// Like `evaluate`, also reporting when the outcome is decided. A satisfied
/// input condition is decided when its `threshold`-th token arrived.
pub fn evaluate_timed<T, B: ActorBehavior<T>>(
    id: ConditionId,
    condition: &Condition,
    behavior: &mut B,
    ports: &Ports<T>,
) -> Decision {
    match condition {
        Condition::Port(p) => {
            let holds = evaluate(id, condition, behavior, ports);
            let time = match p.direction {
                Direction::Input if holds && p.threshold > 0 => {
                    ports.input(p.port).stamp(p.threshold as usize - 1)
                }
                _ => 0,
            };
            Decision { holds, time }
        }
        Condition::Predicate(_) => {
            let (holds, time) = behavior.predicate_timed(id, ports);
            Decision { holds, time }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::{PortCondition, PredicateCondition};
    use crate::id::{PortId, TransitionId};
    use crate::runtime::channel::channel;

    struct Flag(bool);

    impl ActorBehavior<u32> for Flag {
        fn predicate(&mut self, _: ConditionId, _: &Ports<u32>) -> bool {
            self.0
        }
        fn predicate_timed(&mut self, c: ConditionId, p: &Ports<u32>) -> (bool, VirtualTime) {
            (self.predicate(c, p), 17)
        }
        fn execute(&mut self, _: TransitionId, _: &Ports<u32>) {}
    }

    fn port(direction: Direction, threshold: u32) -> Condition {
        Condition::Port(PortCondition {
            port: PortId(0),
            direction,
            threshold,
        })
    }

    #[test]
    fn input_threshold_and_timestamp() {
        let (w, r) = channel::<u32>(4, 1);
        let ports = Ports::new(r, vec![]);
        let cond = port(Direction::Input, 2);
        let c = ConditionId(0);
        w.write_at(1, 3);
        w.write_advance(1);
        assert!(!evaluate(c, &cond, &mut Flag(true), &ports));
        assert_eq!(
            evaluate_timed(c, &cond, &mut Flag(true), &ports),
            Decision { holds: false, time: 0 }
        );
        w.write_at(2, 8);
        w.write_advance(1);
        assert_eq!(
            evaluate_timed(c, &cond, &mut Flag(true), &ports),
            Decision { holds: true, time: 8 }
        );
    }

    #[test]
    fn output_room_counts_staged_tokens() {
        let (w, _r) = channel::<u32>(2, 1);
        w.write(1);
        let ports = Ports::new(vec![], vec![w]);
        let cond = port(Direction::Output, 2);
        assert!(!evaluate(ConditionId(0), &cond, &mut Flag(true), &ports));
        let cond = port(Direction::Output, 1);
        assert_eq!(
            evaluate_timed(ConditionId(0), &cond, &mut Flag(true), &ports),
            Decision { holds: true, time: 0 }
        );
    }

    #[test]
    fn predicates_delegate() {
        let ports: Ports<u32> = Ports::new(vec![], vec![]);
        let cond = Condition::Predicate(PredicateCondition {
            expr: "x".into(),
            reads: vec![],
        });
        assert!(!evaluate(ConditionId(0), &cond, &mut Flag(false), &ports));
        assert_eq!(
            evaluate_timed(ConditionId(0), &cond, &mut Flag(true), &ports),
            Decision { holds: true, time: 17 }
        );
    }
}
