// sim.rs — Discrete-event host for virtual-time actors
//
// Actors wait in a ready queue keyed by the virtual time at which they may
// next run. Each step pops the earliest one, advances global time to its
// key and calls its virtual-time scheduling routine. An actor that made
// progress is requeued at its new clock. A blocked actor leaves the queue
// and remembers the resource it waited on; it is woken only when that
// resource changes: a producer feeding the starved input, a consumer
// draining the full output, or `wake` for tokens written from outside.
//
// Preconditions: `connect` declares every channel between actors.
// Postconditions: global time never decreases and always equals the key
//   of the step being run, which is the smallest key in the queue.
// Failure modes: none; an empty queue ends the run.
// Side effects: runs actor bodies.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::am::Direction;
use crate::id::{ConditionId, PortId, TransitionId};

use super::behavior::ActorBehavior;
use super::instance::{ActorInstance, Status};
use super::vtime::{ScheduleReport, VirtualTime};

// ── TimedSchedulable ────────────────────────────────────────────────────────

pub trait TimedSchedulable: Send {
    fn name(&self) -> &str;
    fn schedule_at(&mut self, suggested: VirtualTime) -> ScheduleReport;
    fn virtual_time(&self) -> VirtualTime;

    /// Port behind a waited condition. `None` for predicates, which may
    /// depend on any input.
    fn condition_port(&self, _condition: ConditionId) -> Option<(Direction, PortId)> {
        None
    }
}

impl<T: Send, B: ActorBehavior<T> + Send> TimedSchedulable for ActorInstance<T, B> {
    fn name(&self) -> &str {
        ActorInstance::name(self)
    }

    fn schedule_at(&mut self, suggested: VirtualTime) -> ScheduleReport {
        ActorInstance::schedule_at(self, suggested)
    }

    fn virtual_time(&self) -> VirtualTime {
        ActorInstance::virtual_time(self)
    }

    fn condition_port(&self, condition: ConditionId) -> Option<(Direction, PortId)> {
        self.controller().conditions[condition.index()]
            .as_port()
            .map(|p| (p.direction, p.port))
    }
}

// ── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Global time at which the step ran.
    pub time: VirtualTime,
    pub actor: usize,
    pub status: Status,
    pub fired: Vec<TransitionId>,
    pub waited: Option<ConditionId>,
    /// Actor clock after the step.
    pub virtual_time: VirtualTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStop {
    /// Nothing left in the ready queue.
    Drained,
    StepBudget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimOutcome {
    pub steps: u64,
    pub time: VirtualTime,
    pub reason: SimStop,
}

// ── Host ────────────────────────────────────────────────────────────────────

/// One channel between two actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    producer: usize,
    output: PortId,
    consumer: usize,
    input: PortId,
}

/// What a blocked actor is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocker {
    Port(Direction, PortId),
    /// A predicate: any of the actor's inputs may decide it.
    Predicate,
    /// Nothing reported: any change on a connected channel.
    Unknown,
}

pub struct DiscreteEventHost {
    actors: Vec<Box<dyn TimedSchedulable>>,
    links: Vec<Link>,
    blocked: Vec<Option<Blocker>>,
    queue: BinaryHeap<Reverse<(VirtualTime, usize)>>,
    /// Current queue key per actor; stale heap entries are skipped.
    ready_at: Vec<Option<VirtualTime>>,
    now: VirtualTime,
    steps: u64,
}

impl DiscreteEventHost {
    /// Every actor starts ready at time 0.
    pub fn new(actors: Vec<Box<dyn TimedSchedulable>>) -> Self {
        let n = actors.len();
        let mut host = DiscreteEventHost {
            actors,
            links: Vec::new(),
            blocked: vec![None; n],
            queue: BinaryHeap::with_capacity(n),
            ready_at: vec![None; n],
            now: 0,
            steps: 0,
        };
        for a in 0..n {
            host.enqueue(a, 0);
        }
        host
    }

    /// Declare a channel from `producer`'s `output` port to `consumer`'s
    /// `input` port. A broadcast channel is one link per consumer.
    pub fn connect(&mut self, producer: usize, output: PortId, consumer: usize, input: PortId) {
        let link = Link {
            producer,
            output,
            consumer,
            input,
        };
        if !self.links.contains(&link) {
            self.links.push(link);
        }
    }

    /// Make `actor` ready no earlier than `time`, e.g. after writing tokens
    /// to one of its inputs from outside the simulation.
    pub fn wake(&mut self, actor: usize, time: VirtualTime) {
        self.enqueue(actor, time);
    }

    /// Whether `actor` is out of the queue, waiting on a resource.
    pub fn is_blocked(&self, actor: usize) -> bool {
        self.blocked[actor].is_some()
    }

    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Steps run since construction.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn actor(&self, index: usize) -> &dyn TimedSchedulable {
        self.actors[index].as_ref()
    }

    /// Smallest key in the ready queue.
    pub fn next_ready_time(&mut self) -> Option<VirtualTime> {
        self.drop_stale();
        self.queue.peek().map(|Reverse((t, _))| *t)
    }

    /// Run the earliest ready actor once. `None` when nothing is ready.
    pub fn step(&mut self) -> Option<StepReport> {
        self.drop_stale();
        let Reverse((time, actor)) = self.queue.pop()?;
        self.ready_at[actor] = None;
        self.now = time;

        let report = self.actors[actor].schedule_at(time);
        self.steps += 1;
        tracing::debug!(
            time,
            actor = self.actors[actor].name(),
            status = %report.status,
            fired = report.fired.len(),
            clock = report.virtual_time,
            "sim step"
        );

        if report.status == Status::Progress {
            let at = report.virtual_time.max(self.now);
            self.enqueue(actor, at);
            self.wake_dependents(actor, at);
        } else {
            let blocker = match report.waited {
                Some(c) => match self.actors[actor].condition_port(c) {
                    Some((direction, port)) => Blocker::Port(direction, port),
                    None => Blocker::Predicate,
                },
                None => Blocker::Unknown,
            };
            self.blocked[actor] = Some(blocker);
        }

        Some(StepReport {
            time,
            actor,
            status: report.status,
            fired: report.fired,
            waited: report.waited,
            virtual_time: report.virtual_time,
        })
    }

    /// Step until the queue drains or `max_steps` steps have run.
    pub fn run(&mut self, max_steps: Option<u64>) -> SimOutcome {
        let mut steps = 0;
        loop {
            if max_steps.is_some_and(|max| steps >= max) {
                return self.outcome(steps, SimStop::StepBudget);
            }
            if self.step().is_none() {
                return self.outcome(steps, SimStop::Drained);
            }
            steps += 1;
        }
    }

    fn outcome(&self, steps: u64, reason: SimStop) -> SimOutcome {
        tracing::debug!(steps, time = self.now, ?reason, "sim stopped");
        SimOutcome {
            steps,
            time: self.now,
            reason,
        }
    }

    /// Wake the blocked actors whose waited resource `actor` may have
    /// changed by firing.
    fn wake_dependents(&mut self, actor: usize, at: VirtualTime) {
        let mut woken = Vec::new();
        for link in &self.links {
            if link.producer == actor {
                let hit = match self.blocked[link.consumer] {
                    Some(Blocker::Port(Direction::Input, p)) => p == link.input,
                    Some(Blocker::Predicate | Blocker::Unknown) => true,
                    _ => false,
                };
                if hit {
                    woken.push(link.consumer);
                }
            }
            if link.consumer == actor {
                let hit = match self.blocked[link.producer] {
                    Some(Blocker::Port(Direction::Output, p)) => p == link.output,
                    Some(Blocker::Unknown) => true,
                    _ => false,
                };
                if hit {
                    woken.push(link.producer);
                }
            }
        }
        for a in woken {
            self.enqueue(a, at);
        }
    }

    /// Queue `actor` at `time` unless it is already queued no later.
    fn enqueue(&mut self, actor: usize, time: VirtualTime) {
        self.blocked[actor] = None;
        let time = time.max(self.now);
        match self.ready_at[actor] {
            Some(t) if t <= time => {}
            _ => {
                self.ready_at[actor] = Some(time);
                self.queue.push(Reverse((time, actor)));
            }
        }
    }

    fn drop_stale(&mut self) {
        while let Some(&Reverse((t, a))) = self.queue.peek() {
            if self.ready_at[a] == Some(t) {
                break;
            }
            self.queue.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fires every call until `budget` runs out, advancing its clock by
    /// `latency` per firing.
    struct Ticker {
        budget: u32,
        latency: VirtualTime,
        clock: VirtualTime,
    }

    impl TimedSchedulable for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }
        fn schedule_at(&mut self, suggested: VirtualTime) -> ScheduleReport {
            self.clock = self.clock.max(suggested);
            let status = if self.budget > 0 {
                self.budget -= 1;
                self.clock += self.latency;
                Status::Progress
            } else {
                Status::Starvation
            };
            ScheduleReport {
                status,
                fired: Vec::new(),
                waited: None,
                virtual_time: self.clock,
            }
        }
        fn virtual_time(&self) -> VirtualTime {
            self.clock
        }
    }

    fn ticker(budget: u32, latency: VirtualTime) -> Box<dyn TimedSchedulable> {
        Box::new(Ticker {
            budget,
            latency,
            clock: 0,
        })
    }

    #[test]
    fn steps_in_time_order() {
        let mut host = DiscreteEventHost::new(vec![ticker(3, 5), ticker(3, 3)]);
        let mut seen = Vec::new();
        while let Some(expected) = host.next_ready_time() {
            let step = host.step().unwrap();
            assert_eq!(step.time, expected);
            seen.push((step.time, step.actor));
        }
        assert_eq!(
            seen,
            vec![
                (0, 0),
                (0, 1),
                (3, 1),
                (5, 0),
                (6, 1),
                (9, 1),
                (10, 0),
                (15, 0)
            ]
        );
    }

    #[test]
    fn blocked_actor_waits_for_neighbour() {
        let mut host = DiscreteEventHost::new(vec![ticker(2, 4), ticker(0, 1)]);
        host.connect(0, PortId(0), 1, PortId(0));
        let mut at = || {
            let s = host.step().unwrap();
            (s.time, s.actor, s.status)
        };
        assert_eq!(at(), (0, 0, Status::Progress));
        assert_eq!(at(), (0, 1, Status::Starvation));
        // Actor 1 is back in the queue only because actor 0 progressed.
        assert_eq!(at(), (4, 0, Status::Progress));
        assert_eq!(at(), (8, 0, Status::Starvation));
        assert_eq!(at(), (8, 1, Status::Starvation));
        assert!(host.step().is_none());
    }

    #[test]
    fn run_drains_and_respects_budget() {
        let mut host = DiscreteEventHost::new(vec![ticker(4, 2)]);
        let outcome = host.run(Some(2));
        assert_eq!(outcome.reason, SimStop::StepBudget);
        assert_eq!(outcome.steps, 2);
        let outcome = host.run(None);
        assert_eq!(outcome.reason, SimStop::Drained);
        assert_eq!(outcome.steps, 3);
        assert_eq!(outcome.time, 8);
        assert_eq!(host.actor(0).virtual_time(), 8);
    }

    /// Replays a fixed list of reports, then suspends with nothing waited.
    /// Condition k names `ports[k]`.
    struct Scripted {
        script: Vec<(Status, Option<ConditionId>)>,
        ports: Vec<(Direction, PortId)>,
        latency: VirtualTime,
        clock: VirtualTime,
    }

    impl TimedSchedulable for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn schedule_at(&mut self, suggested: VirtualTime) -> ScheduleReport {
            self.clock = self.clock.max(suggested);
            let (status, waited) = if self.script.is_empty() {
                (Status::Suspended, None)
            } else {
                self.script.remove(0)
            };
            if status == Status::Progress {
                self.clock += self.latency;
            }
            ScheduleReport {
                status,
                fired: Vec::new(),
                waited,
                virtual_time: self.clock,
            }
        }
        fn virtual_time(&self) -> VirtualTime {
            self.clock
        }
        fn condition_port(&self, condition: ConditionId) -> Option<(Direction, PortId)> {
            self.ports.get(condition.index()).copied()
        }
    }

    fn scripted(
        script: Vec<(Status, Option<ConditionId>)>,
        ports: Vec<(Direction, PortId)>,
        latency: VirtualTime,
    ) -> Box<dyn TimedSchedulable> {
        Box::new(Scripted {
            script,
            ports,
            latency,
            clock: 0,
        })
    }

    fn trace(host: &mut DiscreteEventHost) -> Vec<(VirtualTime, usize, Status)> {
        std::iter::from_fn(|| host.step().map(|s| (s.time, s.actor, s.status))).collect()
    }

    #[test]
    fn producer_wakes_only_consumers_starved_on_its_channel() {
        let c0 = Some(ConditionId(0));
        let mut host = DiscreteEventHost::new(vec![
            // Consumes from actor 3 but is blocked on its own full output.
            scripted(
                vec![(Status::Fullness, c0)],
                vec![(Direction::Output, PortId(0))],
                0,
            ),
            // Starved on the input fed by actor 3.
            scripted(
                vec![(Status::Starvation, c0)],
                vec![(Direction::Input, PortId(0))],
                0,
            ),
            // Starved on input 1, which actor 3 does not feed.
            scripted(
                vec![(Status::Starvation, c0)],
                vec![(Direction::Input, PortId(1))],
                0,
            ),
            // Producer.
            scripted(vec![(Status::Progress, None)], vec![], 2),
        ]);
        for consumer in 0..3 {
            host.connect(3, PortId(0), consumer, PortId(0));
        }

        assert_eq!(
            trace(&mut host),
            vec![
                (0, 0, Status::Fullness),
                (0, 1, Status::Starvation),
                (0, 2, Status::Starvation),
                (0, 3, Status::Progress),
                (2, 1, Status::Suspended),
                (2, 3, Status::Suspended),
            ]
        );
        assert!(host.is_blocked(0));
        assert!(host.is_blocked(2));
    }

    #[test]
    fn consumer_progress_wakes_a_full_producer() {
        let mut host = DiscreteEventHost::new(vec![
            scripted(
                vec![(Status::Fullness, Some(ConditionId(0)))],
                vec![(Direction::Output, PortId(0))],
                0,
            ),
            scripted(vec![(Status::Progress, None)], vec![], 5),
        ]);
        host.connect(0, PortId(0), 1, PortId(0));

        assert_eq!(
            trace(&mut host),
            vec![
                (0, 0, Status::Fullness),
                (0, 1, Status::Progress),
                (5, 0, Status::Suspended),
                (5, 1, Status::Suspended),
            ]
        );
    }

    #[test]
    fn external_wake_requeues_a_blocked_actor() {
        let mut host = DiscreteEventHost::new(vec![scripted(
            vec![
                (Status::Starvation, Some(ConditionId(0))),
                (Status::Progress, None),
            ],
            vec![(Direction::Input, PortId(0))],
            1,
        )]);
        assert_eq!(host.step().map(|s| s.status), Some(Status::Starvation));
        assert!(host.step().is_none());
        assert!(host.is_blocked(0));

        host.wake(0, 7);
        assert!(!host.is_blocked(0));
        assert_eq!(host.next_ready_time(), Some(7));
        let step = host.step().unwrap();
        assert_eq!((step.time, step.status, step.virtual_time), (7, Status::Progress, 8));
    }
}
