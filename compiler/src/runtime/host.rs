// host.rs — Cooperative and multicore hosts
//
// A host owns a set of actors and calls their scheduling routines until the
// network is quiescent: a full round in which no actor made progress. Every
// actor is scheduled by exactly one thread, so no routine is ever entered
// twice at once.
//
// Preconditions: actors are wired to channels before the host runs.
// Postconditions: `Quiescent` means no actor can fire without outside input.
// Failure modes: `HostError::Stalled` when a run exceeds its wall-clock
//   limit; `HostError::NoWorkers` for a zero-thread multicore host.
// Side effects: runs actor bodies; the multicore host spawns scoped threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Barrier;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::behavior::ActorBehavior;
use super::instance::{ActorInstance, Status};

// ── Schedulable ─────────────────────────────────────────────────────────────

/// An actor a host can drive.
pub trait Schedulable: Send {
    fn name(&self) -> &str;
    fn schedule(&mut self) -> Status;
}

impl<T: Send, B: ActorBehavior<T> + Send> Schedulable for ActorInstance<T, B> {
    fn name(&self) -> &str {
        ActorInstance::name(self)
    }

    fn schedule(&mut self) -> Status {
        ActorInstance::schedule(self)
    }
}

// ── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A whole round made no progress.
    Quiescent,
    /// `max_rounds` ran out first.
    RoundBudget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub rounds: u64,
    /// Scheduling calls that reported `Progress`.
    pub progress_calls: u64,
    pub reason: StopReason,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("network still running after {elapsed:?} ({rounds} rounds)")]
    Stalled { elapsed: Duration, rounds: u64 },
    #[error("multicore host needs at least one worker")]
    NoWorkers,
}

/// Round limits shared by both hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostLimits {
    pub max_rounds: Option<u64>,
    pub stall_timeout: Option<Duration>,
}

impl HostLimits {
    fn check(&self, rounds: u64, started: Instant) -> Result<Option<StopReason>, HostError> {
        if let Some(limit) = self.stall_timeout {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                return Err(HostError::Stalled { elapsed, rounds });
            }
        }
        if self.max_rounds.is_some_and(|max| rounds >= max) {
            return Ok(Some(StopReason::RoundBudget));
        }
        Ok(None)
    }
}

// ── Cooperative host ────────────────────────────────────────────────────────

/// One thread, round-robin.
pub struct CooperativeHost {
    actors: Vec<Box<dyn Schedulable>>,
    limits: HostLimits,
}

impl CooperativeHost {
    pub fn new(actors: Vec<Box<dyn Schedulable>>, limits: HostLimits) -> Self {
        CooperativeHost { actors, limits }
    }

    pub fn actors(&self) -> &[Box<dyn Schedulable>] {
        &self.actors
    }

    pub fn run(&mut self) -> Result<RunOutcome, HostError> {
        let started = Instant::now();
        let mut rounds = 0;
        let mut progress_calls = 0;
        loop {
            let mut progress = false;
            for actor in &mut self.actors {
                if actor.schedule() == Status::Progress {
                    progress = true;
                    progress_calls += 1;
                }
            }
            rounds += 1;
            tracing::debug!(round = rounds, progress, "cooperative round");
            if !progress {
                return Ok(RunOutcome {
                    rounds,
                    progress_calls,
                    reason: StopReason::Quiescent,
                });
            }
            if let Some(reason) = self.limits.check(rounds, started)? {
                return Ok(RunOutcome {
                    rounds,
                    progress_calls,
                    reason,
                });
            }
        }
    }
}

// ── Multicore host ──────────────────────────────────────────────────────────

/// N worker threads, each owning a fixed round-robin share of the actors.
/// Rounds end at a barrier where one leader decides whether to continue.
pub struct MulticoreHost {
    actors: Vec<Box<dyn Schedulable>>,
    workers: usize,
    limits: HostLimits,
}

impl MulticoreHost {
    pub fn new(
        actors: Vec<Box<dyn Schedulable>>,
        workers: usize,
        limits: HostLimits,
    ) -> Result<Self, HostError> {
        if workers == 0 {
            return Err(HostError::NoWorkers);
        }
        Ok(MulticoreHost {
            actors,
            workers,
            limits,
        })
    }

    pub fn actors(&self) -> &[Box<dyn Schedulable>] {
        &self.actors
    }

    pub fn run(&mut self) -> Result<RunOutcome, HostError> {
        let workers = self.workers.min(self.actors.len()).max(1);
        let mut parts: Vec<Vec<&mut Box<dyn Schedulable>>> =
            (0..workers).map(|_| Vec::new()).collect();
        for (i, actor) in self.actors.iter_mut().enumerate() {
            parts[i % workers].push(actor);
        }

        let started = Instant::now();
        let limits = self.limits;
        let barrier = Barrier::new(workers);
        let progress = AtomicBool::new(false);
        let rounds = AtomicU64::new(0);
        let progress_calls = AtomicU64::new(0);
        let decision: Mutex<Option<Result<StopReason, HostError>>> = Mutex::new(None);

        std::thread::scope(|s| {
            for (worker, mut part) in parts.into_iter().enumerate() {
                let (barrier, progress, rounds, progress_calls, decision) =
                    (&barrier, &progress, &rounds, &progress_calls, &decision);
                s.spawn(move || loop {
                    let mut local = 0;
                    for actor in part.iter_mut() {
                        if actor.schedule() == Status::Progress {
                            local += 1;
                        }
                    }
                    if local > 0 {
                        progress.store(true, Ordering::Release);
                        progress_calls.fetch_add(local, Ordering::Relaxed);
                    }

                    if barrier.wait().is_leader() {
                        let any = progress.swap(false, Ordering::AcqRel);
                        let round = rounds.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::debug!(round, progress = any, "multicore round");
                        let verdict = if any {
                            limits.check(round, started).transpose()
                        } else {
                            Some(Ok(StopReason::Quiescent))
                        };
                        *decision.lock() = verdict;
                    }
                    barrier.wait();

                    if decision.lock().is_some() {
                        tracing::trace!(worker, "worker done");
                        break;
                    }
                });
            }
        });

        let rounds = rounds.into_inner();
        let progress_calls = progress_calls.into_inner();
        match decision.into_inner() {
            Some(Ok(reason)) => Ok(RunOutcome {
                rounds,
                progress_calls,
                reason,
            }),
            Some(Err(e)) => Err(e),
            // Every worker exits only after a verdict is stored.
            None => Ok(RunOutcome {
                rounds,
                progress_calls,
                reason: StopReason::Quiescent,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fires `budget` times, one per call, then blocks.
    struct Countdown {
        name: String,
        budget: u32,
    }

    impl Schedulable for Countdown {
        fn name(&self) -> &str {
            &self.name
        }
        fn schedule(&mut self) -> Status {
            if self.budget == 0 {
                Status::Starvation
            } else {
                self.budget -= 1;
                Status::Progress
            }
        }
    }

    fn actors(budgets: &[u32]) -> Vec<Box<dyn Schedulable>> {
        budgets
            .iter()
            .enumerate()
            .map(|(i, &budget)| {
                Box::new(Countdown {
                    name: format!("a{i}"),
                    budget,
                }) as Box<dyn Schedulable>
            })
            .collect()
    }

    #[test]
    fn cooperative_runs_until_quiescent() {
        let mut host = CooperativeHost::new(actors(&[3, 1]), HostLimits::default());
        let outcome = host.run().unwrap();
        assert_eq!(outcome.reason, StopReason::Quiescent);
        assert_eq!(outcome.rounds, 4);
        assert_eq!(outcome.progress_calls, 4);
        assert_eq!(host.actors()[1].name(), "a1");
    }

    #[test]
    fn cooperative_round_budget() {
        let limits = HostLimits {
            max_rounds: Some(2),
            ..HostLimits::default()
        };
        let outcome = CooperativeHost::new(actors(&[10]), limits).run().unwrap();
        assert_eq!(outcome.reason, StopReason::RoundBudget);
        assert_eq!(outcome.rounds, 2);
    }

    #[test]
    fn cooperative_stall_timeout() {
        let limits = HostLimits {
            stall_timeout: Some(Duration::ZERO),
            ..HostLimits::default()
        };
        let mut host = CooperativeHost::new(actors(&[u32::MAX]), limits);
        assert!(matches!(host.run(), Err(HostError::Stalled { .. })));
    }

    #[test]
    fn multicore_matches_cooperative_totals() {
        let mut host =
            MulticoreHost::new(actors(&[5, 2, 7, 1]), 3, HostLimits::default()).unwrap();
        let outcome = host.run().unwrap();
        assert_eq!(outcome.reason, StopReason::Quiescent);
        assert_eq!(outcome.progress_calls, 15);
        assert_eq!(outcome.rounds, 8);
    }

    #[test]
    fn multicore_rejects_zero_workers() {
        assert!(matches!(
            MulticoreHost::new(actors(&[1]), 0, HostLimits::default()),
            Err(HostError::NoWorkers)
        ));
    }

    #[test]
    fn multicore_round_budget() {
        let limits = HostLimits {
            max_rounds: Some(3),
            ..HostLimits::default()
        };
        let mut host = MulticoreHost::new(actors(&[100, 100]), 2, limits).unwrap();
        let outcome = host.run().unwrap();
        assert_eq!(outcome.reason, StopReason::RoundBudget);
        assert_eq!(outcome.rounds, 3);
        assert_eq!(outcome.progress_calls, 6);
    }

    #[test]
    fn multicore_with_no_actors_is_quiescent() {
        let mut host = MulticoreHost::new(Vec::new(), 4, HostLimits::default()).unwrap();
        let outcome = host.run().unwrap();
        assert_eq!(outcome.reason, StopReason::Quiescent);
        assert_eq!(outcome.rounds, 1);
    }
}
