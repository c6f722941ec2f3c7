// scopes.rs — Scope initialization planning
//
// Decides, for every controller state, which transient scopes must be
// (re)initialized before the state's instruction runs. Two strategies:
//
//   Conservative: everything the state and its descendants up to the next
//     Wait will read (backward union fixpoint). Re-run on every pass.
//   Liveness: forward must-availability; a state initializes only what it
//     reads and is not guaranteed valid on every incoming path.
//
// Preconditions: `am` passed `verify::verify_actor_machine` (A1-A3).
// Postconditions: along every path from an entry state, each transient scope
//   read by an instruction has been initialized since its last invalidation.
//   Per-state lists are in dependency order.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::am::{ActorMachine, Instruction};
use crate::id::{ScopeId, StateId, TransitionId};

// ── Scope bitset ────────────────────────────────────────────────────────────

/// Fixed-universe set of scope ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeSet {
    words: Vec<u64>,
    len: usize,
}

impl ScopeSet {
    pub fn empty(len: usize) -> Self {
        ScopeSet {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn full(len: usize) -> Self {
        let mut set = Self::empty(len);
        for i in 0..len {
            set.insert(ScopeId::from_index(i));
        }
        set
    }

    pub fn insert(&mut self, id: ScopeId) {
        let i = id.index();
        self.words[i / 64] |= 1 << (i % 64);
    }

    pub fn remove(&mut self, id: ScopeId) {
        let i = id.index();
        self.words[i / 64] &= !(1 << (i % 64));
    }

    pub fn contains(&self, id: ScopeId) -> bool {
        let i = id.index();
        i < self.len && self.words[i / 64] & (1 << (i % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `self ∪= other`; returns true if `self` grew.
    pub fn union_with(&mut self, other: &ScopeSet) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let next = *a | *b;
            changed |= next != *a;
            *a = next;
        }
        changed
    }

    /// `self ∩= other`; returns true if `self` shrank.
    pub fn intersect_with(&mut self, other: &ScopeSet) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let next = *a & *b;
            changed |= next != *a;
            *a = next;
        }
        changed
    }

    pub fn subtract(&mut self, other: &ScopeSet) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= !*b;
        }
    }

    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| *a & !*b == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = ScopeId> + '_ {
        (0..self.len)
            .map(ScopeId::from_index)
            .filter(|id| self.contains(*id))
    }
}

// ── Static scope relations ──────────────────────────────────────────────────

/// Per-machine scope facts shared by both strategies and by runtime checks.
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    n: usize,
    transient: ScopeSet,
    /// `deps[i]`: scopes reachable from `i` through initializer reads, plus `i`.
    deps: Vec<ScopeSet>,
    /// `dependents[i]`: scopes whose initializer transitively reads `i`, plus `i`.
    dependents: Vec<ScopeSet>,
    /// Every scope after all scopes it reads.
    topo: Vec<ScopeId>,
}

impl ScopeInfo {
    pub fn new(am: &ActorMachine) -> Self {
        let n = am.scopes.len();
        let mut transient = ScopeSet::empty(n);
        for (i, scope) in am.scopes.iter().enumerate() {
            if !scope.is_persistent() {
                transient.insert(ScopeId::from_index(i));
            }
        }

        // Post-order DFS over reads gives dependency order directly.
        let mut topo = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        for root in 0..n {
            if visited[root] {
                continue;
            }
            visited[root] = true;
            let mut stack = vec![(root, 0usize)];
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let reads = &am.scopes[node].reads;
                if top.1 < reads.len() {
                    let dep = reads[top.1].index();
                    top.1 += 1;
                    if !visited[dep] {
                        visited[dep] = true;
                        stack.push((dep, 0));
                    }
                } else {
                    topo.push(ScopeId::from_index(node));
                    stack.pop();
                }
            }
        }

        // Transitive closures, in topological order so each dep is complete.
        let mut deps = vec![ScopeSet::empty(n); n];
        for &id in &topo {
            let mut set = ScopeSet::empty(n);
            set.insert(id);
            for r in &am.scope(id).reads {
                let sub = deps[r.index()].clone();
                set.union_with(&sub);
            }
            deps[id.index()] = set;
        }

        let mut dependents = vec![ScopeSet::empty(n); n];
        for (i, set) in deps.iter().enumerate() {
            for d in set.iter() {
                dependents[d.index()].insert(ScopeId::from_index(i));
            }
        }

        ScopeInfo {
            n,
            transient,
            deps,
            dependents,
            topo,
        }
    }

    pub fn scope_count(&self) -> usize {
        self.n
    }

    pub fn is_transient(&self, id: ScopeId) -> bool {
        self.transient.contains(id)
    }

    /// Transient scopes that must be valid before `state`'s instruction runs.
    pub fn required(&self, am: &ActorMachine, state: StateId) -> ScopeSet {
        let reads: &[ScopeId] = match am.state(state).instruction {
            Instruction::Test { condition, .. } => am.condition(condition).reads(),
            Instruction::Exec { transition, .. } => &am.transition(transition).reads,
            Instruction::Wait { .. } => &[],
        };
        let mut set = self.dep_closure(reads);
        set.intersect_with(&self.transient);
        set
    }

    /// Transient scopes invalidated by firing `transition`.
    pub fn killed_by(&self, am: &ActorMachine, transition: TransitionId) -> ScopeSet {
        let mut set = ScopeSet::empty(self.n);
        for k in &am.transition(transition).kills {
            set.union_with(&self.dependents[k.index()]);
        }
        set.intersect_with(&self.transient);
        set
    }

    /// True if `a`'s initializer transitively reads `b`.
    pub fn depends_on(&self, a: ScopeId, b: ScopeId) -> bool {
        a != b && self.deps[a.index()].contains(b)
    }

    pub fn transient(&self) -> &ScopeSet {
        &self.transient
    }

    fn dep_closure(&self, roots: &[ScopeId]) -> ScopeSet {
        let mut set = ScopeSet::empty(self.n);
        for r in roots {
            set.union_with(&self.deps[r.index()]);
        }
        set
    }

    /// Members of `set` in dependency order.
    pub fn ordered(&self, set: &ScopeSet) -> Vec<ScopeId> {
        self.topo
            .iter()
            .copied()
            .filter(|id| set.contains(*id))
            .collect()
    }
}

// ── Plans ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitStrategy {
    Conservative,
    Liveness,
}

impl fmt::Display for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStrategy::Conservative => write!(f, "conservative"),
            InitStrategy::Liveness => write!(f, "liveness"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInitPlan {
    pub strategy: InitStrategy,
    /// Scopes to initialize at actor construction: every persistent scope
    /// and whatever its initializer reads, in dependency order.
    pub construction: Vec<ScopeId>,
    /// Per-state initializer lists, in dependency order.
    pub per_state: Vec<Vec<ScopeId>>,
}

impl ScopeInitPlan {
    pub fn at(&self, state: StateId) -> &[ScopeId] {
        &self.per_state[state.index()]
    }

    /// Total initializer calls across all states (static count).
    pub fn total_inits(&self) -> usize {
        self.per_state.iter().map(Vec::len).sum()
    }
}

impl fmt::Display for ScopeInitPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "strategy {}", self.strategy)?;
        write!(f, "construction:")?;
        for s in &self.construction {
            write!(f, " {s}")?;
        }
        writeln!(f)?;
        for (i, list) in self.per_state.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            write!(f, "{}:", StateId::from_index(i))?;
            for s in list {
                write!(f, " {s}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub fn plan(am: &ActorMachine, strategy: InitStrategy) -> ScopeInitPlan {
    let info = ScopeInfo::new(am);
    plan_with(am, &info, strategy)
}

pub fn plan_with(am: &ActorMachine, info: &ScopeInfo, strategy: InitStrategy) -> ScopeInitPlan {
    let sets = match strategy {
        InitStrategy::Conservative => conservative(am, info),
        InitStrategy::Liveness => liveness(am, info),
    };

    let mut persistent = ScopeSet::empty(info.scope_count());
    for (i, scope) in am.scopes.iter().enumerate() {
        if scope.is_persistent() {
            persistent.union_with(&info.deps[i]);
        }
    }

    let plan = ScopeInitPlan {
        strategy,
        construction: info.ordered(&persistent),
        per_state: sets.iter().map(|s| info.ordered(s)).collect(),
    };
    tracing::debug!(
        actor = %am.name,
        %strategy,
        initializers = plan.total_inits(),
        "scope plan ready"
    );
    plan
}

/// need(s) = required(s) ∪ need(succ) for every successor not behind a Wait.
fn conservative(am: &ActorMachine, info: &ScopeInfo) -> Vec<ScopeSet> {
    let n = am.states.len();
    let required: Vec<ScopeSet> = am.state_ids().map(|s| info.required(am, s)).collect();
    let mut need = required.clone();
    let preds = am.predecessors();

    let mut worklist: Vec<StateId> = am.state_ids().collect();
    let mut queued = vec![true; n];
    while let Some(s) = worklist.pop() {
        queued[s.index()] = false;
        let current = need[s.index()].clone();
        for &p in &preds[s.index()] {
            if am.state(p).instruction.is_wait() {
                continue;
            }
            if need[p.index()].union_with(&current) && !queued[p.index()] {
                queued[p.index()] = true;
                worklist.push(p);
            }
        }
    }
    need
}

/// init(s) = required(s) − avail_in(s), with avail_in a must-analysis.
fn liveness(am: &ActorMachine, info: &ScopeInfo) -> Vec<ScopeSet> {
    let n = am.states.len();
    let m = info.scope_count();
    let required: Vec<ScopeSet> = am.state_ids().map(|s| info.required(am, s)).collect();

    let entries = entry_states(am);
    let mut avail_in: Vec<ScopeSet> = (0..n)
        .map(|i| {
            if entries[i] {
                ScopeSet::empty(m)
            } else {
                ScopeSet::full(m)
            }
        })
        .collect();

    let avail_out = |s: StateId, avail_in: &ScopeSet| -> ScopeSet {
        match am.state(s).instruction {
            Instruction::Wait { .. } => ScopeSet::empty(m),
            Instruction::Test { .. } => {
                let mut out = avail_in.clone();
                out.union_with(&required[s.index()]);
                out
            }
            Instruction::Exec { transition, .. } => {
                let mut out = avail_in.clone();
                out.union_with(&required[s.index()]);
                out.subtract(&info.killed_by(am, transition));
                out
            }
        }
    };

    let mut worklist: Vec<StateId> = am.state_ids().collect();
    let mut queued = vec![true; n];
    while let Some(s) = worklist.pop() {
        queued[s.index()] = false;
        let out = avail_out(s, &avail_in[s.index()]);
        for succ in am.state(s).instruction.successors() {
            if entries[succ.index()] {
                continue;
            }
            if avail_in[succ.index()].intersect_with(&out) && !queued[succ.index()] {
                queued[succ.index()] = true;
                worklist.push(succ);
            }
        }
    }

    required
        .into_iter()
        .zip(&avail_in)
        .map(|(mut req, avail)| {
            req.subtract(avail);
            req
        })
        .collect()
}

/// Initial state, every Wait target, and every state not reachable from those.
pub fn entry_states(am: &ActorMachine) -> Vec<bool> {
    let n = am.states.len();
    let mut entries = vec![false; n];
    entries[am.initial.index()] = true;
    for t in am.wait_targets() {
        entries[t.index()] = true;
    }

    let mut reached = entries.clone();
    let mut stack: Vec<StateId> = am.state_ids().filter(|s| entries[s.index()]).collect();
    while let Some(s) = stack.pop() {
        for succ in am.state(s).instruction.successors() {
            if !reached[succ.index()] {
                reached[succ.index()] = true;
                stack.push(succ);
            }
        }
    }
    for i in 0..n {
        if !reached[i] {
            entries[i] = true;
        }
    }
    entries
}
