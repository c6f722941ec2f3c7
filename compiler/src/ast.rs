// AST node types for actor machine `.am` source files.
//
// Every node carries a `SimpleSpan` for error reporting in `lower`.
// Indices are kept as written; density and ordering are checked downstream.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete `.am` file: a sequence of actor definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub actors: Vec<ActorDef>,
    pub span: Span,
}

/// `actor NAME { item* }`
#[derive(Debug, Clone, PartialEq)]
pub struct ActorDef {
    pub name: Ident,
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// An explicit index as written in the source (`state 3 = ...`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Index {
    pub value: u64,
    pub span: Span,
}

/// A bracketed index list (`reads [0, 2]`).
pub type IndexList = Vec<Index>;

// ── Items ──

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Input(Ident),
    Output(Ident),
    Scope(ScopeItem),
    Condition(ConditionItem),
    Transition(TransitionItem),
    Initial(Index),
    State(StateItem),
}

// ── scope INT (transient|persistent) decls? reads? ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeLifetime {
    Transient,
    Persistent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeItem {
    pub index: Index,
    pub lifetime: ScopeLifetime,
    pub declarations: Vec<Ident>,
    pub reads: IndexList,
}

// ── condition INT = cond ──

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionItem {
    pub index: Index,
    pub body: ConditionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionBody {
    /// `tokens PORT n`: at least `n` tokens on input `PORT`.
    Tokens { port: Ident, count: Index },
    /// `space PORT n`: room for at least `n` tokens on output `PORT`.
    Space { port: Ident, count: Index },
    /// `guard "expr" reads [..]?`
    Guard {
        expr: String,
        expr_span: Span,
        reads: IndexList,
    },
}

// ── transition INT = "body" rate* reads? kills? latency? ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateKind {
    Consume,
    Produce,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rate {
    pub kind: RateKind,
    pub port: Ident,
    pub count: Index,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionItem {
    pub index: Index,
    pub body: String,
    pub rates: Vec<Rate>,
    pub reads: IndexList,
    pub kills: IndexList,
    pub latency: Option<Index>,
}

// ── state INT = instr ──

#[derive(Debug, Clone, PartialEq)]
pub struct StateItem {
    pub index: Index,
    pub instr: InstrAst,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrAst {
    Test {
        condition: Index,
        if_true: Index,
        if_false: Index,
    },
    Wait {
        target: Index,
    },
    Exec {
        transition: Index,
        target: Index,
    },
}
