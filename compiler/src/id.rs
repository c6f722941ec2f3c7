// id.rs — Dense index identifiers for actor machine entities
//
// Every list in an ActorMachine (states, conditions, transitions, scopes,
// input ports, output ports) is addressed by a dense integer assigned in
// declaration order. The newtypes keep the index spaces from mixing.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub fn from_index(index: usize) -> Self {
                $name(index as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

dense_id!(
    /// Index into `ActorMachine::states`.
    StateId,
    "S"
);
dense_id!(
    /// Index into `ActorMachine::conditions`.
    ConditionId,
    "c"
);
dense_id!(
    /// Index into `ActorMachine::transitions`.
    TransitionId,
    "t"
);
dense_id!(
    /// Index into `ActorMachine::scopes`.
    ScopeId,
    "scope"
);
dense_id!(
    /// Index into `ActorMachine::inputs` or `ActorMachine::outputs`,
    /// depending on the direction it is paired with.
    PortId,
    "p"
);

/// Allocator for dense ids. Produces monotonically increasing ids in
/// allocation (declaration) order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next raw index; callers wrap it in the id type of their list.
    pub fn alloc(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn count(&self) -> usize {
        self.next as usize
    }
}
