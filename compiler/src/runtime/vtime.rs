// vtime.rs — Virtual-time records
//
// Shared vocabulary of the virtual-time scheduling call and the
// discrete-event host.

use serde::Serialize;

use crate::id::{ConditionId, TransitionId};

use super::instance::Status;

/// Logical clock value. Tokens, actors and the host all count in these units.
pub type VirtualTime = u64;

/// One firing as seen on the virtual time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub transition: TransitionId,
    pub start: VirtualTime,
    pub latency: u64,
}

impl TraceEntry {
    pub fn end(&self) -> VirtualTime {
        self.start + self.latency
    }
}

/// Outcome of one virtual-time scheduling call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    pub status: Status,
    /// Transitions fired during the call, in order.
    pub fired: Vec<TransitionId>,
    /// Condition the call suspended on, if it ended in a Wait right after
    /// a failed test.
    pub waited: Option<ConditionId>,
    /// Actor clock after the call.
    pub virtual_time: VirtualTime,
}
