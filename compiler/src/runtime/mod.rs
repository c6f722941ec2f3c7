// runtime — Executing compiled controllers
//
// Channels, condition evaluation, the per-actor scheduling trampoline and
// the hosts that drive networks of actors.

pub mod behavior;
pub mod channel;
pub mod condition;
pub mod host;
pub mod instance;
pub mod sim;
pub mod vtime;

pub use behavior::{ActorBehavior, Ports};
pub use channel::{channel, ChannelStats, Reader, Writer};
pub use host::{
    CooperativeHost, HostError, HostLimits, MulticoreHost, RunOutcome, Schedulable, StopReason,
};
pub use instance::{ActorInstance, Status};
pub use sim::{DiscreteEventHost, SimOutcome, SimStop, StepReport, TimedSchedulable};
pub use vtime::{ScheduleReport, TraceEntry, VirtualTime};
