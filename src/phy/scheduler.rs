//! Seam between the receiver and the discrete-event driver.

use embassy_time::{Duration, Instant};

/// End-of-interval events the receiver schedules for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyEvent {
    EndTx,
    EndRxData,
    EndRxControl,
    EndRxSidelink,
    EndRxSrs,
}

/// Handle of a scheduled event, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

/// Discrete-event scheduler injected into the receiver.
///
/// Events scheduled here must be delivered back through
/// [`Receiver::handle_event`](super::Receiver::handle_event) at their due time.
pub trait Scheduler {
    fn now(&self) -> Instant;
    fn schedule(&mut self, delay: Duration, event: PhyEvent) -> EventId;
    fn cancel(&mut self, id: EventId);
}
