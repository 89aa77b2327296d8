//! Discrete-event queue shared by all PHYs of a scenario.
//!
//! Events are ordered by due time, then by insertion order, so events due at
//! the same instant are delivered in the order they were scheduled.

use embassy_time::{Duration, Instant};
use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

use crate::phy::{EventId, PhyEvent, Scheduler};

struct Entry<E> {
    at: Instant,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

pub struct EventQueue<E> {
    now: Instant,
    next_seq: u64,
    heap: BinaryHeap<Reverse<Entry<E>>>,
    pending: HashSet<u64>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self { now: Instant::from_ticks(0), next_seq: 0, heap: BinaryHeap::new(), pending: HashSet::new() }
    }

    /// Time of the most recently popped event.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn schedule_at(&mut self, at: Instant, event: E) -> EventId {
        let seq = self.next_seq;
        self.next_seq += 1;
        // Events are never scheduled in the past.
        let at = at.max(self.now);
        self.heap.push(Reverse(Entry { at, seq, event }));
        self.pending.insert(seq);
        EventId(seq)
    }

    pub fn schedule(&mut self, delay: Duration, event: E) -> EventId {
        self.schedule_at(self.now + delay, event)
    }

    /// Cancel a pending event. Unknown or already delivered ids are ignored.
    pub fn cancel(&mut self, id: EventId) {
        self.pending.remove(&id.0);
    }

    /// Pop the next live event and advance the clock to it.
    pub fn pop(&mut self) -> Option<(Instant, E)> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            if !self.pending.remove(&entry.seq) {
                continue;
            }
            self.now = entry.at;
            return Some((entry.at, entry.event));
        }
        None
    }

    /// Number of live scheduled events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Events of the scenario runner.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// Start of the scripted transmission with the given index.
    Transmission(usize),
    /// A PHY event for the receiver identified by `target`.
    Phy { target: PhyTarget, event: PhyEvent },
}

/// Carrier a receive PHY listens on. The sidelink shares the uplink carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Carrier {
    Downlink,
    Uplink,
}

/// Which PHY of a node an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhyTarget {
    Tx(u32),
    Rx(u32, Carrier),
}

/// [`Scheduler`] handed to one PHY; routes its events through the shared queue.
pub struct PhyScheduler {
    queue: Rc<RefCell<EventQueue<SimEvent>>>,
    target: PhyTarget,
}

impl PhyScheduler {
    pub fn new(queue: Rc<RefCell<EventQueue<SimEvent>>>, target: PhyTarget) -> Self {
        Self { queue, target }
    }
}

impl Scheduler for PhyScheduler {
    fn now(&self) -> Instant {
        self.queue.borrow().now()
    }

    fn schedule(&mut self, delay: Duration, event: PhyEvent) -> EventId {
        self.queue.borrow_mut().schedule(delay, SimEvent::Phy { target: self.target, event })
    }

    fn cancel(&mut self, id: EventId) {
        self.queue.borrow_mut().cancel(id);
    }
}
