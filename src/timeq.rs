/*
Time-queue for the coherence model.

Every device of the memory system is driven from one discrete-event queue.  Events are ordered
by the cycle they fire at and, within a cycle, by the order they were scheduled in, so a run is
fully determined by its inputs and seeds.

Links between devices follow a simple service law: a fixed base latency plus a throughput
component expressed in bytes-per-cycle.  A transfer yields a `Ticket` describing when the
payload becomes visible at the receiving end.
*/

use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub type Cycle = u64;

// Result of pushing a payload through a link
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
    size_bytes: u32,
}

impl Ticket {
    pub fn new(issued_at: Cycle, ready_at: Cycle, size_bytes: u32) -> Self {
        Self {
            issued_at,
            ready_at,
            size_bytes,
        }
    }

    // Cycle at which the payload entered the link.
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    // Cycle at which the payload is delivered.
    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }

    // Number of cycles until the ticket is ready.  Returns zero if already ready.
    pub fn remaining_cycles(&self, now: Cycle) -> Cycle {
        self.ready_at.saturating_sub(now)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    // Fixed latency added to every transfer
    pub base_latency: Cycle,
    // Throughput
    pub bytes_per_cycle: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_latency: 1,
            bytes_per_cycle: 32,
        }
    }
}

impl LinkConfig {
    pub fn latency(&self, size_bytes: u32) -> Cycle {
        let service_cycles = ceil_div_u64(size_bytes as u64, self.bytes_per_cycle.max(1) as u64);
        self.base_latency.saturating_add(service_cycles)
    }

    pub fn ticket(&self, now: Cycle, size_bytes: u32) -> Ticket {
        Ticket::new(now, now.saturating_add(self.latency(size_bytes)), size_bytes)
    }
}

fn ceil_div_u64(nom: u64, denom: u64) -> Cycle {
    debug_assert!(denom > 0);
    (nom + denom - 1) / denom
}

#[derive(Debug)]
struct Scheduled<E> {
    at: Cycle,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap; invert so the earliest (cycle, seq) pops first.
impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cycle-accurate event queue.  Same-cycle events fire in scheduling order.
#[derive(Debug)]
pub struct EventQueue<E> {
    now: Cycle,
    seq: u64,
    heap: BinaryHeap<Scheduled<E>>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: 0,
            seq: 0,
            heap: BinaryHeap::new(),
        }
    }

    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn schedule(&mut self, event: E, delay: Cycle) {
        self.schedule_at(event, self.now.saturating_add(delay));
    }

    pub fn schedule_at(&mut self, event: E, at: Cycle) {
        assert!(at >= self.now, "cannot schedule into the past ({} < {})", at, self.now);
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Scheduled { at, seq, event });
    }

    /// Cycle of the earliest pending event.
    pub fn peek_cycle(&self) -> Option<Cycle> {
        self.heap.peek().map(|scheduled| scheduled.at)
    }

    /// Pop the earliest event and advance the clock to it.
    pub fn pop(&mut self) -> Option<(Cycle, E)> {
        let scheduled = self.heap.pop()?;
        self.now = scheduled.at;
        Some((scheduled.at, scheduled.event))
    }

    /// Move the clock forward without firing anything.  Only legal up to the next pending event.
    pub fn advance_to(&mut self, cycle: Cycle) {
        if let Some(next) = self.peek_cycle() {
            assert!(cycle <= next, "advancing past a pending event at {}", next);
        }
        self.now = self.now.max(cycle);
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_pop_in_cycle_then_schedule_order() {
        let mut queue = EventQueue::new();
        queue.schedule("late", 5);
        queue.schedule("first", 0);
        queue.schedule("second", 0);
        queue.schedule("mid", 2);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(
            order,
            vec![(0, "first"), (0, "second"), (2, "mid"), (5, "late")]
        );
        assert_eq!(queue.now(), 5);
    }

    #[test]
    fn schedule_is_relative_to_now() {
        let mut queue = EventQueue::new();
        queue.schedule(1u32, 10);
        assert_eq!(queue.pop(), Some((10, 1)));
        queue.schedule(2u32, 3);
        assert_eq!(queue.peek_cycle(), Some(13));
    }

    #[test]
    #[should_panic]
    fn scheduling_into_the_past_panics() {
        let mut queue = EventQueue::new();
        queue.schedule((), 4);
        queue.pop();
        queue.schedule_at((), 1);
    }

    #[test]
    fn link_latency_counts_bytes() {
        let link = LinkConfig {
            base_latency: 2,
            bytes_per_cycle: 32,
        };
        assert_eq!(link.latency(8), 3);
        assert_eq!(link.latency(72), 5);
        let ticket = link.ticket(10, 72);
        assert_eq!(ticket.ready_at(), 15);
        assert_eq!(ticket.remaining_cycles(12), 3);
        assert!(!ticket.is_ready(14));
        assert!(ticket.is_ready(15));
    }
}
