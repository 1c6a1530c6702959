use log::trace;

use super::net::{Net, NetConfig};
use crate::coherence::{AccessInfo, CoherenceEvent, DeviceId, EventDispatcher, EventListener, Message, ProcessId};
use crate::timeq::{Cycle, EventQueue};

#[derive(Debug, Clone)]
pub enum Delivery {
    Request(Message),
    Reply(Message),
}

impl Delivery {
    pub fn message(&self) -> &Message {
        match self {
            Self::Request(message) | Self::Reply(message) => message,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Reply(_))
    }
}

#[derive(Debug)]
pub enum Event {
    /// Run one pass over a controller's pending processes.
    Tick(DeviceId),
    /// A process queued on a line lock may try again.
    Wake { device: DeviceId, process: ProcessId },
    Deliver {
        from: DeviceId,
        to: DeviceId,
        delivery: Delivery,
    },
    /// Re-issue a core access that failed at its first-level cache.
    Retry { core: usize, access: AccessInfo },
}

/// Shared simulation services: the event queue, both interconnects and the listener hub.
#[derive(Debug)]
pub struct Kernel {
    queue: EventQueue<Event>,
    l1_net: Net,
    mem_net: Net,
    dispatcher: EventDispatcher,
}

impl Kernel {
    pub fn new(net: &NetConfig, trace: bool) -> Self {
        Self {
            queue: EventQueue::new(),
            l1_net: Net::new("l1-llc", net.l1_to_llc, trace),
            mem_net: Net::new("llc-mem", net.llc_to_mem, trace),
            dispatcher: EventDispatcher::new(),
        }
    }

    pub fn now(&self) -> Cycle {
        self.queue.now()
    }

    pub fn schedule(&mut self, event: Event, delay: Cycle) {
        self.queue.schedule(event, delay);
    }

    pub fn schedule_at(&mut self, event: Event, at: Cycle) {
        self.queue.schedule_at(event, at);
    }

    pub fn pop(&mut self) -> Option<(Cycle, Event)> {
        self.queue.pop()
    }

    pub fn peek_cycle(&self) -> Option<Cycle> {
        self.queue.peek_cycle()
    }

    pub fn advance_to(&mut self, cycle: Cycle) {
        self.queue.advance_to(cycle);
    }

    pub fn has_pending_events(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn l1_net(&self) -> &Net {
        &self.l1_net
    }

    pub fn mem_net(&self) -> &Net {
        &self.mem_net
    }

    pub fn add_listener(&mut self, listener: EventListener) {
        self.dispatcher.add_listener(listener);
    }

    pub fn dispatch(&mut self, event: &CoherenceEvent) {
        self.dispatcher.dispatch(event);
    }

    /// Send `delivery` now; it arrives after the link latency for `size_bytes`.
    pub fn transfer(&mut self, from: DeviceId, to: DeviceId, delivery: Delivery, size_bytes: u32) {
        self.transfer_after(from, to, delivery, size_bytes, 0);
    }

    /// Send `delivery` once `delay` cycles of local service have elapsed.
    pub fn transfer_after(
        &mut self,
        from: DeviceId,
        to: DeviceId,
        delivery: Delivery,
        size_bytes: u32,
        delay: Cycle,
    ) {
        let sent_at = self.now().saturating_add(delay);
        let net = if from == DeviceId::Memory || to == DeviceId::Memory {
            &mut self.mem_net
        } else {
            &mut self.l1_net
        };
        let name = delivery.message().kind.name();
        let ticket = net.transfer(sent_at, from, to, name, delivery.is_reply(), size_bytes);
        trace!(
            "{} -> {}: {} {} ({} bytes, arrives {})",
            from,
            to,
            if delivery.is_reply() { "reply" } else { "request" },
            delivery.message(),
            size_bytes,
            ticket.ready_at()
        );
        self.queue
            .schedule_at(Event::Deliver { from, to, delivery }, ticket.ready_at());
    }
}
