use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

use crate::coherence::DeviceId;
use crate::sim::config::Config;
use crate::timeq::{Cycle, LinkConfig, Ticket};

/// `[net]` section: one link model for the core side, one toward main memory.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub l1_to_llc: LinkConfig,
    pub llc_to_mem: LinkConfig,
}

impl Config for NetConfig {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetStats {
    messages: u64,
    bytes: u64,
    data_messages: u64,
    max_latency: Cycle,
}

impl NetStats {
    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn data_messages(&self) -> u64 {
        self.data_messages
    }

    pub fn max_latency(&self) -> Cycle {
        self.max_latency
    }

    fn record(&mut self, ticket: &Ticket) {
        self.messages = self.messages.saturating_add(1);
        self.bytes = self.bytes.saturating_add(ticket.size_bytes() as u64);
        if ticket.size_bytes() > crate::coherence::CONTROL_BYTES {
            self.data_messages = self.data_messages.saturating_add(1);
        }
        self.max_latency = self
            .max_latency
            .max(ticket.ready_at() - ticket.issued_at());
    }
}

impl AddAssign<&NetStats> for NetStats {
    fn add_assign(&mut self, rhs: &NetStats) {
        self.messages = self.messages.saturating_add(rhs.messages);
        self.bytes = self.bytes.saturating_add(rhs.bytes);
        self.data_messages = self.data_messages.saturating_add(rhs.data_messages);
        self.max_latency = self.max_latency.max(rhs.max_latency);
    }
}

/// One entry of the optional transfer trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub sent_at: Cycle,
    pub arrives_at: Cycle,
    pub from: DeviceId,
    pub to: DeviceId,
    pub message: &'static str,
    pub is_reply: bool,
    pub size_bytes: u32,
}

/// Latency-only interconnect.  Messages never contend with each other.
#[derive(Debug)]
pub struct Net {
    name: String,
    link: LinkConfig,
    stats: NetStats,
    trace: Option<Vec<TransferRecord>>,
}

impl Net {
    pub fn new(name: &str, link: LinkConfig, trace: bool) -> Self {
        Self {
            name: name.to_string(),
            link,
            stats: NetStats::default(),
            trace: trace.then(Vec::new),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    pub fn trace(&self) -> &[TransferRecord] {
        self.trace.as_deref().unwrap_or(&[])
    }

    pub fn transfer(
        &mut self,
        now: Cycle,
        from: DeviceId,
        to: DeviceId,
        message: &'static str,
        is_reply: bool,
        size_bytes: u32,
    ) -> Ticket {
        let ticket = self.link.ticket(now, size_bytes);
        self.stats.record(&ticket);
        if let Some(trace) = self.trace.as_mut() {
            trace.push(TransferRecord {
                sent_at: now,
                arrives_at: ticket.ready_at(),
                from,
                to,
                message,
                is_reply,
                size_bytes,
            });
        }
        ticket
    }
}
