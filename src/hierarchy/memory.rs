use log::trace;
use serde::{Deserialize, Serialize};

use super::kernel::{Delivery, Kernel};
use crate::coherence::{data_bytes, DeviceId, Message, MessageKind, CONTROL_BYTES};
use crate::sim::config::Config;
use crate::timeq::Cycle;

/// `[mem]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MemConfig {
    pub latency: Cycle,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self { latency: 100 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    reads: u64,
    writes: u64,
}

impl MemoryStats {
    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

/// Fixed-latency backing store.  Contents are not modelled; every request is answered.
#[derive(Debug)]
pub struct MainMemory {
    latency: Cycle,
    line_size: u32,
    stats: MemoryStats,
}

impl MainMemory {
    pub fn new(config: &MemConfig, line_size: u32) -> Self {
        Self {
            latency: config.latency,
            line_size,
            stats: MemoryStats::default(),
        }
    }

    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    pub fn receive_request(&mut self, message: Message, kernel: &mut Kernel) {
        let size = match message.kind {
            MessageKind::MemRead => {
                self.stats.reads = self.stats.reads.saturating_add(1);
                data_bytes(self.line_size)
            }
            MessageKind::MemWrite => {
                self.stats.writes = self.stats.writes.saturating_add(1);
                CONTROL_BYTES
            }
            _ => panic!("main memory cannot serve {}", message),
        };
        trace!("mem: {}", message);
        let to = message.sender;
        kernel.transfer_after(DeviceId::Memory, to, Delivery::Reply(message), size, self.latency);
    }
}
