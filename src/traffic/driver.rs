use serde::Serialize;

use crate::coherence::{AccessCompletion, AccessRejectReason};
use crate::hierarchy::MemorySystem;
use crate::timeq::Cycle;
use crate::traffic::config::TrafficConfig;
use crate::traffic::logging::TrafficLogger;
use crate::traffic::patterns::{PatternEngine, TrafficAccess};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TrafficStats {
    pub issued: u64,
    pub completed: u64,
    pub rejected_ports_busy: u64,
    pub rejected_store_pending: u64,
    pub total_latency: u64,
    pub max_latency: Cycle,
}

impl TrafficStats {
    pub fn average_latency(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.completed as f64
        }
    }
}

/// Feeds every core its generated stream, keeping at most `max_outstanding_per_core`
/// accesses in flight per core.  A rejected access is held and offered again on the next
/// call.
#[derive(Debug)]
pub struct TrafficDriver {
    engine: PatternEngine,
    held: Vec<Option<TrafficAccess>>,
    outstanding: Vec<usize>,
    completed: Vec<usize>,
    max_outstanding: usize,
    checkpoint_every: usize,
    stats: TrafficStats,
}

impl TrafficDriver {
    pub fn new(config: &TrafficConfig, num_cores: usize, seed: u64) -> Self {
        Self {
            engine: PatternEngine::new(config, num_cores, seed),
            held: vec![None; num_cores],
            outstanding: vec![0; num_cores],
            completed: vec![0; num_cores],
            max_outstanding: config.issue.max_outstanding_per_core.max(1),
            checkpoint_every: config.logging.checkpoint_every,
            stats: TrafficStats::default(),
        }
    }

    pub fn stats(&self) -> &TrafficStats {
        &self.stats
    }

    pub fn outstanding(&self, core: usize) -> usize {
        self.outstanding[core]
    }

    /// Offer each core's next accesses to the memory system at the current cycle.
    pub fn issue(&mut self, system: &mut MemorySystem) {
        for core in 0..self.engine.num_cores() {
            while self.outstanding[core] < self.max_outstanding {
                let Some(access) = self.held[core]
                    .take()
                    .or_else(|| self.engine.next_access(core))
                else {
                    break;
                };
                match system.issue(core, access.kind, access.address) {
                    Ok(_) => {
                        self.outstanding[core] += 1;
                        self.stats.issued += 1;
                    }
                    Err(reject) => {
                        match reject.reason {
                            AccessRejectReason::PortsBusy => self.stats.rejected_ports_busy += 1,
                            AccessRejectReason::StorePending => {
                                self.stats.rejected_store_pending += 1
                            }
                        }
                        self.held[core] = Some(access);
                        break;
                    }
                }
            }
        }
    }

    pub fn complete(&mut self, completion: &AccessCompletion) {
        let core = completion.core;
        assert!(
            self.outstanding[core] > 0,
            "core {} completed access #{} it never issued",
            core,
            completion.id
        );
        self.outstanding[core] -= 1;
        self.completed[core] += 1;

        let latency = completion.latency();
        self.stats.completed += 1;
        self.stats.total_latency += latency;
        self.stats.max_latency = self.stats.max_latency.max(latency);

        let total = self.engine.accesses_per_core();
        if self.checkpoint_every > 0 && self.completed[core] % self.checkpoint_every == 0 {
            TrafficLogger::log_checkpoint(core, self.completed[core], total, completion.completed_at);
        }
        if self.completed[core] == total {
            TrafficLogger::log_core_done(core, completion.completed_at);
        }
    }

    pub fn is_done(&self) -> bool {
        (0..self.engine.num_cores()).all(|core| {
            self.engine.is_exhausted(core)
                && self.held[core].is_none()
                && self.outstanding[core] == 0
        })
    }
}
