use anyhow::{bail, Result};
use log::{debug, info};
use serde::Serialize;

use crate::hierarchy::{HierarchyConfig, HierarchyStats, MemorySystem};
use crate::sim::config::SimConfig;
use crate::timeq::Cycle;
use crate::traffic::{TrafficConfig, TrafficDriver, TrafficStats};

/// Summary of one run, written out as JSON by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub num_cores: usize,
    pub seed: u64,
    pub cycles: Cycle,
    pub traffic: TrafficStats,
    pub average_latency: f64,
    pub hierarchy: HierarchyStats,
}

/// Synthetic traffic driven through the memory system one cycle at a time.
pub struct Sim {
    config: SimConfig,
    system: MemorySystem,
    driver: TrafficDriver,
}

impl Sim {
    pub fn new(config: SimConfig, hierarchy: HierarchyConfig, traffic: TrafficConfig) -> Result<Self> {
        traffic.validate()?;
        let system = MemorySystem::new(&hierarchy)?;
        let driver = TrafficDriver::new(&traffic, hierarchy.num_cores, config.seed);
        info!(
            "sim: {} cores, {} accesses per core, seed {}",
            hierarchy.num_cores, traffic.accesses_per_core, config.seed
        );
        Ok(Self {
            config,
            system,
            driver,
        })
    }

    pub fn system(&self) -> &MemorySystem {
        &self.system
    }

    /// Advance one cycle: offer new accesses, fire everything due, collect completions.
    pub fn tick_one(&mut self) {
        let now = self.system.now();
        self.driver.issue(&mut self.system);
        self.system.run_until(now);
        for completion in self.system.take_completions() {
            debug!(
                "core{}#{} {:?} 0x{:08x} done in {} cycles",
                completion.core,
                completion.id,
                completion.kind,
                completion.address,
                completion.latency()
            );
            self.driver.complete(&completion);
        }
    }

    pub fn finished(&self) -> bool {
        self.driver.is_done() && self.system.is_idle()
    }

    pub fn simulate(&mut self) -> Result<SimReport> {
        loop {
            self.tick_one();
            if self.finished() {
                break;
            }
            let now = self.system.now();
            if now >= self.config.timeout {
                self.system.dump_state();
                bail!("simulation timed out at cycle {}", now);
            }
            self.system.run_until(now + 1);
        }
        self.system.verify()?;

        let report = self.report();
        info!(
            "simulation finished at cycle {}: {} accesses, average latency {:.2}",
            report.cycles, report.traffic.completed, report.average_latency
        );
        Ok(report)
    }

    pub fn report(&self) -> SimReport {
        let traffic = *self.driver.stats();
        SimReport {
            num_cores: self.system.num_cores(),
            seed: self.config.seed,
            cycles: self.system.now(),
            traffic,
            average_latency: traffic.average_latency(),
            hierarchy: self.system.stats(),
        }
    }
}
