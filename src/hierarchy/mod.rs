pub mod kernel;
pub mod memory;
pub mod net;

use anyhow::{bail, ensure, Result};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;

pub use kernel::{Delivery, Event, Kernel};
pub use memory::{MainMemory, MemConfig, MemoryStats};
pub use net::{Net, NetConfig, NetStats, TransferRecord};

use crate::cache::{AccessKind, MesiState, Tag};
use crate::coherence::{
    AccessCompletion, AccessId, AccessInfo, AccessReject, CacheStats, CompletionCallback,
    ControllerCore, DeviceId, EventListener, FirstLevel, FirstLevelCache, FirstLevelCacheConfig,
    LastLevel, LastLevelCache, LastLevelCacheConfig,
};
use crate::timeq::Cycle;

/// Everything needed to build a `MemorySystem`.
#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    pub num_cores: usize,
    pub seed: u64,
    pub trace: bool,
    pub l1: FirstLevelCacheConfig,
    pub llc: LastLevelCacheConfig,
    pub net: NetConfig,
    pub mem: MemConfig,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            num_cores: 2,
            seed: 13,
            trace: false,
            l1: FirstLevelCacheConfig::default(),
            llc: LastLevelCacheConfig::default(),
            net: NetConfig::default(),
            mem: MemConfig::default(),
        }
    }
}

impl HierarchyConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_cores > 0, "num_cores must be non-zero");
        self.l1.validate()?;
        self.llc.validate()?;
        if self.l1.line_size != self.llc.line_size {
            bail!(
                "l1 line_size {} differs from llc line_size {}",
                self.l1.line_size,
                self.llc.line_size
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyStats {
    pub cycles: Cycle,
    pub l1: Vec<CacheStats>,
    pub l1_total: CacheStats,
    pub llc: CacheStats,
    pub l1_net: NetStats,
    pub mem_net: NetStats,
    pub memory: MemoryStats,
}

/// Per-core first-level caches, the shared last-level cache and main memory, driven by one
/// event queue.
#[derive(Debug)]
pub struct MemorySystem {
    kernel: Kernel,
    l1s: Vec<FirstLevelCache>,
    llc: LastLevelCache,
    memory: MainMemory,
    next_access_id: AccessId,
}

impl MemorySystem {
    pub fn new(config: &HierarchyConfig) -> Result<Self> {
        config.validate()?;
        let l1_cache = config.l1.cache();
        let llc_cache = config.llc.cache();

        let l1s: Vec<FirstLevelCache> = (0..config.num_cores)
            .map(|core| {
                let name = format!("l1[{}]", core);
                let seed = config.seed.wrapping_add(core as u64 + 1);
                FirstLevelCache::new(
                    ControllerCore::new(DeviceId::L1(core), &name, &l1_cache, seed),
                    FirstLevel::new(core, &config.l1),
                )
            })
            .collect();
        let llc = LastLevelCache::new(
            ControllerCore::new(DeviceId::Llc, "llc", &llc_cache, config.seed),
            LastLevel::new(l1s.iter().map(|l1| *l1.cache().geometry())),
        );
        info!(
            "memory system: {} cores, l1 {}B/{}-way, llc {}B/{}-way, {}B lines",
            config.num_cores,
            l1_cache.size,
            l1_cache.associativity,
            llc_cache.size,
            llc_cache.associativity,
            l1_cache.line_size
        );

        Ok(Self {
            kernel: Kernel::new(&config.net, config.trace),
            l1s,
            llc,
            memory: MainMemory::new(&config.mem, llc_cache.line_size),
            next_access_id: 0,
        })
    }

    pub fn now(&self) -> Cycle {
        self.kernel.now()
    }

    pub fn num_cores(&self) -> usize {
        self.l1s.len()
    }

    pub fn l1(&self, core: usize) -> &FirstLevelCache {
        &self.l1s[core]
    }

    pub fn l1s(&self) -> &[FirstLevelCache] {
        &self.l1s
    }

    pub fn llc(&self) -> &LastLevelCache {
        &self.llc
    }

    pub fn memory(&self) -> &MainMemory {
        &self.memory
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn subscribe(&mut self, listener: EventListener) {
        self.kernel.add_listener(listener);
    }

    fn tag(&self, core: usize, address: u64) -> Tag {
        self.l1s[core].cache().geometry().tag(address)
    }

    pub fn can_access(&self, core: usize, kind: AccessKind, address: u64) -> Result<(), AccessReject> {
        let tag = self.tag(core, address);
        self.l1s[core]
            .can_access(kind, tag)
            .map_err(|reason| AccessReject {
                retry_at: self.now() + 1,
                reason,
            })
    }

    pub fn issue(&mut self, core: usize, kind: AccessKind, address: u64) -> Result<AccessId, AccessReject> {
        self.issue_with(core, kind, address, None)
    }

    /// Admit a core access at the current cycle.  `on_completed` runs when it completes.
    pub fn issue_with(
        &mut self,
        core: usize,
        kind: AccessKind,
        address: u64,
        on_completed: Option<CompletionCallback>,
    ) -> Result<AccessId, AccessReject> {
        assert!(kind.is_core(), "{:?} is not a core access", kind);
        self.can_access(core, kind, address)?;

        let id = self.next_access_id;
        self.next_access_id += 1;
        let access = AccessInfo {
            id,
            core,
            kind,
            address,
            tag: self.tag(core, address),
            issued_at: self.now(),
        };
        debug!("issue {}", access);

        let l1 = &mut self.l1s[core];
        if l1.begin_access(access, on_completed) {
            match kind {
                AccessKind::Ifetch => l1.receive_ifetch(access, &mut self.kernel),
                AccessKind::Load => l1.receive_load(access, &mut self.kernel),
                _ => l1.receive_store(access, &mut self.kernel),
            }
        }
        Ok(id)
    }

    /// Fire every event scheduled at or before `cycle`, then move the clock to `cycle`.
    pub fn run_until(&mut self, cycle: Cycle) {
        while self.kernel.peek_cycle().map_or(false, |at| at <= cycle) {
            self.handle_next();
        }
        self.kernel.advance_to(cycle);
    }

    /// Run until nothing is left to do.  Gives up, dumping every pending process, once the
    /// clock passes `deadline`.
    pub fn run_until_idle(&mut self, deadline: Cycle) -> Result<Cycle> {
        while self.kernel.has_pending_events() {
            if self.kernel.peek_cycle().map_or(false, |at| at > deadline) {
                self.dump_state();
                bail!("memory system still busy at cycle {}", deadline);
            }
            self.handle_next();
        }
        Ok(self.now())
    }

    pub fn is_idle(&self) -> bool {
        !self.kernel.has_pending_events()
            && self.llc.num_pending() == 0
            && self.l1s.iter().all(|l1| l1.num_pending() == 0)
    }

    pub fn take_completions(&mut self) -> Vec<AccessCompletion> {
        let mut completions: Vec<AccessCompletion> = self
            .l1s
            .iter_mut()
            .flat_map(|l1| l1.take_completions())
            .collect();
        completions.sort_by_key(|completion| (completion.completed_at, completion.core, completion.id));
        completions
    }

    fn handle_next(&mut self) -> bool {
        let Some((_, event)) = self.kernel.pop() else {
            return false;
        };
        self.dispatch(event);
        true
    }

    fn dispatch(&mut self, event: Event) {
        let kernel = &mut self.kernel;
        match event {
            Event::Tick(DeviceId::L1(core)) => self.l1s[core].on_tick(kernel),
            Event::Tick(DeviceId::Llc) => self.llc.on_tick(kernel),
            Event::Wake {
                device: DeviceId::L1(core),
                process,
            } => self.l1s[core].on_wake(process, kernel),
            Event::Wake {
                device: DeviceId::Llc,
                process,
            } => self.llc.on_wake(process, kernel),
            Event::Deliver { to, delivery, .. } => match (to, delivery) {
                (DeviceId::L1(core), Delivery::Request(message)) => {
                    self.l1s[core].receive_request(message, kernel)
                }
                (DeviceId::L1(core), Delivery::Reply(message)) => {
                    self.l1s[core].receive_reply(message, kernel)
                }
                (DeviceId::Llc, Delivery::Request(message)) => self.llc.receive_request(message, kernel),
                (DeviceId::Llc, Delivery::Reply(message)) => self.llc.receive_reply(message, kernel),
                (DeviceId::Memory, Delivery::Request(message)) => {
                    self.memory.receive_request(message, kernel)
                }
                (DeviceId::Memory, Delivery::Reply(message)) => {
                    panic!("main memory received reply {}", message)
                }
            },
            Event::Retry { core, access } => self.l1s[core].retry(access, kernel),
            event => panic!("main memory has no controller for {:?}", event),
        }
    }

    /// Check the directories against the first-level caches and the single-writer rule.
    /// Only meaningful once the system is idle.
    pub fn verify(&self) -> Result<()> {
        ensure!(self.is_idle(), "cannot verify a busy memory system");

        let mut holders: BTreeMap<Tag, Vec<(usize, MesiState)>> = BTreeMap::new();
        for (core, l1) in self.l1s.iter().enumerate() {
            let directory = &self.llc.directories()[core];
            for line in l1.cache().lines() {
                let Some(tag) = line.tag().filter(|_| line.state().is_valid()) else {
                    continue;
                };
                if !directory.contains(tag) {
                    bail!("{} holds 0x{:08x} ({}) unknown to the directory", l1.name(), tag, line.state());
                }
                holders.entry(tag).or_default().push((core, line.state()));
            }
            for tag in directory.tags() {
                if l1.cache().find_line(tag).is_none() {
                    bail!("directory lists 0x{:08x} for {} which does not hold it", tag, l1.name());
                }
            }
        }

        for (tag, copies) in &holders {
            let exclusive = copies
                .iter()
                .filter(|(_, state)| matches!(state, MesiState::Exclusive | MesiState::Modified))
                .count();
            if exclusive > 0 && copies.len() > 1 {
                bail!("0x{:08x} has an exclusive copy alongside others: {:?}", tag, copies);
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> HierarchyStats {
        let l1: Vec<CacheStats> = self.l1s.iter().map(|l1| *l1.stats()).collect();
        let mut l1_total = CacheStats::default();
        for stats in &l1 {
            l1_total += stats;
        }
        HierarchyStats {
            cycles: self.now(),
            l1,
            l1_total,
            llc: *self.llc.stats(),
            l1_net: *self.kernel.l1_net().stats(),
            mem_net: *self.kernel.mem_net().stats(),
            memory: *self.memory.stats(),
        }
    }

    pub fn dump_state(&self) {
        info!("cycle {}: memory system state", self.now());
        for l1 in &self.l1s {
            l1.dump_state();
        }
        self.llc.dump_state();
    }
}
