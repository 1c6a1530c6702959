use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::*;
use crate::cache::{AccessKind, MesiState, Tag};
use crate::hierarchy::{HierarchyConfig, MemorySystem, TransferRecord};
use crate::sim::config::SimConfig;
use crate::sim::top::Sim;
use crate::timeq::Cycle;
use crate::traffic::TrafficConfig;

const DEADLINE: Cycle = 200_000;
const LINE: u32 = 64;
const X: u64 = 0x1000;

/// Two-set, two-way L1s in front of a 64-line LLC, with every transfer traced.
fn config(num_cores: usize) -> HierarchyConfig {
    let mut config = HierarchyConfig::default();
    config.num_cores = num_cores;
    config.trace = true;
    config.l1.size = 256;
    config.l1.associativity = 2;
    config.llc.size = 4096;
    config.llc.associativity = 4;
    config.llc.hit_latency = 4;
    config.mem.latency = 20;
    config
}

fn system(num_cores: usize) -> MemorySystem {
    MemorySystem::new(&config(num_cores)).unwrap()
}

fn tag(system: &MemorySystem, address: u64) -> Tag {
    system.l1(0).cache().geometry().tag(address)
}

fn l1_state(system: &MemorySystem, core: usize, address: u64) -> MesiState {
    system
        .l1(core)
        .cache()
        .find_line(address)
        .map_or(MesiState::Invalid, |line| line.state())
}

fn llc_state(system: &MemorySystem, address: u64) -> MesiState {
    system
        .llc()
        .cache()
        .find_line(address)
        .map_or(MesiState::Invalid, |line| line.state())
}

/// Issue one access and run until the whole system has settled.
fn access(system: &mut MemorySystem, core: usize, kind: AccessKind, address: u64) -> AccessCompletion {
    let id = system.issue(core, kind, address).unwrap();
    system.run_until_idle(DEADLINE).unwrap();
    system
        .take_completions()
        .into_iter()
        .find(|completion| completion.id == id)
        .unwrap()
}

/// Issue each core's accesses in order, one in flight per core, offering a rejected access
/// again on the next cycle.
fn drive(system: &mut MemorySystem, streams: Vec<Vec<(AccessKind, u64)>>) -> Vec<AccessCompletion> {
    let mut streams: Vec<VecDeque<(AccessKind, u64)>> =
        streams.into_iter().map(VecDeque::from).collect();
    let mut outstanding = vec![false; streams.len()];
    let mut done = Vec::new();
    loop {
        let now = system.now();
        for (core, stream) in streams.iter_mut().enumerate() {
            if outstanding[core] {
                continue;
            }
            if let Some(&(kind, address)) = stream.front() {
                if system.issue(core, kind, address).is_ok() {
                    stream.pop_front();
                    outstanding[core] = true;
                }
            }
        }
        system.run_until(now);
        for completion in system.take_completions() {
            outstanding[completion.core] = false;
            done.push(completion);
        }
        if streams.iter().all(VecDeque::is_empty) && !outstanding.contains(&true) && system.is_idle() {
            return done;
        }
        assert!(now < DEADLINE, "still busy at cycle {}", now);
        system.run_until(now + 1);
    }
}

fn transfers<'a>(
    system: &'a MemorySystem,
    message: &'static str,
    is_reply: bool,
) -> impl Iterator<Item = &'a TransferRecord> + 'a {
    system
        .kernel()
        .l1_net()
        .trace()
        .iter()
        .chain(system.kernel().mem_net().trace())
        .filter(move |record| record.message == message && record.is_reply == is_reply)
}

#[test]
fn cold_load_fills_exclusive_from_memory() {
    let mut system = system(1);
    let completion = access(&mut system, 0, AccessKind::Load, X);

    assert_eq!(l1_state(&system, 0, X), MesiState::Exclusive);
    assert_eq!(llc_state(&system, X), MesiState::Exclusive);
    assert_eq!(system.llc().sharers(tag(&system, X)).as_slice(), &[0]);
    assert_eq!(system.memory().stats().reads(), 1);
    assert_eq!(system.llc().stats().downward_read_misses(), 1);
    assert_eq!(system.llc().stats().downward_read_hits(), 0);
    assert_eq!(system.l1(0).stats().misses(), 1);

    assert_eq!(transfers(&system, "DownwardRead", false).count(), 1);
    assert_eq!(transfers(&system, "MemRead", false).count(), 1);
    assert_eq!(transfers(&system, "UpwardRead", false).count(), 0);
    let reply = transfers(&system, "DownwardRead", true).next().unwrap();
    assert_eq!(reply.size_bytes, data_bytes(LINE));
    assert_eq!(completion.completed_at, system.now());
    assert!(completion.latency() > 20, "includes the memory round trip");
    system.verify().unwrap();
}

#[test]
fn second_reader_snoops_the_exclusive_owner() {
    let mut system = system(2);
    access(&mut system, 0, AccessKind::Load, X);
    access(&mut system, 1, AccessKind::Load, X);

    assert_eq!(l1_state(&system, 0, X), MesiState::Shared);
    assert_eq!(l1_state(&system, 1, X), MesiState::Shared);
    assert_eq!(system.llc().sharers(tag(&system, X)).as_slice(), &[0, 1]);
    assert_eq!(system.l1(0).stats().upward_reads(), 1);
    assert_eq!(system.memory().stats().reads(), 1, "served from the owner");

    let snoop = transfers(&system, "UpwardRead", false).next().unwrap();
    assert_eq!(snoop.to, DeviceId::L1(0));
    assert_eq!(snoop.size_bytes, CONTROL_BYTES);
    assert_eq!(llc_state(&system, X), MesiState::Exclusive, "clean snoop leaves the line clean");
    system.verify().unwrap();
}

#[test]
fn store_to_shared_line_waits_for_invalidation() {
    let mut system = system(2);
    access(&mut system, 0, AccessKind::Load, X);
    access(&mut system, 1, AccessKind::Load, X);
    let store = access(&mut system, 0, AccessKind::Store, X);

    assert_eq!(l1_state(&system, 0, X), MesiState::Modified);
    assert_eq!(l1_state(&system, 1, X), MesiState::Invalid);
    assert_eq!(system.llc().sharers(tag(&system, X)).as_slice(), &[0]);
    assert_eq!(system.l1(1).stats().upward_writes(), 1);

    let invalidated = transfers(&system, "UpwardWrite", true).next().unwrap();
    assert_eq!(invalidated.from, DeviceId::L1(1));
    assert_eq!(invalidated.size_bytes, CONTROL_BYTES, "shared copy is clean");
    let granted = transfers(&system, "DownwardWrite", true).next().unwrap();
    assert_eq!(granted.to, DeviceId::L1(0));
    assert!(invalidated.arrives_at <= granted.sent_at);
    assert!(store.completed_at >= granted.arrives_at);
    system.verify().unwrap();
}

#[test]
fn dirty_eviction_carries_data_and_marks_llc_modified() {
    let mut system = system(1);
    // 0x1000, 0x1080 and 0x1100 share set 0 of the two-way L1
    access(&mut system, 0, AccessKind::Store, X);
    assert_eq!(l1_state(&system, 0, X), MesiState::Modified);
    access(&mut system, 0, AccessKind::Load, X + 0x80);
    access(&mut system, 0, AccessKind::Load, X + 0x100);

    assert_eq!(l1_state(&system, 0, X), MesiState::Invalid);
    assert_eq!(llc_state(&system, X), MesiState::Modified);
    assert!(!system.llc().directories()[0].contains(tag(&system, X)));

    let evict = transfers(&system, "Evict", false).next().unwrap();
    assert_eq!(evict.size_bytes, data_bytes(LINE));
    let ack = transfers(&system, "Evict", true).next().unwrap();
    assert_eq!(ack.size_bytes, CONTROL_BYTES);
    assert_eq!(system.l1(0).stats().evictions(), 1);
    system.verify().unwrap();
}

#[test]
fn clean_eviction_is_control_only() {
    let mut system = system(1);
    access(&mut system, 0, AccessKind::Load, X);
    access(&mut system, 0, AccessKind::Load, X + 0x80);
    access(&mut system, 0, AccessKind::Load, X + 0x100);

    assert_eq!(l1_state(&system, 0, X), MesiState::Invalid);
    assert_eq!(llc_state(&system, X), MesiState::Exclusive);
    let evict = transfers(&system, "Evict", false).next().unwrap();
    assert_eq!(evict.size_bytes, CONTROL_BYTES);
    system.verify().unwrap();
}

#[test]
fn queued_access_locks_line_when_holder_unlocks() {
    let mut config = config(1);
    // a single line, so the second fill has to wait for the first
    config.l1.size = 64;
    config.l1.associativity = 1;
    let mut system = MemorySystem::new(&config).unwrap();
    let a = system.issue(0, AccessKind::Load, 0x2000).unwrap();
    let b = system.issue(0, AccessKind::Load, 0x3000).unwrap();
    let tag_b = tag(&system, 0x3000);

    system.run_until(3);
    let line = system.l1(0).cache().line(0, 0);
    assert_eq!(line.transient_tag(), Some(tag(&system, 0x2000)));
    assert_eq!(line.num_suspended(), 1);

    let mut cycle = system.now();
    let finished_a = loop {
        system.run_until(cycle);
        let completions = system.take_completions();
        if let Some(completion) = completions.iter().find(|c| c.id == a) {
            break completion.completed_at;
        }
        assert!(completions.is_empty());
        cycle += 1;
        assert!(cycle < DEADLINE);
    };
    assert_eq!(finished_a, cycle);
    let line = system.l1(0).cache().line(0, 0);
    assert_eq!(line.transient_tag(), Some(tag_b), "woken in the cycle it was unlocked");
    assert_eq!(line.num_suspended(), 0);

    system.run_until_idle(DEADLINE).unwrap();
    let completion = system.take_completions().into_iter().find(|c| c.id == b).unwrap();
    assert!(completion.completed_at > finished_a);
    assert_eq!(l1_state(&system, 0, 0x3000), MesiState::Exclusive);
    assert_eq!(l1_state(&system, 0, 0x2000), MesiState::Invalid);
    system.verify().unwrap();
}

#[test]
fn modified_owner_copies_back_on_read() {
    let mut system = system(2);
    access(&mut system, 0, AccessKind::Store, X);
    access(&mut system, 1, AccessKind::Load, X);

    assert_eq!(l1_state(&system, 0, X), MesiState::Shared);
    assert_eq!(l1_state(&system, 1, X), MesiState::Shared);
    assert_eq!(llc_state(&system, X), MesiState::Modified);
    let copyback = transfers(&system, "UpwardRead", true).next().unwrap();
    assert_eq!(copyback.size_bytes, data_bytes(LINE));
    system.verify().unwrap();
}

#[test]
fn invalidating_a_modified_copy_returns_its_data() {
    let mut system = system(2);
    access(&mut system, 0, AccessKind::Store, X);
    access(&mut system, 1, AccessKind::Store, X);

    assert_eq!(l1_state(&system, 0, X), MesiState::Invalid);
    assert_eq!(l1_state(&system, 1, X), MesiState::Modified);
    let reply = transfers(&system, "UpwardWrite", true).next().unwrap();
    assert_eq!(reply.from, DeviceId::L1(0));
    assert_eq!(reply.size_bytes, data_bytes(LINE));
    assert_eq!(system.memory().stats().reads(), 1);
    system.verify().unwrap();
}

#[test]
fn store_to_exclusive_line_stays_local() {
    let mut system = system(2);
    access(&mut system, 0, AccessKind::Load, X);
    let messages = system.kernel().l1_net().stats().messages();
    access(&mut system, 0, AccessKind::Store, X);

    assert_eq!(l1_state(&system, 0, X), MesiState::Modified);
    assert_eq!(system.kernel().l1_net().stats().messages(), messages);
    assert_eq!(system.l1(0).stats().hits(), 1);
}

#[test]
fn same_line_accesses_alias_and_stores_block() {
    let mut system = system(1);
    let first = system.issue(0, AccessKind::Load, X).unwrap();
    let second = system.issue(0, AccessKind::Ifetch, X + 8).unwrap();
    let reject = system.issue(0, AccessKind::Store, X).unwrap_err();
    assert_eq!(reject.reason, AccessRejectReason::StorePending);
    assert_eq!(reject.retry_at, system.now() + 1);
    assert_eq!(system.l1(0).pending_accesses().count(), 1);

    system.run_until_idle(DEADLINE).unwrap();
    let completions = system.take_completions();
    assert_eq!(completions.len(), 2);
    assert_eq!(completions[0].id, first);
    assert_eq!(completions[1].id, second);
    assert_eq!(completions[0].completed_at, completions[1].completed_at);
    assert_eq!(transfers(&system, "DownwardRead", false).count(), 1);
}

#[test]
fn ports_bound_in_flight_accesses() {
    let mut system = system(1);
    system.issue(0, AccessKind::Load, 0x0).unwrap();
    system.issue(0, AccessKind::Load, 0x40).unwrap();
    let reject = system.issue(0, AccessKind::Load, 0x80).unwrap_err();
    assert_eq!(reject.reason, AccessRejectReason::PortsBusy);
    system.issue(0, AccessKind::Store, 0xc0).unwrap();
    assert_eq!(
        system.issue(0, AccessKind::Store, 0x100).unwrap_err().reason,
        AccessRejectReason::PortsBusy
    );
    system.run_until_idle(DEADLINE).unwrap();
    assert_eq!(system.take_completions().len(), 3);
}

#[test]
fn racing_reads_fail_fast_and_retry() {
    let mut system = system(2);
    system.issue(0, AccessKind::Load, X).unwrap();
    system.issue(1, AccessKind::Load, X).unwrap();
    system.run_until_idle(DEADLINE).unwrap();
    assert_eq!(system.take_completions().len(), 2);

    let llc_failures = system.llc().stats().lock_failures();
    assert!(llc_failures >= 1);
    let l1_failures: u64 = system.l1s().iter().map(|l1| l1.stats().message_failures()).sum();
    assert_eq!(l1_failures, llc_failures, "every failure is answered with an error reply");
    assert!(transfers(&system, "DownwardRead", true).any(|record| record.size_bytes == CONTROL_BYTES));
    assert_eq!(l1_state(&system, 0, X), MesiState::Shared);
    assert_eq!(l1_state(&system, 1, X), MesiState::Shared);
    assert_eq!(system.memory().stats().reads(), 1);
    system.verify().unwrap();
}

#[test]
fn contended_stores_all_complete() {
    let mut system = system(4);
    let streams = (0..4)
        .map(|_| vec![(AccessKind::Store, X); 20])
        .collect();
    let completions = drive(&mut system, streams);
    assert_eq!(completions.len(), 80);

    let owners: Vec<usize> = (0..4)
        .filter(|&core| l1_state(&system, core, X) == MesiState::Modified)
        .collect();
    assert_eq!(owners.len(), 1);
    for core in (0..4).filter(|core| !owners.contains(core)) {
        assert_eq!(l1_state(&system, core, X), MesiState::Invalid);
    }
    assert_eq!(system.llc().sharers(tag(&system, X)).as_slice(), owners.as_slice());
    system.verify().unwrap();
}

#[test]
fn llc_writes_back_modified_victims() {
    let mut config = config(2);
    config.llc.size = 256;
    config.llc.associativity = 2;
    let mut system = MemorySystem::new(&config).unwrap();
    // every address lands in set 0 of both levels
    let streams = (0..2)
        .map(|core| {
            (0..16)
                .map(|i| (AccessKind::Store, 0x8000 * (core + 1) + 0x80 * i))
                .collect()
        })
        .collect();
    drive(&mut system, streams);

    assert!(system.memory().stats().writes() > 0);
    assert!(transfers(&system, "MemWrite", false).all(|record| record.size_bytes == data_bytes(LINE)));
    assert!(system.llc().stats().evictions() > 0);
    system.verify().unwrap();
}

#[test]
fn events_report_fills_and_service() {
    let mut system = system(2);
    let events = record_events(&mut system);

    access(&mut system, 0, AccessKind::Load, X);
    access(&mut system, 1, AccessKind::Load, X);

    let events = events.borrow();
    let fills: Vec<DeviceId> = events
        .iter()
        .filter_map(|event| match event {
            CoherenceEvent::FillLine { device, .. } => Some(*device),
            _ => None,
        })
        .collect();
    assert_eq!(fills, vec![DeviceId::L1(0), DeviceId::Llc, DeviceId::L1(1)]);

    let begins = events
        .iter()
        .filter(|event| matches!(event, CoherenceEvent::BeginCacheAccess { .. }))
        .count();
    // l1[0] load, llc read, l1[1] load, llc read, snoop in l1[0]
    assert_eq!(begins, 5);
    let snoop_service = events.iter().any(|event| {
        matches!(event, CoherenceEvent::ServiceNonblockingRequest { device: DeviceId::L1(0), access, .. } if access.core == 1)
    });
    assert!(!snoop_service, "snoops are not nonblocking requests");
}

fn record_events(system: &mut MemorySystem) -> Rc<RefCell<Vec<CoherenceEvent>>> {
    let events: Rc<RefCell<Vec<CoherenceEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    system.subscribe(Box::new(move |event| sink.borrow_mut().push(event.clone())));
    events
}

#[test]
fn load_to_a_line_being_evicted_reports_a_transient_hit() {
    let mut config = config(1);
    config.l1.size = 64;
    config.l1.associativity = 1;
    let mut system = MemorySystem::new(&config).unwrap();
    let events = record_events(&mut system);

    access(&mut system, 0, AccessKind::Load, 0x2000);
    // the fill of 0x3000 locks the only line while 0x2000 is still resident
    let fill = system.issue(0, AccessKind::Load, 0x3000).unwrap();
    let reload = system.issue(0, AccessKind::Load, 0x2000).unwrap();
    system.run_until_idle(DEADLINE).unwrap();
    let completions = system.take_completions();
    assert!(completions.iter().any(|c| c.id == fill));
    assert!(completions.iter().any(|c| c.id == reload));

    let hits: Vec<(DeviceId, AccessInfo, Tag)> = events
        .borrow()
        .iter()
        .filter_map(|event| match event {
            CoherenceEvent::NonblockingRequestHitToTransientTag { device, access, tag } => {
                Some((*device, *access, *tag))
            }
            _ => None,
        })
        .collect();
    assert_eq!(hits.len(), 1);
    let (device, info, hit_tag) = hits[0];
    assert_eq!(device, DeviceId::L1(0));
    assert_eq!(info.id, reload);
    assert_eq!(info.kind, AccessKind::Load);
    assert_eq!(hit_tag, tag(&system, 0x2000));

    assert_eq!(l1_state(&system, 0, 0x2000), MesiState::Exclusive);
    assert_eq!(l1_state(&system, 0, 0x3000), MesiState::Invalid);
    system.verify().unwrap();
}

#[test]
fn clean_eviction_missing_in_llc_takes_no_way() {
    let mut config = config(2);
    config.l1.size = 64;
    config.l1.associativity = 1;
    config.llc.size = 128;
    config.llc.associativity = 2;
    let mut system = MemorySystem::new(&config).unwrap();
    let events = record_events(&mut system);

    access(&mut system, 0, AccessKind::Load, 0x2000);
    access(&mut system, 1, AccessKind::Load, 0x3000);
    access(&mut system, 1, AccessKind::Load, 0x4000);
    // the llc dropped 0x2000 while core 0 kept it
    assert_eq!(llc_state(&system, 0x2000), MesiState::Invalid);
    assert_eq!(l1_state(&system, 0, 0x2000), MesiState::Exclusive);

    access(&mut system, 0, AccessKind::Load, 0x5000);
    let llc_fills: Vec<Tag> = events
        .borrow()
        .iter()
        .filter_map(|event| match event {
            CoherenceEvent::FillLine {
                device: DeviceId::Llc,
                tag,
                ..
            } => Some(*tag),
            _ => None,
        })
        .collect();
    let expected: Vec<Tag> = [0x2000, 0x3000, 0x4000, 0x5000]
        .iter()
        .map(|&address| tag(&system, address))
        .collect();
    assert_eq!(llc_fills, expected);

    let llc = system.llc().stats();
    assert_eq!(llc.downward_write_bypasses(), 1);
    assert_eq!(llc.evictions(), 2);
    assert_eq!(llc_state(&system, 0x2000), MesiState::Invalid);
    assert_eq!(llc_state(&system, 0x4000), MesiState::Exclusive);
    assert_eq!(llc_state(&system, 0x5000), MesiState::Exclusive);
    assert_eq!(system.memory().stats().writes(), 0);
    system.verify().unwrap();
}

#[test]
fn random_traffic_is_coherent_and_reproducible() {
    let run = || {
        let mut hierarchy = config(4);
        hierarchy.seed = 21;
        let mut traffic = TrafficConfig::default();
        traffic.accesses_per_core = 300;
        traffic.address.footprint_bytes = 2048;
        traffic.address.shared_fraction = 0.7;
        traffic.mix.store_ratio = 0.4;
        let sim_config = SimConfig {
            num_cores: 4,
            seed: 21,
            timeout: DEADLINE,
            ..SimConfig::default()
        };
        let mut sim = Sim::new(sim_config, hierarchy, traffic).unwrap();
        let report = sim.simulate().unwrap();
        sim.system().verify().unwrap();
        report
    };

    let first = run();
    assert_eq!(first.traffic.completed, 4 * 300);
    assert!(first.hierarchy.l1_total.upward_writes() > 0);
    let second = run();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
