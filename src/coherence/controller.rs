use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::{
    AccessInfo, CacheConfig, CacheStats, CoherenceError, CoherenceEvent, DeviceId, FindAndLock,
    FindAndLockStatus, Message, MessageId, MessageKind, Process, ProcessId, Step,
};
use crate::cache::{AccessKind, CacheAccess, LockableCache, MesiState, Tag};
use crate::hierarchy::{Delivery, Event, Kernel};
use crate::timeq::Cycle;

/// What distinguishes one level of the hierarchy from another: the transactions it runs and
/// how it gets rid of a victim.  Everything else lives in `CoherenceController`.
pub trait CacheRole {
    type Task: fmt::Debug;
    type Step: fmt::Debug;

    /// Whether the replacement policy may steer an access around the array.
    const CAN_BYPASS: bool;

    /// Whether a miss on behalf of `task` takes a way.  A task that does not allocate goes
    /// around the array instead.
    fn allocates_on_miss(_task: &Self::Task) -> bool {
        true
    }

    /// Steps that make room in the locked line before the owning process continues.
    fn evict_steps(&mut self, core: &mut ControllerCore, lock: &FindAndLock) -> Vec<Step<Self::Step>>;

    /// Execute one step.  Returned steps run next, in order.
    fn run(
        &mut self,
        core: &mut ControllerCore,
        kernel: &mut Kernel,
        process: &mut Process<Self::Task, Self::Step>,
        step: Self::Step,
    ) -> Result<Vec<Step<Self::Step>>, CoherenceError>;

    /// Called once the process has released its line.
    fn complete(
        &mut self,
        core: &mut ControllerCore,
        kernel: &mut Kernel,
        task: Self::Task,
        result: Result<(), CoherenceError>,
    );
}

/// State every coherent cache carries regardless of its level.
#[derive(Debug)]
pub struct ControllerCore {
    device: DeviceId,
    name: String,
    cache: LockableCache<ProcessId>,
    hit_latency: Cycle,
    rng: StdRng,
    next_process_id: ProcessId,
    next_message_id: MessageId,
    replies: HashMap<MessageId, Message>,
    stats: CacheStats,
}

impl ControllerCore {
    pub fn new(device: DeviceId, name: &str, config: &CacheConfig, seed: u64) -> Self {
        let geometry = config.geometry();
        let policy = config.replacement.build(
            geometry.num_sets(),
            geometry.associativity(),
            seed ^ 0x5eed,
        );
        Self {
            device,
            name: name.to_string(),
            cache: LockableCache::new(name, geometry, policy),
            hit_latency: config.hit_latency,
            rng: StdRng::seed_from_u64(seed),
            next_process_id: 0,
            next_message_id: 0,
            replies: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &LockableCache<ProcessId> {
        &self.cache
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn line_size(&self) -> u32 {
        self.cache.line_size()
    }

    pub fn hit_latency(&self) -> Cycle {
        self.hit_latency
    }

    /// Backoff before a failed transaction is attempted again.
    pub fn retry_latency(&mut self) -> Cycle {
        self.hit_latency + self.rng.gen_range(0..self.hit_latency + 2)
    }

    pub fn send_request(
        &mut self,
        kernel: &mut Kernel,
        to: DeviceId,
        access: AccessInfo,
        tag: Tag,
        kind: MessageKind,
        size_bytes: u32,
    ) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id += 1;
        let message = Message::new(id, self.device, access, tag, kind);
        kernel.transfer(self.device, to, Delivery::Request(message), size_bytes);
        id
    }

    pub fn send_reply(&mut self, kernel: &mut Kernel, message: Message, size_bytes: u32) {
        let to = message.sender;
        kernel.transfer(self.device, to, Delivery::Reply(message), size_bytes);
    }

    /// State of the locked line as seen by `lock.tag`: INVALID until a fill has installed it.
    pub fn state(&self, lock: &FindAndLock) -> MesiState {
        let Some((set, way)) = lock.line() else {
            panic!("{}: {:?} 0x{:08x} does not hold a line", self.name, lock.kind, lock.tag);
        };
        let line = self.cache.line(set, way);
        if line.tag() == Some(lock.tag) {
            line.state()
        } else {
            MesiState::Invalid
        }
    }

    /// State of whatever currently occupies the locked line, ignoring the pending fill.
    pub fn resident_state(&self, lock: &FindAndLock) -> MesiState {
        match lock.line() {
            Some((set, way)) => self.cache.line(set, way).state(),
            None => panic!("{}: {:?} 0x{:08x} does not hold a line", self.name, lock.kind, lock.tag),
        }
    }

    /// Move the locked line to `state`.  A line being filled takes its new tag with the first
    /// state it is given.  Bypassed accesses have nothing to update.
    pub fn set_state(&mut self, lock: &FindAndLock, state: MesiState) {
        let Some((set, way)) = lock.line() else {
            assert!(lock.is_bypass(), "{}: setting state without a line", self.name);
            return;
        };
        let access = lock.cache_access();
        let line = self.cache.line_mut(set, way);
        if !access.hit && line.tag() != Some(access.tag) {
            assert!(
                !line.state().is_valid(),
                "{}: filling 0x{:08x} over valid line {:?}",
                self.name,
                access.tag,
                line.tag()
            );
            line.set_tag(access.tag);
        }
        trace!(
            "{}: [{}:{}] 0x{:08x} {} -> {}",
            self.name,
            set,
            way,
            access.tag,
            line.state(),
            state
        );
        line.set_state(state);
    }

    /// Invalidate the victim occupying the locked line.
    pub fn invalidate_resident(&mut self, lock: &FindAndLock) {
        let Some((set, way)) = lock.line() else {
            panic!("{}: invalidating without a line", self.name);
        };
        self.cache.line_mut(set, way).invalidate();
    }

    fn take_replies(&mut self, messages: &[MessageId]) -> Option<Vec<Message>> {
        if !messages.iter().all(|id| self.replies.contains_key(id)) {
            return None;
        }
        Some(
            messages
                .iter()
                .filter_map(|id| self.replies.remove(id))
                .collect(),
        )
    }

    fn find_and_lock(
        &mut self,
        process: ProcessId,
        lock: &mut FindAndLock,
        can_bypass: bool,
        kernel: &mut Kernel,
    ) {
        assert_eq!(lock.status, FindAndLockStatus::Idle);
        let mut access = self.cache.new_access(lock.kind, lock.tag);
        if !access.hit && !lock.allocate_on_miss {
            access = CacheAccess {
                way: None,
                eviction: false,
                victim_tag: None,
                ..access
            };
        }
        lock.cache_access = Some(access);
        assert!(
            access.hit || !lock.kind.is_upward(),
            "{}: {:?} for 0x{:08x} missed",
            self.name,
            lock.kind,
            lock.tag
        );

        let Some(way) = access.way else {
            assert!(
                can_bypass || !lock.allocate_on_miss,
                "{}: replacement policy bypassed {}",
                self.name,
                access
            );
            lock.status = FindAndLockStatus::Bypassed;
            self.begin_cache_access(lock, kernel);
            return;
        };

        let line = self.cache.line_mut(access.set, way);
        if line.is_locked() {
            if lock.kind.is_downward() {
                debug!("{}: {} failed, line locked by 0x{:08x}", self.name, access, line.transient_tag().unwrap_or_default());
                lock.status = FindAndLockStatus::Failed;
                return;
            }
            if !lock.kind.is_upward() && access.hit {
                kernel.dispatch(&CoherenceEvent::NonblockingRequestHitToTransientTag {
                    device: self.device,
                    access: lock.access,
                    tag: lock.tag,
                });
            }
        }

        if !line.lock(process, access.tag) {
            trace!("{}: process {} waits on [{}:{}]", self.name, process, access.set, way);
            lock.status = FindAndLockStatus::Waiting;
            return;
        }

        lock.status = if access.eviction {
            FindAndLockStatus::Evicting
        } else {
            FindAndLockStatus::Acquired
        };
        if !lock.kind.is_upward() {
            kernel.dispatch(&CoherenceEvent::ServiceNonblockingRequest {
                device: self.device,
                access: lock.access,
                hit: access.hit,
            });
            if !access.hit {
                kernel.dispatch(&CoherenceEvent::FillLine {
                    device: self.device,
                    tag: access.tag,
                    access: lock.access,
                    set: access.set,
                    way,
                });
            }
        }
        self.begin_cache_access(lock, kernel);
    }

    fn begin_cache_access(&mut self, lock: &FindAndLock, kernel: &mut Kernel) {
        let access = *lock.cache_access();
        self.stats.record_access(lock.kind, &access);
        trace!("{}: {}", self.name, access);
        kernel.dispatch(&CoherenceEvent::BeginCacheAccess {
            device: self.device,
            access: lock.access,
            cache_access: access,
        });
    }

    /// Commit (on success) and unlock.  Everyone queued on the line is woken this cycle.
    fn release(&mut self, lock: &mut FindAndLock, commit: bool, kernel: &mut Kernel) {
        match (lock.status, lock.line()) {
            (FindAndLockStatus::Acquired, Some((set, way))) | (FindAndLockStatus::Evicting, Some((set, way))) => {
                if commit && lock.status == FindAndLockStatus::Acquired {
                    self.cache.commit(lock.cache_access());
                }
                for waiter in self.cache.line_mut(set, way).unlock() {
                    kernel.schedule(
                        Event::Wake {
                            device: self.device,
                            process: waiter,
                        },
                        0,
                    );
                }
            }
            (FindAndLockStatus::Bypassed, _) if commit => self.cache.commit(lock.cache_access()),
            (FindAndLockStatus::Waiting, _) => {
                panic!("{}: releasing {:?} 0x{:08x} while queued", self.name, lock.kind, lock.tag)
            }
            _ => {}
        }
        lock.status = FindAndLockStatus::Released;
    }
}

/// A cache controller: a pool of processes advanced one step per pass, one pass per cycle
/// while any are pending.
#[derive(Debug)]
pub struct CoherenceController<R: CacheRole> {
    core: ControllerCore,
    role: R,
    processes: Vec<Process<R::Task, R::Step>>,
    ticks: BTreeSet<Cycle>,
    last_pass: Option<Cycle>,
}

impl<R: CacheRole> CoherenceController<R> {
    pub fn new(core: ControllerCore, role: R) -> Self {
        Self {
            core,
            role,
            processes: Vec::new(),
            ticks: BTreeSet::new(),
            last_pass: None,
        }
    }

    pub fn core(&self) -> &ControllerCore {
        &self.core
    }

    pub fn role(&self) -> &R {
        &self.role
    }

    pub fn role_mut(&mut self) -> &mut R {
        &mut self.role
    }

    pub fn device(&self) -> DeviceId {
        self.core.device
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn cache(&self) -> &LockableCache<ProcessId> {
        &self.core.cache
    }

    pub fn stats(&self) -> &CacheStats {
        &self.core.stats
    }

    pub fn num_pending(&self) -> usize {
        self.processes.len()
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process<R::Task, R::Step>> {
        self.processes.iter()
    }

    /// Start a transaction on `tag`.  It takes its first step in the next pass.
    pub fn schedule_process(
        &mut self,
        kernel: &mut Kernel,
        task: R::Task,
        kind: AccessKind,
        access: AccessInfo,
        tag: Tag,
        body: Vec<R::Step>,
    ) -> ProcessId {
        let id = self.core.next_process_id;
        self.core.next_process_id += 1;
        let mut lock = FindAndLock::new(kind, tag, access);
        lock.allocate_on_miss = R::allocates_on_miss(&task);
        let process = Process::new(id, task, lock, body);
        trace!("{}: schedule {}", self.core.name, process);
        self.processes.push(process);
        let now = kernel.now();
        self.request_tick(kernel, now);
        id
    }

    pub fn receive_reply(&mut self, message: Message, kernel: &mut Kernel) {
        trace!("{}: reply {}", self.core.name, message);
        let previous = self.core.replies.insert(message.id, message);
        assert!(previous.is_none(), "{}: duplicate reply", self.core.name);
        let now = kernel.now();
        self.request_tick(kernel, now);
    }

    /// A line this process was queued on has been unlocked: look it up again right away.
    pub fn on_wake(&mut self, process: ProcessId, kernel: &mut Kernel) {
        let Some(process) = self.processes.iter_mut().find(|p| p.id == process) else {
            panic!("{}: woke unknown process {}", self.core.name, process);
        };
        assert_eq!(
            process.lock.status,
            FindAndLockStatus::Waiting,
            "{}: woke process {} that was not waiting",
            self.core.name,
            process.id
        );
        process.lock.status = FindAndLockStatus::Idle;
        self.core
            .find_and_lock(process.id, &mut process.lock, R::CAN_BYPASS, kernel);
        let now = kernel.now();
        self.request_tick(kernel, now);
    }

    pub fn on_tick(&mut self, kernel: &mut Kernel) {
        let now = kernel.now();
        self.ticks.remove(&now);
        if self.last_pass == Some(now) {
            return;
        }
        self.last_pass = Some(now);
        self.pass(kernel);
        if !self.processes.is_empty() {
            self.request_tick(kernel, now + 1);
        }
    }

    fn request_tick(&mut self, kernel: &mut Kernel, at: Cycle) {
        let at = match self.last_pass {
            Some(last) if at <= last => last + 1,
            _ => at,
        };
        if self.ticks.insert(at) {
            kernel.schedule_at(Event::Tick(self.core.device), at);
        }
    }

    fn pass(&mut self, kernel: &mut Kernel) {
        let mut idx = 0;
        while idx < self.processes.len() {
            let result = Self::advance(&mut self.core, &mut self.role, &mut self.processes[idx], kernel);
            match result {
                Ok(()) if !self.processes[idx].is_done() => idx += 1,
                result => {
                    let process = self.processes.remove(idx);
                    self.finish(process, result, kernel);
                }
            }
        }
    }

    fn advance(
        core: &mut ControllerCore,
        role: &mut R,
        process: &mut Process<R::Task, R::Step>,
        kernel: &mut Kernel,
    ) -> Result<(), CoherenceError> {
        let Some(step) = process.pop() else {
            return Ok(());
        };
        match step {
            Step::FindAndLock => {
                if process.lock.status == FindAndLockStatus::Idle {
                    core.find_and_lock(process.id, &mut process.lock, R::CAN_BYPASS, kernel);
                }
                match process.lock.status {
                    FindAndLockStatus::Acquired | FindAndLockStatus::Bypassed => {}
                    FindAndLockStatus::Waiting => process.push(Step::FindAndLock),
                    FindAndLockStatus::Failed => return Err(CoherenceError::LockFailed),
                    FindAndLockStatus::Evicting => {
                        process.push(Step::FinishEviction);
                        let steps = role.evict_steps(core, &process.lock);
                        process.push_steps(steps);
                    }
                    status => panic!("{}: process {} in {:?} cannot look up", core.name, process.id, status),
                }
            }
            Step::FinishEviction => {
                assert_eq!(process.lock.status, FindAndLockStatus::Evicting);
                process.lock.status = FindAndLockStatus::Acquired;
            }
            Step::Await { messages, then } => match core.take_replies(&messages) {
                Some(replies) => {
                    let failed = replies.iter().any(|reply| reply.has_error);
                    process.set_replies(replies);
                    if failed {
                        return Err(CoherenceError::MessageFailed);
                    }
                    if let Some(then) = then {
                        process.push(Step::Run(then));
                    }
                }
                None => process.push(Step::Await { messages, then }),
            },
            Step::Run(step) => {
                let steps = role.run(core, kernel, process, step)?;
                process.push_steps(steps);
            }
        }
        Ok(())
    }

    fn finish(
        &mut self,
        mut process: Process<R::Task, R::Step>,
        result: Result<(), CoherenceError>,
        kernel: &mut Kernel,
    ) {
        self.core.release(&mut process.lock, result.is_ok(), kernel);
        match result {
            Ok(()) => trace!("{}: process {} done", self.core.name, process.id),
            Err(error) => {
                debug!("{}: process {} {:?} aborted: {}", self.core.name, process.id, process.task, error);
                self.core.stats.record_failure(error);
            }
        }
        self.role.complete(&mut self.core, kernel, process.task, result);
    }

    /// Log every pending process; used when a run stops making progress.
    pub fn dump_state(&self) {
        info!("{}: {} pending processes", self.core.name, self.processes.len());
        for process in &self.processes {
            info!("{}:   {}", self.core.name, process);
        }
    }
}
