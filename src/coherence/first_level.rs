use log::{debug, trace};

use super::{
    data_bytes, AccessCompletion, AccessInfo, AccessRejectReason, CacheRole, CoherenceController,
    CoherenceError, CompletionCallback, ControllerCore, DeviceId, FindAndLock,
    FirstLevelCacheConfig, MemoryAccess, Message, MessageKind, Process, Step, CONTROL_BYTES,
};
use crate::cache::{AccessKind, MesiState, Tag};
use crate::hierarchy::{Event, Kernel};

#[derive(Debug, Clone)]
pub enum L1Task {
    Core(AccessInfo),
    UpwardRead(Message),
    UpwardWrite(Message),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1Step {
    Fill,
    FillDone,
    ObtainOwnership,
    OwnershipGranted,
    Modify,
    SendEvict,
    InvalidateVictim,
    ServeUpwardRead,
    ServeUpwardWrite,
}

/// Per-core cache role: admission of core accesses and their transactions, and the snoops
/// the directory sends up.
#[derive(Debug)]
pub struct FirstLevel {
    core_id: usize,
    read_ports: usize,
    write_ports: usize,
    pending: Vec<MemoryAccess>,
    completions: Vec<AccessCompletion>,
}

pub type FirstLevelCache = CoherenceController<FirstLevel>;

impl FirstLevel {
    pub fn new(core_id: usize, config: &FirstLevelCacheConfig) -> Self {
        Self {
            core_id,
            read_ports: config.read_ports,
            write_ports: config.write_ports,
            pending: Vec::new(),
            completions: Vec::new(),
        }
    }

    pub fn core_id(&self) -> usize {
        self.core_id
    }

    fn find_access(&self, tag: Tag) -> Option<&MemoryAccess> {
        self.pending.iter().find(|access| access.info.tag == tag)
    }

    fn num_pending(&self, kind: AccessKind) -> usize {
        self.pending
            .iter()
            .filter(|access| access.info.kind == kind)
            .count()
    }

    fn ports(&self, kind: AccessKind) -> usize {
        match kind {
            AccessKind::Store => self.write_ports,
            _ => self.read_ports,
        }
    }
}

impl CacheRole for FirstLevel {
    type Task = L1Task;
    type Step = L1Step;

    const CAN_BYPASS: bool = false;

    fn evict_steps(&mut self, _core: &mut ControllerCore, _lock: &FindAndLock) -> Vec<Step<L1Step>> {
        vec![Step::Run(L1Step::SendEvict)]
    }

    fn run(
        &mut self,
        core: &mut ControllerCore,
        kernel: &mut Kernel,
        process: &mut Process<L1Task, L1Step>,
        step: L1Step,
    ) -> Result<Vec<Step<L1Step>>, CoherenceError> {
        let lock = &process.lock;
        let steps = match step {
            L1Step::Fill => {
                if lock.is_hit() {
                    vec![]
                } else {
                    let message = core.send_request(
                        kernel,
                        DeviceId::Llc,
                        lock.access,
                        lock.tag,
                        MessageKind::DownwardRead { shared: false },
                        CONTROL_BYTES,
                    );
                    vec![Step::await_reply(message, L1Step::FillDone)]
                }
            }
            L1Step::FillDone => {
                let shared = match process.reply().kind {
                    MessageKind::DownwardRead { shared } => shared,
                    other => panic!("{}: unexpected reply {:?} to DownwardRead", core.name(), other),
                };
                let state = if shared {
                    MesiState::Shared
                } else {
                    MesiState::Exclusive
                };
                core.set_state(lock, state);
                vec![]
            }
            L1Step::ObtainOwnership => match core.state(lock) {
                MesiState::Shared | MesiState::Invalid => {
                    let message = core.send_request(
                        kernel,
                        DeviceId::Llc,
                        lock.access,
                        lock.tag,
                        MessageKind::DownwardWrite,
                        CONTROL_BYTES,
                    );
                    vec![Step::await_reply(message, L1Step::OwnershipGranted)]
                }
                MesiState::Exclusive | MesiState::Modified => vec![],
            },
            L1Step::OwnershipGranted => {
                if core.state(lock) == MesiState::Invalid {
                    core.set_state(lock, MesiState::Exclusive);
                }
                vec![]
            }
            L1Step::Modify => {
                core.set_state(lock, MesiState::Modified);
                vec![]
            }
            L1Step::SendEvict => {
                let access = lock.cache_access();
                let (victim_tag, state) = match access.victim_tag {
                    Some(tag) => (tag, core.resident_state(lock)),
                    None => panic!("{}: evicting without a victim: {}", core.name(), access),
                };
                assert!(
                    state.is_valid(),
                    "{}: evicting INVALID line 0x{:08x}",
                    core.name(),
                    victim_tag
                );
                let dirty = state == MesiState::Modified;
                let size = if dirty {
                    data_bytes(core.line_size())
                } else {
                    CONTROL_BYTES
                };
                let message = core.send_request(
                    kernel,
                    DeviceId::Llc,
                    lock.access,
                    victim_tag,
                    MessageKind::Evict { dirty },
                    size,
                );
                vec![Step::await_reply(message, L1Step::InvalidateVictim)]
            }
            L1Step::InvalidateVictim => {
                core.invalidate_resident(lock);
                vec![]
            }
            L1Step::ServeUpwardRead => {
                let L1Task::UpwardRead(message) = &process.task else {
                    panic!("{}: {:?} is not an upward read", core.name(), process.task);
                };
                let has_copyback = core.state(lock) == MesiState::Modified;
                let mut reply = message.clone();
                reply.kind = MessageKind::UpwardRead { has_copyback };
                core.send_reply(kernel, reply, data_bytes(core.line_size()));
                core.set_state(lock, MesiState::Shared);
                vec![]
            }
            L1Step::ServeUpwardWrite => {
                let L1Task::UpwardWrite(message) = &process.task else {
                    panic!("{}: {:?} is not an upward write", core.name(), process.task);
                };
                let dirty = core.state(lock) == MesiState::Modified;
                core.set_state(lock, MesiState::Invalid);
                let size = if dirty {
                    data_bytes(core.line_size())
                } else {
                    CONTROL_BYTES
                };
                core.send_reply(kernel, message.clone(), size);
                vec![]
            }
        };
        Ok(steps)
    }

    fn complete(
        &mut self,
        core: &mut ControllerCore,
        kernel: &mut Kernel,
        task: L1Task,
        result: Result<(), CoherenceError>,
    ) {
        match (task, result) {
            (L1Task::Core(access), Ok(())) => {
                let now = kernel.now();
                let Some(pos) = self.pending.iter().position(|p| p.info.tag == access.tag) else {
                    panic!("{}: completed access {} is not pending", core.name(), access);
                };
                let completions = self.pending.remove(pos).complete(now);
                trace!("{}: {} completed after {} cycles", core.name(), access, now - access.issued_at);
                self.completions.extend(completions);
            }
            (L1Task::Core(access), Err(error)) => {
                let delay = core.retry_latency();
                debug!("{}: {} failed ({}), retry in {} cycles", core.name(), access, error, delay);
                kernel.schedule(
                    Event::Retry {
                        core: self.core_id,
                        access,
                    },
                    delay,
                );
            }
            (_, Ok(())) => {}
            (task, Err(error)) => panic!("{}: snoop {:?} failed: {}", core.name(), task, error),
        }
    }
}

impl CoherenceController<FirstLevel> {
    pub fn core_id(&self) -> usize {
        self.role().core_id
    }

    /// Whether a new core access to `tag` would be admitted right now.
    pub fn can_access(&self, kind: AccessKind, tag: Tag) -> Result<(), AccessRejectReason> {
        let role = self.role();
        match role.find_access(tag) {
            Some(pending) => {
                if kind == AccessKind::Store || pending.info.kind == AccessKind::Store {
                    Err(AccessRejectReason::StorePending)
                } else {
                    Ok(())
                }
            }
            None if role.num_pending(kind) < role.ports(kind) => Ok(()),
            None => Err(AccessRejectReason::PortsBusy),
        }
    }

    /// Register an admitted access.  Returns `true` when it needs its own transaction and
    /// `false` when it rides along with an access to the same line already in flight.
    pub fn begin_access(&mut self, access: AccessInfo, on_completed: Option<CompletionCallback>) -> bool {
        debug_assert!(access.kind.is_core());
        let role = self.role_mut();
        let access = MemoryAccess::new(access, on_completed);
        let tag = access.info.tag;
        if let Some(pending) = role.pending.iter_mut().find(|p| p.info.tag == tag) {
            pending.add_alias(access);
            return false;
        }
        role.pending.push(access);
        true
    }

    pub fn receive_ifetch(&mut self, access: AccessInfo, kernel: &mut Kernel) {
        self.schedule_core_process(access, vec![L1Step::Fill], kernel);
    }

    pub fn receive_load(&mut self, access: AccessInfo, kernel: &mut Kernel) {
        self.schedule_core_process(access, vec![L1Step::Fill], kernel);
    }

    pub fn receive_store(&mut self, access: AccessInfo, kernel: &mut Kernel) {
        self.schedule_core_process(access, vec![L1Step::ObtainOwnership, L1Step::OwnershipGranted, L1Step::Modify], kernel);
    }

    /// Start over with an access whose previous attempt failed.
    pub fn retry(&mut self, access: AccessInfo, kernel: &mut Kernel) {
        match access.kind {
            AccessKind::Ifetch => self.receive_ifetch(access, kernel),
            AccessKind::Load => self.receive_load(access, kernel),
            AccessKind::Store => self.receive_store(access, kernel),
            kind => panic!("{}: cannot retry {:?}", self.name(), kind),
        }
    }

    /// Snoops from the last-level cache.
    pub fn receive_request(&mut self, message: Message, kernel: &mut Kernel) {
        let (task, kind, body) = match message.kind {
            MessageKind::UpwardRead { .. } => (
                L1Task::UpwardRead(message.clone()),
                AccessKind::UpwardRead,
                L1Step::ServeUpwardRead,
            ),
            MessageKind::UpwardWrite => (
                L1Task::UpwardWrite(message.clone()),
                AccessKind::UpwardWrite,
                L1Step::ServeUpwardWrite,
            ),
            _ => panic!("{}: cannot serve {}", self.name(), message),
        };
        self.schedule_process(kernel, task, kind, message.access, message.tag, vec![body]);
    }

    pub fn take_completions(&mut self) -> Vec<AccessCompletion> {
        std::mem::take(&mut self.role_mut().completions)
    }

    /// Core accesses admitted but not yet completed, aliases excluded.
    pub fn pending_accesses(&self) -> impl Iterator<Item = &AccessInfo> {
        self.role().pending.iter().map(|access| &access.info)
    }

    fn schedule_core_process(&mut self, access: AccessInfo, body: Vec<L1Step>, kernel: &mut Kernel) {
        assert!(
            self.role().find_access(access.tag).map(|p| p.info.id) == Some(access.id),
            "{}: {} was not admitted",
            self.name(),
            access
        );
        self.schedule_process(kernel, L1Task::Core(access), access.kind, access, access.tag, body);
    }
}
