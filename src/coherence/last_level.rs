use log::debug;
use smallvec::SmallVec;

use super::{
    data_bytes, CacheRole, CoherenceController, CoherenceError, ControllerCore, DeviceId,
    FindAndLock, Message, MessageKind, Process, ShadowTagDirectory, Step, CONTROL_BYTES,
};
use crate::cache::{AccessKind, CacheGeometry, MesiState, Tag};
use crate::hierarchy::Kernel;

/// Requests from a first-level cache, each carrying the message to answer.
#[derive(Debug, Clone)]
pub enum LlcTask {
    Evict(Message),
    DownwardRead(Message),
    DownwardWrite(Message),
}

impl LlcTask {
    pub fn message(&self) -> &Message {
        match self {
            Self::Evict(message) | Self::DownwardRead(message) | Self::DownwardWrite(message) => {
                message
            }
        }
    }

    /// Core index of the requesting first-level cache.
    pub fn source(&self) -> usize {
        self.message().source_core()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlcStep {
    MergeDirty,
    AckEvict,
    ResolveRead,
    SnoopDone,
    MemReadDone,
    ReplyRead,
    Invalidate,
    FetchForWrite,
    ReplyWrite,
    WritebackVictim,
    InvalidateVictim,
}

pub type Sharers = SmallVec<[usize; 8]>;

/// Shared last-level cache role.  Sharer knowledge comes only from the shadow tag
/// directories, which only this role touches.
#[derive(Debug)]
pub struct LastLevel {
    directories: Vec<ShadowTagDirectory>,
}

pub type LastLevelCache = CoherenceController<LastLevel>;

impl LastLevel {
    /// One directory per first-level cache, indexed by core.
    pub fn new(l1_geometries: impl IntoIterator<Item = CacheGeometry>) -> Self {
        Self {
            directories: l1_geometries
                .into_iter()
                .map(ShadowTagDirectory::new)
                .collect(),
        }
    }

    pub fn directories(&self) -> &[ShadowTagDirectory] {
        &self.directories
    }

    pub fn sharers(&self, tag: Tag) -> Sharers {
        self.directories
            .iter()
            .enumerate()
            .filter(|(_, directory)| directory.contains(tag))
            .map(|(core, _)| core)
            .collect()
    }

    pub fn is_shared(&self, tag: Tag) -> bool {
        self.sharers(tag).len() > 1
    }

    pub fn is_owned(&self, tag: Tag) -> bool {
        self.sharers(tag).len() == 1
    }

    pub fn is_owned_or_shared(&self, tag: Tag) -> bool {
        !self.sharers(tag).is_empty()
    }

    pub fn owner_or_first_sharer(&self, tag: Tag) -> Option<usize> {
        self.sharers(tag).first().copied()
    }

    /// First-level cache to snoop for a read by `source`: a sole holder other than the
    /// requester always, otherwise any other holder when this cache has no copy.
    fn read_source(&self, tag: Tag, source: usize, hit: bool) -> Option<usize> {
        if self.is_owned(tag) {
            return self.owner_or_first_sharer(tag).filter(|&owner| owner != source);
        }
        if hit {
            return None;
        }
        self.sharers(tag).into_iter().find(|&sharer| sharer != source)
    }

    fn send_upward(
        core: &mut ControllerCore,
        kernel: &mut Kernel,
        target: usize,
        message: &Message,
        kind: MessageKind,
    ) -> u64 {
        core.send_request(
            kernel,
            DeviceId::L1(target),
            message.access,
            message.tag,
            kind,
            CONTROL_BYTES,
        )
    }

    fn send_mem_read(core: &mut ControllerCore, kernel: &mut Kernel, message: &Message) -> u64 {
        core.send_request(
            kernel,
            DeviceId::Memory,
            message.access,
            message.tag,
            MessageKind::MemRead,
            CONTROL_BYTES,
        )
    }

    /// A line filled from elsewhere holds clean data unless told otherwise.
    fn fill(core: &mut ControllerCore, lock: &FindAndLock, dirty: bool) {
        if lock.is_bypass() {
            return;
        }
        if core.state(lock) == MesiState::Invalid {
            core.set_state(lock, MesiState::Exclusive);
        }
        if dirty {
            core.set_state(lock, MesiState::Modified);
        }
    }
}

impl CacheRole for LastLevel {
    type Task = LlcTask;
    type Step = LlcStep;

    const CAN_BYPASS: bool = true;

    /// A clean copy leaving a first-level cache brings nothing worth a way.
    fn allocates_on_miss(task: &LlcTask) -> bool {
        !matches!(
            task,
            LlcTask::Evict(Message {
                kind: MessageKind::Evict { dirty: false },
                ..
            })
        )
    }

    fn evict_steps(&mut self, _core: &mut ControllerCore, _lock: &FindAndLock) -> Vec<Step<LlcStep>> {
        vec![Step::Run(LlcStep::WritebackVictim)]
    }

    fn run(
        &mut self,
        core: &mut ControllerCore,
        kernel: &mut Kernel,
        process: &mut Process<LlcTask, LlcStep>,
        step: LlcStep,
    ) -> Result<Vec<Step<LlcStep>>, CoherenceError> {
        let lock = &process.lock;
        let message = process.task.message();
        let source = process.task.source();
        let tag = lock.tag;

        let steps = match step {
            LlcStep::MergeDirty => {
                if let MessageKind::Evict { dirty: true } = message.kind {
                    Self::fill(core, lock, true);
                }
                vec![]
            }
            LlcStep::AckEvict => {
                let directory = &mut self.directories[source];
                assert!(
                    directory.contains(tag),
                    "{}: Evict 0x{:08x} from core {} which does not hold it",
                    core.name(),
                    tag,
                    source
                );
                directory.remove(tag);
                core.send_reply(kernel, message.clone(), CONTROL_BYTES);
                vec![]
            }
            LlcStep::ResolveRead => match self.read_source(tag, source, lock.is_hit()) {
                Some(target) => {
                    let kind = MessageKind::UpwardRead {
                        has_copyback: false,
                    };
                    let id = Self::send_upward(core, kernel, target, message, kind);
                    vec![Step::await_reply(id, LlcStep::SnoopDone)]
                }
                None if !lock.is_hit() => {
                    let id = Self::send_mem_read(core, kernel, message);
                    vec![Step::await_reply(id, LlcStep::MemReadDone)]
                }
                None => vec![],
            },
            LlcStep::SnoopDone => {
                let has_copyback = match process.reply().kind {
                    MessageKind::UpwardRead { has_copyback } => has_copyback,
                    other => panic!("{}: unexpected reply {:?} to UpwardRead", core.name(), other),
                };
                Self::fill(core, lock, has_copyback);
                vec![]
            }
            LlcStep::MemReadDone => {
                Self::fill(core, lock, false);
                vec![]
            }
            LlcStep::ReplyRead => {
                self.directories[source].add(tag);
                let mut reply = message.clone();
                reply.kind = MessageKind::DownwardRead {
                    shared: self.is_shared(tag),
                };
                core.send_reply(kernel, reply, data_bytes(core.line_size()));
                vec![]
            }
            LlcStep::Invalidate => {
                let messages: SmallVec<[u64; 4]> = self
                    .sharers(tag)
                    .into_iter()
                    .filter(|&sharer| sharer != source)
                    .map(|sharer| {
                        Self::send_upward(core, kernel, sharer, message, MessageKind::UpwardWrite)
                    })
                    .collect();
                if messages.is_empty() {
                    vec![]
                } else {
                    vec![Step::Await {
                        messages,
                        then: None,
                    }]
                }
            }
            LlcStep::FetchForWrite => {
                if !lock.is_hit() && !self.is_owned_or_shared(tag) {
                    let id = Self::send_mem_read(core, kernel, message);
                    vec![Step::Await {
                        messages: SmallVec::from_slice(&[id]),
                        then: None,
                    }]
                } else {
                    vec![]
                }
            }
            LlcStep::ReplyWrite => {
                for sharer in self.sharers(tag) {
                    if sharer != source {
                        self.directories[sharer].remove(tag);
                    }
                }
                self.directories[source].add(tag);
                if !lock.is_bypass() {
                    let state = match core.state(lock) {
                        MesiState::Modified => MesiState::Modified,
                        _ => MesiState::Exclusive,
                    };
                    core.set_state(lock, state);
                }
                core.send_reply(kernel, message.clone(), data_bytes(core.line_size()));
                vec![]
            }
            LlcStep::WritebackVictim => {
                let access = lock.cache_access();
                let Some(victim_tag) = access.victim_tag else {
                    panic!("{}: evicting without a victim: {}", core.name(), access);
                };
                let state = core.resident_state(lock);
                assert!(
                    state.is_valid(),
                    "{}: evicting INVALID line 0x{:08x}",
                    core.name(),
                    victim_tag
                );
                if state == MesiState::Modified {
                    let id = core.send_request(
                        kernel,
                        DeviceId::Memory,
                        message.access,
                        victim_tag,
                        MessageKind::MemWrite,
                        data_bytes(core.line_size()),
                    );
                    vec![Step::await_reply(id, LlcStep::InvalidateVictim)]
                } else {
                    vec![Step::Run(LlcStep::InvalidateVictim)]
                }
            }
            LlcStep::InvalidateVictim => {
                core.invalidate_resident(lock);
                vec![]
            }
        };
        Ok(steps)
    }

    fn complete(
        &mut self,
        core: &mut ControllerCore,
        kernel: &mut Kernel,
        task: LlcTask,
        result: Result<(), CoherenceError>,
    ) {
        if let Err(error) = result {
            let mut reply = task.message().clone();
            debug!("{}: {} failed: {}", core.name(), reply, error);
            reply.has_error = true;
            core.send_reply(kernel, reply, CONTROL_BYTES);
        }
    }
}

impl CoherenceController<LastLevel> {
    pub fn receive_request(&mut self, message: Message, kernel: &mut Kernel) {
        let (task, kind, body) = match message.kind {
            MessageKind::Evict { .. } => (
                LlcTask::Evict(message.clone()),
                AccessKind::Evict,
                vec![LlcStep::MergeDirty, LlcStep::AckEvict],
            ),
            MessageKind::DownwardRead { .. } => (
                LlcTask::DownwardRead(message.clone()),
                AccessKind::DownwardRead,
                vec![LlcStep::ResolveRead, LlcStep::ReplyRead],
            ),
            MessageKind::DownwardWrite => (
                LlcTask::DownwardWrite(message.clone()),
                AccessKind::DownwardWrite,
                vec![LlcStep::Invalidate, LlcStep::FetchForWrite, LlcStep::ReplyWrite],
            ),
            _ => panic!("{}: cannot serve {}", self.name(), message),
        };
        self.schedule_process(kernel, task, kind, message.access, message.tag, body);
    }

    pub fn directories(&self) -> &[ShadowTagDirectory] {
        self.role().directories()
    }

    pub fn sharers(&self, tag: Tag) -> Sharers {
        self.role().sharers(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheAccess;
    use crate::coherence::{AccessInfo, FindAndLockStatus, LastLevelCacheConfig};
    use crate::hierarchy::NetConfig;

    fn llc(cores: usize) -> LastLevel {
        LastLevel::new((0..cores).map(|_| CacheGeometry::new(1024, 2, 64)))
    }

    fn controller_core() -> ControllerCore {
        ControllerCore::new(DeviceId::Llc, "llc", &LastLevelCacheConfig::default().cache(), 0)
    }

    fn kernel() -> Kernel {
        Kernel::new(&NetConfig::default(), false)
    }

    fn evict_from(core: usize, tag: Tag) -> Process<LlcTask, LlcStep> {
        let access = AccessInfo {
            id: 0,
            core,
            kind: AccessKind::Load,
            address: tag,
            tag,
            issued_at: 0,
        };
        let message = Message::new(0, DeviceId::L1(core), access, tag, MessageKind::Evict { dirty: false });
        let lock = FindAndLock::new(AccessKind::Evict, tag, access);
        Process::new(0, LlcTask::Evict(message), lock, vec![])
    }

    #[test]
    #[should_panic(expected = "which does not hold it")]
    fn evict_from_a_core_the_directory_does_not_list_panics() {
        let mut role = llc(2);
        role.directories[1].add(0x40);
        let mut process = evict_from(0, 0x40);
        let _ = role.run(&mut controller_core(), &mut kernel(), &mut process, LlcStep::AckEvict);
    }

    #[test]
    #[should_panic(expected = "evicting INVALID line")]
    fn writing_back_an_invalid_victim_panics() {
        let mut role = llc(1);
        let mut process = evict_from(0, 0x40);
        process.lock.cache_access = Some(CacheAccess {
            kind: AccessKind::Evict,
            tag: 0x40,
            set: 1,
            way: Some(0),
            hit: false,
            eviction: true,
            victim_tag: Some(0x8040),
        });
        process.lock.status = FindAndLockStatus::Evicting;
        let _ = role.run(&mut controller_core(), &mut kernel(), &mut process, LlcStep::WritebackVictim);
    }

    #[test]
    fn sharer_queries_count_directory_membership() {
        let mut role = llc(3);
        assert!(!role.is_owned_or_shared(0x40));
        assert_eq!(role.owner_or_first_sharer(0x40), None);

        role.directories[1].add(0x40);
        assert!(role.is_owned(0x40));
        assert!(!role.is_shared(0x40));
        assert_eq!(role.owner_or_first_sharer(0x40), Some(1));

        role.directories[2].add(0x40);
        assert!(role.is_shared(0x40));
        assert!(!role.is_owned(0x40));
        assert_eq!(role.sharers(0x40).as_slice(), &[1, 2]);
    }

    #[test]
    fn read_source_prefers_other_holders() {
        let mut role = llc(3);
        assert_eq!(role.read_source(0x80, 0, false), None, "nobody holds it");

        role.directories[2].add(0x80);
        assert_eq!(role.read_source(0x80, 0, true), Some(2), "sole owner is always snooped");
        assert_eq!(role.read_source(0x80, 2, true), None);

        role.directories[1].add(0x80);
        assert_eq!(role.read_source(0x80, 0, true), None, "shared copies are clean");
        assert_eq!(role.read_source(0x80, 0, false), Some(1));
    }
}
