use smallvec::SmallVec;
use std::fmt;

use super::{AccessInfo, Message, MessageId};
use crate::cache::{AccessKind, CacheAccess, Tag};

pub type ProcessId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindAndLockStatus {
    Idle,
    Acquired,
    Evicting,
    Waiting,
    Released,
    Failed,
    Bypassed,
}

impl FindAndLockStatus {
    pub fn is_acquired_or_bypassed(self) -> bool {
        matches!(self, Self::Acquired | Self::Bypassed)
    }
}

/// Lookup-and-lock bookkeeping of one process.  The cache access is recomputed on every
/// attempt, so a woken waiter always sees the line as its previous holder left it.
#[derive(Debug, Clone)]
pub struct FindAndLock {
    pub kind: AccessKind,
    pub tag: Tag,
    pub access: AccessInfo,
    pub status: FindAndLockStatus,
    pub cache_access: Option<CacheAccess>,
    /// Cleared for lookups that should bypass the array on a miss.
    pub allocate_on_miss: bool,
}

impl FindAndLock {
    pub fn new(kind: AccessKind, tag: Tag, access: AccessInfo) -> Self {
        Self {
            kind,
            tag,
            access,
            status: FindAndLockStatus::Idle,
            cache_access: None,
            allocate_on_miss: true,
        }
    }

    /// The line this process has locked, as `(set, way)`.
    pub fn line(&self) -> Option<(usize, usize)> {
        match self.status {
            FindAndLockStatus::Acquired | FindAndLockStatus::Evicting => self
                .cache_access
                .and_then(|access| access.way.map(|way| (access.set, way))),
            _ => None,
        }
    }

    pub fn holds_line(&self) -> bool {
        self.line().is_some()
    }

    pub fn is_hit(&self) -> bool {
        self.cache_access.map_or(false, |access| access.hit)
    }

    pub fn is_bypass(&self) -> bool {
        self.cache_access.map_or(false, |access| access.is_bypass())
    }

    /// Access decided by the last successful attempt.
    pub fn cache_access(&self) -> &CacheAccess {
        match &self.cache_access {
            Some(access) => access,
            None => panic!("{:?} 0x{:08x} has not looked up the cache yet", self.kind, self.tag),
        }
    }
}

/// Unit of work on a process stack.  `Run` steps are interpreted by the owning cache role.
#[derive(Debug)]
pub enum Step<S> {
    FindAndLock,
    FinishEviction,
    /// Park until every listed reply has arrived, then continue with `then`.
    Await {
        messages: SmallVec<[MessageId; 4]>,
        then: Option<S>,
    },
    Run(S),
}

impl<S> Step<S> {
    pub fn await_reply(message: MessageId, then: S) -> Self {
        Self::Await {
            messages: SmallVec::from_slice(&[message]),
            then: Some(then),
        }
    }
}

/// A resumable coherence transaction: a stack of steps popped one per controller pass.
#[derive(Debug)]
pub struct Process<T, S> {
    pub id: ProcessId,
    pub task: T,
    pub lock: FindAndLock,
    stack: Vec<Step<S>>,
    replies: Vec<Message>,
}

impl<T, S> Process<T, S> {
    /// `body` runs in the given order once the line is locked.
    pub fn new(id: ProcessId, task: T, lock: FindAndLock, body: Vec<S>) -> Self {
        let mut stack: Vec<Step<S>> = body.into_iter().rev().map(Step::Run).collect();
        stack.push(Step::FindAndLock);
        Self {
            id,
            task,
            lock,
            stack,
            replies: Vec::new(),
        }
    }

    /// Schedule `steps` ahead of everything still pending, preserving their order.
    pub fn push_steps(&mut self, steps: Vec<Step<S>>) {
        self.stack.extend(steps.into_iter().rev());
    }

    pub fn push(&mut self, step: Step<S>) {
        self.stack.push(step);
    }

    pub fn pop(&mut self) -> Option<Step<S>> {
        self.stack.pop()
    }

    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn set_replies(&mut self, replies: Vec<Message>) {
        self.replies = replies;
    }

    /// Replies collected by the most recent `Await`.
    pub fn replies(&self) -> &[Message] {
        &self.replies
    }

    pub fn reply(&self) -> &Message {
        match self.replies.first() {
            Some(reply) => reply,
            None => panic!("process {} resumed without a reply", self.id),
        }
    }
}

impl<T: fmt::Debug, S: fmt::Debug> fmt::Display for Process<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process {} {:?} [{:?}", self.id, self.task, self.lock.status)?;
        if let Some(access) = &self.lock.cache_access {
            write!(f, " {}", access)?;
        }
        write!(f, "] next {:?}", self.stack.last())
    }
}
