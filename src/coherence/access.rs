use serde::Serialize;
use std::fmt;

use crate::cache::{AccessKind, Tag};
use crate::timeq::Cycle;

pub type AccessId = u64;

/// Identity of a core access, carried by every message sent on its behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessInfo {
    pub id: AccessId,
    pub core: usize,
    pub kind: AccessKind,
    pub address: u64,
    pub tag: Tag,
    pub issued_at: Cycle,
}

impl fmt::Display for AccessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "core{}#{} {:?} 0x{:08x}",
            self.core, self.id, self.kind, self.address
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessCompletion {
    pub core: usize,
    pub id: AccessId,
    pub kind: AccessKind,
    pub address: u64,
    pub issued_at: Cycle,
    pub completed_at: Cycle,
}

impl AccessCompletion {
    pub fn latency(&self) -> Cycle {
        self.completed_at.saturating_sub(self.issued_at)
    }
}

pub type CompletionCallback = Box<dyn FnOnce(&AccessCompletion)>;

/// An in-flight core access and the later accesses to the same line riding along with it.
pub struct MemoryAccess {
    pub info: AccessInfo,
    aliases: Vec<MemoryAccess>,
    on_completed: Option<CompletionCallback>,
}

impl MemoryAccess {
    pub fn new(info: AccessInfo, on_completed: Option<CompletionCallback>) -> Self {
        Self {
            info,
            aliases: Vec::new(),
            on_completed,
        }
    }

    pub fn add_alias(&mut self, alias: MemoryAccess) {
        self.aliases.insert(0, alias);
    }

    pub fn aliases(&self) -> impl Iterator<Item = &AccessInfo> {
        self.aliases.iter().map(|alias| &alias.info)
    }

    /// Complete this access and every alias with the same outcome.
    pub fn complete(self, now: Cycle) -> Vec<AccessCompletion> {
        let mut completions = Vec::with_capacity(1 + self.aliases.len());
        let mut pending = vec![self];
        while let Some(mut access) = pending.pop() {
            let completion = AccessCompletion {
                core: access.info.core,
                id: access.info.id,
                kind: access.info.kind,
                address: access.info.address,
                issued_at: access.info.issued_at,
                completed_at: now,
            };
            if let Some(callback) = access.on_completed.take() {
                callback(&completion);
            }
            completions.push(completion);
            pending.extend(access.aliases.drain(..).rev());
        }
        completions
    }
}

impl fmt::Debug for MemoryAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAccess")
            .field("info", &self.info)
            .field("aliases", &self.aliases.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn info(id: AccessId) -> AccessInfo {
        AccessInfo {
            id,
            core: 0,
            kind: AccessKind::Load,
            address: 0x100,
            tag: 0x100,
            issued_at: id,
        }
    }

    #[test]
    fn completing_runs_callbacks_for_aliases() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = |seen: &Rc<RefCell<Vec<AccessId>>>| -> CompletionCallback {
            let seen = Rc::clone(seen);
            Box::new(move |completion| seen.borrow_mut().push(completion.id))
        };

        let mut access = MemoryAccess::new(info(1), Some(record(&seen)));
        access.add_alias(MemoryAccess::new(info(2), Some(record(&seen))));
        access.add_alias(MemoryAccess::new(info(3), None));
        assert_eq!(access.aliases().count(), 2);

        let completions = access.complete(20);
        let ids: Vec<_> = completions.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(completions[2].latency(), 18);
    }
}
