use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use super::Tag;

/// MESI coherence state of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MesiState {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

impl MesiState {
    pub fn is_valid(self) -> bool {
        self != Self::Invalid
    }

    /// Transitions the protocol may perform.  Rewriting the current state is always allowed;
    /// a line never jumps from INVALID straight to MODIFIED.
    pub fn can_transition_to(self, next: MesiState) -> bool {
        use MesiState::*;
        self == next
            || matches!(
                (self, next),
                (Invalid, Exclusive)
                    | (Invalid, Shared)
                    | (Exclusive, Modified)
                    | (Shared, Modified)
                    | (Exclusive, Shared)
                    | (Modified, Shared)
                    | (_, Invalid)
            )
    }
}

impl fmt::Display for MesiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = match self {
            Self::Invalid => "I",
            Self::Shared => "S",
            Self::Exclusive => "E",
            Self::Modified => "M",
        };
        f.write_str(short)
    }
}

/// One way of one set.  The transient tag doubles as the lock: a line is locked exactly when
/// it carries one, and waiters may only queue on a locked line.
#[derive(Debug)]
pub struct CacheLine<W> {
    set: usize,
    way: usize,
    state: MesiState,
    tag: Option<Tag>,
    transient_tag: Option<Tag>,
    suspended: VecDeque<W>,
}

impl<W> CacheLine<W> {
    pub fn new(set: usize, way: usize) -> Self {
        Self {
            set,
            way,
            state: MesiState::Invalid,
            tag: None,
            transient_tag: None,
            suspended: VecDeque::new(),
        }
    }

    pub fn set(&self) -> usize {
        self.set
    }

    pub fn way(&self) -> usize {
        self.way
    }

    pub fn state(&self) -> MesiState {
        self.state
    }

    pub fn tag(&self) -> Option<Tag> {
        self.tag
    }

    pub fn transient_tag(&self) -> Option<Tag> {
        self.transient_tag
    }

    pub fn is_locked(&self) -> bool {
        self.transient_tag.is_some()
    }

    pub fn num_suspended(&self) -> usize {
        self.suspended.len()
    }

    /// Whether a lookup for `tag` should land on this line: either the committed copy is
    /// valid, or the line is locked while being filled for `tag`.
    pub fn matches(&self, tag: Tag) -> bool {
        (self.tag == Some(tag) && self.state.is_valid()) || self.transient_tag == Some(tag)
    }

    pub fn set_state(&mut self, next: MesiState) {
        assert!(
            self.state.can_transition_to(next),
            "illegal MESI transition {:?} -> {:?} on line [{}:{}] tag {:?}",
            self.state,
            next,
            self.set,
            self.way,
            self.tag
        );
        self.state = next;
    }

    pub fn invalidate(&mut self) {
        self.set_state(MesiState::Invalid);
    }

    pub(crate) fn set_tag(&mut self, tag: Tag) {
        self.tag = Some(tag);
    }

    /// Take the lock for `transient_tag`, or queue `waiter` behind the current holder.
    pub fn lock(&mut self, waiter: W, transient_tag: Tag) -> bool {
        if self.is_locked() {
            self.suspended.push_back(waiter);
            false
        } else {
            self.transient_tag = Some(transient_tag);
            true
        }
    }

    /// Drop the lock and hand back everyone who queued on it, oldest first.
    pub fn unlock(&mut self) -> Vec<W> {
        assert!(
            self.is_locked(),
            "unlocking line [{}:{}] that is not locked",
            self.set,
            self.way
        );
        self.transient_tag = None;
        self.suspended.drain(..).collect()
    }
}
