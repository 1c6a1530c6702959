use serde::Serialize;
use std::fmt;

use super::Tag;

/// What a lookup is performed on behalf of.  Core kinds enter at a first-level cache,
/// downward kinds arrive at the last-level cache from above, upward kinds are snoops arriving
/// at a first-level cache from below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccessKind {
    Ifetch,
    Load,
    Store,
    DownwardRead,
    DownwardWrite,
    Evict,
    UpwardRead,
    UpwardWrite,
}

impl AccessKind {
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::Ifetch | Self::Load | Self::DownwardRead | Self::UpwardRead
        )
    }

    pub fn is_upward(self) -> bool {
        matches!(self, Self::UpwardRead | Self::UpwardWrite)
    }

    /// Requests received by the last-level cache.  These never queue on a busy line.
    pub fn is_downward(self) -> bool {
        matches!(self, Self::DownwardRead | Self::DownwardWrite | Self::Evict)
    }

    pub fn is_core(self) -> bool {
        matches!(self, Self::Ifetch | Self::Load | Self::Store)
    }
}

/// Outcome of one lookup: where the access lands and whether a victim has to go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheAccess {
    pub kind: AccessKind,
    pub tag: Tag,
    pub set: usize,
    /// `None` when the replacement policy chose to bypass the array.
    pub way: Option<usize>,
    pub hit: bool,
    pub eviction: bool,
    pub victim_tag: Option<Tag>,
}

impl CacheAccess {
    pub fn is_hit(&self) -> bool {
        self.hit
    }

    pub fn is_bypass(&self) -> bool {
        self.way.is_none()
    }

    pub fn is_eviction(&self) -> bool {
        self.eviction
    }
}

impl fmt::Display for CacheAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.hit {
            "hit"
        } else if self.is_bypass() {
            "bypass"
        } else {
            "miss"
        };
        match self.way {
            Some(way) => write!(f, "{:?} 0x{:08x} [{}:{}] {}", self.kind, self.tag, self.set, way, outcome)?,
            None => write!(f, "{:?} 0x{:08x} [{}:-] {}", self.kind, self.tag, self.set, outcome)?,
        }
        if let Some(victim) = self.victim_tag.filter(|_| self.eviction) {
            write!(f, " evicting 0x{:08x}", victim)?;
        }
        Ok(())
    }
}
