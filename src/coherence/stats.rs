use serde::Serialize;
use std::ops::AddAssign;

use super::CoherenceError;
use crate::cache::{AccessKind, CacheAccess};

/// Per-controller counters.  Hit/miss/bypass counts cover every kind except upward snoops,
/// which are tallied separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    downward_read_hits: u64,
    downward_read_misses: u64,
    downward_read_bypasses: u64,
    downward_write_hits: u64,
    downward_write_misses: u64,
    downward_write_bypasses: u64,
    evictions: u64,
    upward_reads: u64,
    upward_writes: u64,
    lock_failures: u64,
    message_failures: u64,
}

impl CacheStats {
    pub fn downward_read_hits(&self) -> u64 {
        self.downward_read_hits
    }

    pub fn downward_read_misses(&self) -> u64 {
        self.downward_read_misses
    }

    pub fn downward_read_bypasses(&self) -> u64 {
        self.downward_read_bypasses
    }

    pub fn downward_write_hits(&self) -> u64 {
        self.downward_write_hits
    }

    pub fn downward_write_misses(&self) -> u64 {
        self.downward_write_misses
    }

    pub fn downward_write_bypasses(&self) -> u64 {
        self.downward_write_bypasses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn upward_reads(&self) -> u64 {
        self.upward_reads
    }

    pub fn upward_writes(&self) -> u64 {
        self.upward_writes
    }

    pub fn lock_failures(&self) -> u64 {
        self.lock_failures
    }

    pub fn message_failures(&self) -> u64 {
        self.message_failures
    }

    pub fn hits(&self) -> u64 {
        self.downward_read_hits + self.downward_write_hits
    }

    pub fn misses(&self) -> u64 {
        self.downward_read_misses + self.downward_write_misses
    }

    pub fn bypasses(&self) -> u64 {
        self.downward_read_bypasses + self.downward_write_bypasses
    }

    pub fn accesses(&self) -> u64 {
        self.hits() + self.misses() + self.bypasses()
    }

    pub fn hit_ratio(&self) -> f64 {
        match self.accesses() {
            0 => 0.0,
            total => self.hits() as f64 / total as f64,
        }
    }

    pub fn record_access(&mut self, kind: AccessKind, access: &CacheAccess) {
        if kind.is_upward() {
            if kind.is_read() {
                self.upward_reads = self.upward_reads.saturating_add(1);
            } else {
                self.upward_writes = self.upward_writes.saturating_add(1);
            }
            return;
        }

        let counter = match (kind.is_read(), access.is_hit(), access.is_bypass()) {
            (true, true, _) => &mut self.downward_read_hits,
            (true, false, true) => &mut self.downward_read_bypasses,
            (true, false, false) => &mut self.downward_read_misses,
            (false, true, _) => &mut self.downward_write_hits,
            (false, false, true) => &mut self.downward_write_bypasses,
            (false, false, false) => &mut self.downward_write_misses,
        };
        *counter = counter.saturating_add(1);

        if access.is_eviction() {
            self.evictions = self.evictions.saturating_add(1);
        }
    }

    pub fn record_failure(&mut self, error: CoherenceError) {
        let counter = match error {
            CoherenceError::LockFailed => &mut self.lock_failures,
            CoherenceError::MessageFailed => &mut self.message_failures,
        };
        *counter = counter.saturating_add(1);
    }
}

impl AddAssign<&CacheStats> for CacheStats {
    fn add_assign(&mut self, rhs: &CacheStats) {
        self.downward_read_hits = self.downward_read_hits.saturating_add(rhs.downward_read_hits);
        self.downward_read_misses = self.downward_read_misses.saturating_add(rhs.downward_read_misses);
        self.downward_read_bypasses = self
            .downward_read_bypasses
            .saturating_add(rhs.downward_read_bypasses);
        self.downward_write_hits = self.downward_write_hits.saturating_add(rhs.downward_write_hits);
        self.downward_write_misses = self
            .downward_write_misses
            .saturating_add(rhs.downward_write_misses);
        self.downward_write_bypasses = self
            .downward_write_bypasses
            .saturating_add(rhs.downward_write_bypasses);
        self.evictions = self.evictions.saturating_add(rhs.evictions);
        self.upward_reads = self.upward_reads.saturating_add(rhs.upward_reads);
        self.upward_writes = self.upward_writes.saturating_add(rhs.upward_writes);
        self.lock_failures = self.lock_failures.saturating_add(rhs.lock_failures);
        self.message_failures = self.message_failures.saturating_add(rhs.message_failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(kind: AccessKind, hit: bool, way: Option<usize>, eviction: bool) -> CacheAccess {
        CacheAccess {
            kind,
            tag: 0x80,
            set: 2,
            way,
            hit,
            eviction,
            victim_tag: None,
        }
    }

    #[test]
    fn classifies_by_direction_and_outcome() {
        let mut stats = CacheStats::default();
        stats.record_access(AccessKind::Load, &access(AccessKind::Load, true, Some(0), false));
        stats.record_access(AccessKind::Ifetch, &access(AccessKind::Ifetch, false, Some(1), true));
        stats.record_access(AccessKind::Store, &access(AccessKind::Store, false, None, false));
        stats.record_access(AccessKind::Evict, &access(AccessKind::Evict, true, Some(0), false));
        stats.record_access(AccessKind::UpwardRead, &access(AccessKind::UpwardRead, true, Some(0), false));
        stats.record_access(AccessKind::UpwardWrite, &access(AccessKind::UpwardWrite, true, Some(0), false));

        assert_eq!(stats.downward_read_hits(), 1);
        assert_eq!(stats.downward_read_misses(), 1);
        assert_eq!(stats.downward_write_bypasses(), 1);
        assert_eq!(stats.downward_write_hits(), 1);
        assert_eq!(stats.evictions(), 1);
        assert_eq!(stats.upward_reads(), 1);
        assert_eq!(stats.upward_writes(), 1);
        assert_eq!(stats.accesses(), 4);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn add_assign_sums_counters() {
        let mut total = CacheStats::default();
        let mut one = CacheStats::default();
        one.record_failure(CoherenceError::LockFailed);
        one.record_failure(CoherenceError::MessageFailed);
        total += &one;
        total += &one;
        assert_eq!(total.lock_failures(), 2);
        assert_eq!(total.message_failures(), 2);
    }
}
