use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::fmt::Debug;

use super::{AccessKind, Tag};

/// Victim choice handed back by a replacement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    Victim(usize),
    Bypass,
}

/// Pluggable victim selection.  The coherence layer only ever invalidates / writes back the
/// way chosen here.
pub trait ReplacementPolicy: Debug {
    fn handle_replacement(&mut self, kind: AccessKind, set: usize, tag: Tag) -> Replacement;

    fn handle_promotion_on_hit(&mut self, kind: AccessKind, set: usize, way: usize);

    fn handle_insertion_on_miss(&mut self, kind: AccessKind, set: usize, way: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicyKind {
    #[default]
    Lru,
    Random,
}

impl ReplacementPolicyKind {
    pub fn build(self, sets: usize, ways: usize, seed: u64) -> Box<dyn ReplacementPolicy> {
        match self {
            Self::Lru => Box::new(LruPolicy::new(sets, ways)),
            Self::Random => Box::new(RandomPolicy::new(ways, seed)),
        }
    }
}

/// Recency stack per set; the front is most recently used.
#[derive(Debug)]
pub struct LruPolicy {
    lru: Vec<Vec<usize>>,
}

impl LruPolicy {
    pub fn new(sets: usize, ways: usize) -> Self {
        let sets = sets.max(1);
        let ways = ways.max(1);
        let lru = (0..sets).map(|_| (0..ways).collect()).collect();
        Self { lru }
    }

    pub fn stack(&self, set: usize) -> &[usize] {
        &self.lru[set]
    }

    fn touch(&mut self, set: usize, way: usize) {
        let order = &mut self.lru[set];
        if let Some(pos) = order.iter().position(|&idx| idx == way) {
            order.remove(pos);
        }
        order.insert(0, way);
    }
}

impl ReplacementPolicy for LruPolicy {
    fn handle_replacement(&mut self, _kind: AccessKind, set: usize, _tag: Tag) -> Replacement {
        Replacement::Victim(*self.lru[set].last().unwrap_or(&0))
    }

    fn handle_promotion_on_hit(&mut self, _kind: AccessKind, set: usize, way: usize) {
        self.touch(set, way);
    }

    fn handle_insertion_on_miss(&mut self, _kind: AccessKind, set: usize, way: usize) {
        self.touch(set, way);
    }
}

#[derive(Debug)]
pub struct RandomPolicy {
    ways: usize,
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(ways: usize, seed: u64) -> Self {
        Self {
            ways: ways.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn handle_replacement(&mut self, _kind: AccessKind, _set: usize, _tag: Tag) -> Replacement {
        Replacement::Victim(self.rng.gen_range(0..self.ways))
    }

    fn handle_promotion_on_hit(&mut self, _kind: AccessKind, _set: usize, _way: usize) {}

    fn handle_insertion_on_miss(&mut self, _kind: AccessKind, _set: usize, _way: usize) {}
}
