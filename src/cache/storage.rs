use log::trace;

use super::{AccessKind, CacheAccess, CacheGeometry, CacheLine, Replacement, ReplacementPolicy};

/// Set-associative array of lockable lines.  `W` identifies whoever may queue on a busy line.
#[derive(Debug)]
pub struct LockableCache<W> {
    name: String,
    geometry: CacheGeometry,
    sets: Vec<Vec<CacheLine<W>>>,
    policy: Box<dyn ReplacementPolicy>,
}

impl<W> LockableCache<W> {
    pub fn new(name: &str, geometry: CacheGeometry, policy: Box<dyn ReplacementPolicy>) -> Self {
        let sets = (0..geometry.num_sets())
            .map(|set| {
                (0..geometry.associativity())
                    .map(|way| CacheLine::new(set, way))
                    .collect()
            })
            .collect();
        Self {
            name: name.to_string(),
            geometry,
            sets,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    pub fn line_size(&self) -> u32 {
        self.geometry.line_size()
    }

    pub fn line(&self, set: usize, way: usize) -> &CacheLine<W> {
        &self.sets[set][way]
    }

    pub fn line_mut(&mut self, set: usize, way: usize) -> &mut CacheLine<W> {
        &mut self.sets[set][way]
    }

    pub fn lines(&self) -> impl Iterator<Item = &CacheLine<W>> {
        self.sets.iter().flatten()
    }

    pub fn find_way(&self, address: u64) -> Option<usize> {
        let tag = self.geometry.tag(address);
        let set = self.geometry.set(address);
        self.sets[set].iter().position(|line| line.matches(tag))
    }

    pub fn find_line(&self, address: u64) -> Option<&CacheLine<W>> {
        let set = self.geometry.set(address);
        self.find_way(address).map(|way| &self.sets[set][way])
    }

    /// Look `tag` up and decide where the access lands.  Nothing is modified until `commit`.
    pub fn new_access(&mut self, kind: AccessKind, address: u64) -> CacheAccess {
        let tag = self.geometry.tag(address);
        let set = self.geometry.set(address);

        if let Some(way) = self.find_way(address) {
            return CacheAccess {
                kind,
                tag,
                set,
                way: Some(way),
                hit: true,
                eviction: false,
                victim_tag: None,
            };
        }

        let free = self.sets[set]
            .iter()
            .position(|line| !line.state().is_valid() && !line.is_locked());
        let way = match free {
            Some(way) => Some(way),
            None => match self.policy.handle_replacement(kind, set, tag) {
                Replacement::Victim(way) => Some(way),
                Replacement::Bypass => None,
            },
        };

        let victim = way.map(|way| &self.sets[set][way]);
        let eviction = victim.map_or(false, |line| line.state().is_valid());
        CacheAccess {
            kind,
            tag,
            set,
            way,
            hit: false,
            eviction,
            victim_tag: victim.and_then(|line| line.tag()).filter(|_| eviction),
        }
    }

    /// Make a finished access visible: hits refresh recency, fills install their tag.
    pub fn commit(&mut self, access: &CacheAccess) {
        let Some(way) = access.way else {
            return;
        };
        if access.hit {
            self.policy.handle_promotion_on_hit(access.kind, access.set, way);
        } else {
            self.sets[access.set][way].set_tag(access.tag);
            self.policy.handle_insertion_on_miss(access.kind, access.set, way);
        }
        trace!("{}: commit {}", self.name, access);
    }
}
