use std::collections::BTreeSet;

use crate::cache::{CacheGeometry, Tag};

/// The last-level cache's view of one first-level cache: which tags it holds, per set.
#[derive(Debug, Clone)]
pub struct ShadowTagDirectory {
    geometry: CacheGeometry,
    sets: Vec<BTreeSet<Tag>>,
}

impl ShadowTagDirectory {
    /// `geometry` is that of the first-level cache being shadowed.
    pub fn new(geometry: CacheGeometry) -> Self {
        Self {
            geometry,
            sets: vec![BTreeSet::new(); geometry.num_sets()],
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.sets[self.geometry.set(address)].contains(&self.geometry.tag(address))
    }

    pub fn add(&mut self, address: u64) {
        let set = self.geometry.set(address);
        self.sets[set].insert(self.geometry.tag(address));
    }

    pub fn remove(&mut self, address: u64) {
        let set = self.geometry.set(address);
        self.sets[set].remove(&self.geometry.tag(address));
    }

    pub fn len(&self) -> usize {
        self.sets.iter().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(BTreeSet::is_empty)
    }

    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.sets.iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_tags_per_set() {
        let mut directory = ShadowTagDirectory::new(CacheGeometry::new(1024, 2, 64));
        assert!(directory.is_empty());
        directory.add(0x1008);
        directory.add(0x1208);
        assert!(directory.contains(0x1000));
        assert!(directory.contains(0x123f));
        assert!(!directory.contains(0x1040));
        assert_eq!(directory.len(), 2);

        directory.remove(0x1010);
        assert!(!directory.contains(0x1000));
        assert_eq!(directory.tags().collect::<Vec<_>>(), vec![0x1200]);
    }
}
