use super::Tag;

/// Size, associativity and line size of a set-associative array, plus the derived shift/mask
/// values used to split addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    size: u64,
    associativity: usize,
    line_size: u32,
    line_size_log2: u32,
    num_sets: usize,
    num_lines: usize,
}

impl CacheGeometry {
    pub fn new(size: u64, associativity: usize, line_size: u32) -> Self {
        assert!(line_size.is_power_of_two(), "line_size must be a power of two");
        assert!(associativity > 0, "associativity must be > 0");
        let num_lines = (size / line_size as u64) as usize;
        let num_sets = num_lines / associativity;
        assert!(num_sets > 0, "cache must hold at least one set");
        Self {
            size,
            associativity,
            line_size,
            line_size_log2: line_size.trailing_zeros(),
            num_sets,
            num_lines,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn associativity(&self) -> usize {
        self.associativity
    }

    pub fn line_size(&self) -> u32 {
        self.line_size
    }

    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    pub fn num_lines(&self) -> usize {
        self.num_lines
    }

    pub fn displacement(&self, address: u64) -> u64 {
        address & (self.line_size as u64 - 1)
    }

    /// Line-aligned address; the tag stored in a line.
    pub fn tag(&self, address: u64) -> Tag {
        address & !(self.line_size as u64 - 1)
    }

    pub fn line_id(&self, address: u64) -> u64 {
        address >> self.line_size_log2
    }

    pub fn set(&self, address: u64) -> usize {
        (self.line_id(address) % self.num_sets as u64) as usize
    }

    pub fn is_aligned(&self, address: u64) -> bool {
        self.displacement(address) == 0
    }
}
