use anyhow::{bail, Result};
use serde::Deserialize;

use crate::cache::{CacheGeometry, ReplacementPolicyKind};
use crate::sim::config::Config;
use crate::timeq::Cycle;

/// Geometry and timing shared by every coherent cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub size: u64,
    pub associativity: usize,
    pub line_size: u32,
    pub hit_latency: Cycle,
    pub replacement: ReplacementPolicyKind,
}

impl CacheConfig {
    pub fn geometry(&self) -> CacheGeometry {
        CacheGeometry::new(self.size, self.associativity, self.line_size)
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.line_size.is_power_of_two() {
            bail!("{}: line_size {} is not a power of two", name, self.line_size);
        }
        if self.associativity == 0 {
            bail!("{}: associativity must be non-zero", name);
        }
        let line_size = self.line_size as u64;
        if self.size == 0 || self.size % line_size != 0 {
            bail!(
                "{}: size {} is not a non-zero multiple of line_size {}",
                name,
                self.size,
                self.line_size
            );
        }
        let lines = self.size / line_size;
        if lines % self.associativity as u64 != 0 {
            bail!(
                "{}: {} lines cannot be split into {}-way sets",
                name,
                lines,
                self.associativity
            );
        }
        if self.hit_latency == 0 {
            bail!("{}: hit_latency must be non-zero", name);
        }
        Ok(())
    }
}

/// `[l1]` section.  Ports bound the number of in-flight core accesses per kind.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FirstLevelCacheConfig {
    pub size: u64,
    pub associativity: usize,
    pub line_size: u32,
    pub hit_latency: Cycle,
    pub replacement: ReplacementPolicyKind,
    pub read_ports: usize,
    pub write_ports: usize,
}

impl FirstLevelCacheConfig {
    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            size: self.size,
            associativity: self.associativity,
            line_size: self.line_size,
            hit_latency: self.hit_latency,
            replacement: self.replacement,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.cache().validate("l1")?;
        if self.read_ports == 0 || self.write_ports == 0 {
            bail!("l1: read_ports and write_ports must be non-zero");
        }
        Ok(())
    }
}

impl Default for FirstLevelCacheConfig {
    fn default() -> Self {
        Self {
            size: 32 << 10,
            associativity: 4,
            line_size: 64,
            hit_latency: 1,
            replacement: ReplacementPolicyKind::Lru,
            read_ports: 2,
            write_ports: 1,
        }
    }
}

impl Config for FirstLevelCacheConfig {}

/// `[llc]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LastLevelCacheConfig {
    pub size: u64,
    pub associativity: usize,
    pub line_size: u32,
    pub hit_latency: Cycle,
    pub replacement: ReplacementPolicyKind,
}

impl LastLevelCacheConfig {
    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            size: self.size,
            associativity: self.associativity,
            line_size: self.line_size,
            hit_latency: self.hit_latency,
            replacement: self.replacement,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.cache().validate("llc")
    }
}

impl Default for LastLevelCacheConfig {
    fn default() -> Self {
        Self {
            size: 512 << 10,
            associativity: 8,
            line_size: 64,
            hit_latency: 10,
            replacement: ReplacementPolicyKind::Lru,
        }
    }
}

impl Config for LastLevelCacheConfig {}
