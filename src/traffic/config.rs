use anyhow::{ensure, Result};
use serde::Deserialize;

use crate::sim::config::Config;
use crate::traffic::patterns::PatternKind;

/// `[traffic]` section: the synthetic workload each core issues.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub accesses_per_core: usize,
    pub pattern: PatternKind,
    pub address: TrafficAddressConfig,
    pub mix: TrafficMixConfig,
    pub issue: TrafficIssueConfig,
    pub logging: TrafficLoggingConfig,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            accesses_per_core: 4096,
            pattern: PatternKind::Random,
            address: TrafficAddressConfig::default(),
            mix: TrafficMixConfig::default(),
            issue: TrafficIssueConfig::default(),
            logging: TrafficLoggingConfig::default(),
        }
    }
}

impl TrafficConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.address.footprint_bytes > 0,
            "traffic: footprint_bytes must be non-zero"
        );
        ensure!(
            (0.0..=1.0).contains(&self.address.shared_fraction),
            "traffic: shared_fraction must be within [0, 1]"
        );
        ensure!(
            self.mix.store_ratio >= 0.0
                && self.mix.ifetch_ratio >= 0.0
                && self.mix.store_ratio + self.mix.ifetch_ratio <= 1.0,
            "traffic: store_ratio + ifetch_ratio must be within [0, 1]"
        );
        ensure!(
            self.issue.max_outstanding_per_core > 0,
            "traffic: max_outstanding_per_core must be non-zero"
        );
        Ok(())
    }
}

/// Each core draws from a shared region and a private region of its own, both
/// `footprint_bytes` long.  Private regions follow the shared one back to back.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficAddressConfig {
    pub base: u64,
    pub footprint_bytes: u64,
    pub shared_fraction: f64,
    pub stride: u64,
}

impl Default for TrafficAddressConfig {
    fn default() -> Self {
        Self {
            base: 0x1000_0000,
            footprint_bytes: 64 << 10,
            shared_fraction: 0.5,
            stride: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficMixConfig {
    pub store_ratio: f64,
    pub ifetch_ratio: f64,
}

impl Default for TrafficMixConfig {
    fn default() -> Self {
        Self {
            store_ratio: 0.3,
            ifetch_ratio: 0.1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficIssueConfig {
    pub max_outstanding_per_core: usize,
}

impl Default for TrafficIssueConfig {
    fn default() -> Self {
        Self {
            max_outstanding_per_core: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficLoggingConfig {
    /// Log progress every this many completions per core; 0 disables.
    pub checkpoint_every: usize,
    pub results_json: Option<String>,
}

impl Default for TrafficLoggingConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 1024,
            results_json: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sections_default_independently() {
        let section: toml::Value = toml::from_str(
            "accesses_per_core = 10\npattern = \"strided\"\n[mix]\nstore_ratio = 0.5\n",
        )
        .unwrap();
        let config = TrafficConfig::from_section(Some(&section)).unwrap();
        assert_eq!(config.accesses_per_core, 10);
        assert_eq!(config.pattern, PatternKind::Strided);
        assert_eq!(config.mix.store_ratio, 0.5);
        assert_eq!(config.mix.ifetch_ratio, 0.1);
        assert_eq!(config.address.footprint_bytes, 64 << 10);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_impossible_mix() {
        let mut config = TrafficConfig::default();
        config.mix.store_ratio = 0.8;
        config.mix.ifetch_ratio = 0.5;
        assert!(config.validate().is_err());
    }
}
