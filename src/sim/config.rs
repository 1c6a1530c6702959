use anyhow::{Context, Result};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

/// `[sim]` section.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub num_cores: usize,
    pub seed: u64,
    pub log_level: u64,
    pub timeout: u64,
    pub trace: bool,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .with_context(|| format!("cannot deserialize config section {}", value)),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_cores: 2,
            seed: 13,
            log_level: 0,
            timeout: 10000000,
            trace: false,
        }
    }
}
