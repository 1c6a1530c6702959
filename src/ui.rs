use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use toml::Table;

use crate::coherence::{FirstLevelCacheConfig, LastLevelCacheConfig};
use crate::hierarchy::{HierarchyConfig, MemConfig, NetConfig};
use crate::sim::config::{Config, SimConfig};
use crate::sim::top::Sim;
use crate::traffic::TrafficConfig;

#[derive(Parser)]
#[command(version, about)]
pub struct MesiSimArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: PathBuf,
    #[arg(long, help = "Override number of cores")]
    pub num_cores: Option<usize>,
    #[arg(long, help = "Override random seed")]
    pub seed: Option<u64>,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    pub log: Option<u64>,
    #[arg(long, help = "Override number of accesses per core")]
    pub accesses: Option<usize>,
    #[arg(long, help = "Write results as JSON to this path")]
    pub results_json: Option<PathBuf>,
}

/// Everything read from the TOML file, after CLI overrides.
#[derive(Debug, Clone)]
pub struct SimConfigs {
    pub sim: SimConfig,
    pub hierarchy: HierarchyConfig,
    pub traffic: TrafficConfig,
}

pub fn parse_configs(toml_string: &str, cli_args: Option<&MesiSimArgs>) -> Result<SimConfigs> {
    let config_table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
    let section = |name: &str| config_table.get(name);
    let mut sim = SimConfig::from_section(section("sim"))?;
    let l1 = FirstLevelCacheConfig::from_section(section("l1"))?;
    let llc = LastLevelCacheConfig::from_section(section("llc"))?;
    let net = NetConfig::from_section(section("net"))?;
    let mem = MemConfig::from_section(section("mem"))?;
    let mut traffic = TrafficConfig::from_section(section("traffic"))?;

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        sim.log_level = args.log.unwrap_or(sim.log_level);
        sim.num_cores = args.num_cores.unwrap_or(sim.num_cores);
        sim.seed = args.seed.unwrap_or(sim.seed);
        traffic.accesses_per_core = args.accesses.unwrap_or(traffic.accesses_per_core);
    }

    let hierarchy = HierarchyConfig {
        num_cores: sim.num_cores,
        seed: sim.seed,
        trace: sim.trace,
        l1,
        llc,
        net,
        mem,
    };
    Ok(SimConfigs {
        sim,
        hierarchy,
        traffic,
    })
}

/// Make a Sim object from the TOML configuration.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn make_sim(toml_string: &str, cli_args: Option<&MesiSimArgs>) -> Result<Sim> {
    let configs = parse_configs(toml_string, cli_args)?;
    Sim::new(configs.sim, configs.hierarchy, configs.traffic)
}
