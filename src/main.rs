use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use std::fs;

use mesisim::sim::top::Sim;
use mesisim::ui::{parse_configs, MesiSimArgs};

fn init_logger(log_level: u64) {
    let mut builder = env_logger::Builder::from_default_env();
    // RUST_LOG wins unless a level was asked for explicitly
    match log_level {
        0 => {}
        1 => {
            builder.filter_level(LevelFilter::Info);
        }
        _ => {
            builder.filter_level(LevelFilter::Debug);
        }
    }
    builder.init();
}

pub fn main() -> Result<()> {
    let argv = MesiSimArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;

    let configs = parse_configs(&config, Some(&argv))?;
    init_logger(configs.sim.log_level);

    let mut sim = Sim::new(configs.sim, configs.hierarchy, configs.traffic.clone())?;
    let report = sim.simulate()?;

    let l1 = &report.hierarchy.l1_total;
    let llc = &report.hierarchy.llc;
    println!(
        "{} cores, {} accesses in {} cycles (average latency {:.2}, max {})",
        report.num_cores,
        report.traffic.completed,
        report.cycles,
        report.average_latency,
        report.traffic.max_latency
    );
    println!(
        "l1: {} hits, {} misses, hit ratio {:.3}; llc: {} hits, {} misses, hit ratio {:.3}",
        l1.hits(),
        l1.misses(),
        l1.hit_ratio(),
        llc.hits(),
        llc.misses(),
        llc.hit_ratio()
    );
    println!(
        "memory: {} reads, {} writes",
        report.hierarchy.memory.reads(),
        report.hierarchy.memory.writes()
    );

    let results_json = argv
        .results_json
        .clone()
        .or_else(|| configs.traffic.logging.results_json.clone().map(Into::into));
    if let Some(path) = results_json {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write results to {}", path.display()))?;
        println!("results written to {}", path.display());
    }
    Ok(())
}
