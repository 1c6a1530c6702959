use log::info;

use crate::timeq::Cycle;

pub struct TrafficLogger;

impl TrafficLogger {
    pub fn log_checkpoint(core_id: usize, completed: usize, total: usize, cycle: Cycle) {
        info!(
            "[TRAFFIC] core {} completed {}/{} at cycle {:>10}",
            core_id, completed, total, cycle
        );
    }

    pub fn log_core_done(core_id: usize, cycle: Cycle) {
        info!("[TRAFFIC] core {} all done at cycle {}", core_id, cycle);
    }
}
