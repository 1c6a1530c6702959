pub mod config;
pub mod driver;
pub mod logging;
pub mod patterns;

pub use config::TrafficConfig;
pub use driver::{TrafficDriver, TrafficStats};
pub use patterns::{PatternEngine, PatternKind, TrafficAccess};
