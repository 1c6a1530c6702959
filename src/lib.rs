pub mod cache;
pub mod coherence;
pub mod hierarchy;
pub mod sim;
pub mod timeq;
pub mod traffic;
pub mod ui;
