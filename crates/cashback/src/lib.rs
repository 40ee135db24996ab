pub mod config;
pub mod error;
pub mod rewards;
pub mod telemetry;
