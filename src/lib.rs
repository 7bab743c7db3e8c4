pub mod agent;
pub mod config;
pub mod helpers;
pub mod logger;
pub mod runner;
pub mod telemetry;
