//! Configuration and terminal rendering for the `run-monitor` binary.
pub mod config;
pub mod render;
