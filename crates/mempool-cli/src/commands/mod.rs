//! Subcommand implementations

pub mod info;
pub mod list;
pub mod monitor;
pub mod run;

use anyhow::{Context, Result};
use mempool_bench::MemPoolApp;
use mempool_config::BenchConfig;
use mempool_gpu::SimDevice;
use std::sync::Arc;

/// Create the device described by `config.device` and the application on it
pub fn open_app(config: &BenchConfig) -> Result<MemPoolApp<SimDevice>> {
    let device = SimDevice::new(config.device.sim_config()).context("Failed to create device")?;
    MemPoolApp::new(Arc::new(device), config).context("Failed to initialize benchmark")
}

pub(crate) fn format_mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
}
