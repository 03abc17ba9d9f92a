//! list command - show the sweep for the configured device

use super::format_mib;
use anyhow::{Context, Result};
use mempool_bench::{check_capabilities, enumerate};
use mempool_config::BenchConfig;
use mempool_gpu::{GpuDevice, SimDevice};

/// Execute the list command
pub fn execute(config: &BenchConfig) -> Result<()> {
    let device = SimDevice::new(config.device.sim_config()).context("Failed to create device")?;
    let caps = check_capabilities(device.adapter_info())?;
    let configs = enumerate(&config.sweep, &caps);

    println!("Benchmark Configurations");
    println!("{}", "=".repeat(60));
    println!();

    for (i, c) in configs.iter().enumerate() {
        println!(
            "{:>4}  {:<10} {:<30} {:<12} {:<10} groups {:<6} {:>10}  elems {} stride {} offsets {}/{}",
            i,
            c.heap_type.label(),
            c.cpu_page_property.label(),
            c.memory_pool.label(),
            c.input_buffer_type,
            c.num_thread_groups,
            format_mib(c.input_buffer_size),
            c.elems_per_thread,
            c.thread_elem_stride,
            c.group_elem_offset,
            c.thread_elem_offset
        );
    }

    println!();
    println!("{} configurations", configs.len());
    let frames = u64::from(config.benchmark.total_frames()) * configs.len() as u64;
    println!("{} frames total", frames);
    Ok(())
}
