//! info command - display adapter capabilities
//!
//! Shows the adapter the benchmark would run on, the capability check
//! result and the current memory budgets.

use super::format_mib;
use anyhow::{Context, Result};
use console::style;
use mempool_bench::check_capabilities;
use mempool_config::BenchConfig;
use mempool_gpu::{GpuDevice, SimDevice};

/// Execute the info command
pub fn execute(config: &BenchConfig) -> Result<()> {
    let device = SimDevice::new(config.device.sim_config()).context("Failed to create device")?;
    let info = device.adapter_info();

    println!("mempool - Adapter Information");
    println!("{}", "=".repeat(60));
    println!();

    println!("Adapter");
    println!("{}", "-".repeat(60));
    println!("  Name:                {}", info.name);
    println!("  UMA:                 {}", yes_no(info.architecture.uma));
    println!("  Cache-coherent UMA:  {}", yes_no(info.architecture.cache_coherent_uma));
    println!("  GPU upload heaps:    {}", yes_no(info.gpu_upload_heap_supported));
    println!("  Enhanced barriers:   {}", yes_no(info.enhanced_barriers_supported));
    println!("  Shader model:        {}.{}", info.shader_model.0, info.shader_model.1);
    println!("  Descriptor slots:    {}", info.descriptor_capacity);
    println!();

    println!("Memory");
    println!("{}", "-".repeat(60));
    let budget = device.memory_budget();
    println!(
        "  Local:               {} / {}",
        format_mib(budget.local_usage),
        format_mib(budget.local_budget)
    );
    println!(
        "  Non-local:           {} / {}",
        format_mib(budget.non_local_usage),
        format_mib(budget.non_local_budget)
    );
    println!();

    println!("Capabilities");
    println!("{}", "-".repeat(60));
    match check_capabilities(info) {
        Ok(_) => println!("  {}", style("Supported").green()),
        Err(e) => println!("  {} {}", style("Unsupported:").yellow(), e),
    }

    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}
