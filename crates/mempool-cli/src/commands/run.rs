//! run command - execute the configuration sweep

use super::open_app;
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use mempool_bench::AppCommand;
use mempool_config::{BenchConfig, names};
use mempool_gpu::GpuDevice;
use std::path::Path;
use std::time::Instant;

/// Execute the run command
///
/// Applies every enumerated configuration in turn, samples it over the
/// configured frame window and writes one CSV row per configuration.
pub fn execute(config: &BenchConfig, output: Option<&Path>, print: bool) -> Result<()> {
    let mut app = open_app(config)?;
    if let Some(output) = output {
        let name = output
            .to_str()
            .with_context(|| format!("Report path {} is not valid UTF-8", output.display()))?;
        app.handle(AppCommand::SetReportName(name.to_string()))
            .context("Invalid report path")?;
    }
    let report_path = app.registry().text(names::BENCHMARK_CSV_NAME)?.to_string();

    let total = app.runner().configs().len();
    println!("{} - Memory Pool Benchmark", style("mempool").cyan().bold());
    println!("{}", "=".repeat(60));
    println!("  Adapter:         {}", app.device().adapter_info().name);
    println!("  Configurations:  {}", total);
    println!(
        "  Frames each:     {} warmup + {} measured",
        config.benchmark.warmup_frames, config.benchmark.measure_frames
    );
    println!("  Report:          {}", report_path);
    println!();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) | {msg}",
        )
        .context("Invalid progress template")?
        .progress_chars("#>-"),
    );

    let start = Instant::now();
    let report = app.run_benchmark(|current, total| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
        if let Some(next) = progress_message(current, total) {
            pb.set_message(next);
        }
    });
    pb.finish_and_clear();
    let report = report.context("Benchmark failed")?;
    let elapsed = start.elapsed();

    println!(
        "{} {} configurations in {:.2}s",
        style("Completed").green().bold(),
        report.rows().len(),
        elapsed.as_secs_f64()
    );

    if let Some(best) = report
        .rows()
        .iter()
        .max_by(|a, b| a.bandwidth().total_cmp(&b.bandwidth()))
    {
        println!(
            "  Peak bandwidth:  {:.2} MB/s ({}, {}, {}, {})",
            best.bandwidth(),
            best.config.heap_type,
            best.config.cpu_page_property,
            best.config.memory_pool,
            best.config.input_buffer_type
        );
    }
    println!("  Report written:  {}", style(&report_path).yellow());

    if print {
        println!();
        print!("{}", report.to_csv());
    }

    app.shutdown()?;
    Ok(())
}

fn progress_message(current: usize, total: usize) -> Option<String> {
    (current < total).then(|| format!("Running benchmark {} of {}", current, total))
}
