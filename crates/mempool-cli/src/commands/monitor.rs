//! monitor command - run frames interactively and show the test information

use super::open_app;
use crate::parse_setting;
use anyhow::{Context, Result};
use mempool_bench::AppCommand;
use mempool_config::BenchConfig;
use tracing::debug;

/// Execute the monitor command
///
/// Applies each `NAME=VALUE` override, runs `frames` frames and prints the
/// same test information the on-screen overlay shows.
pub fn execute(config: &BenchConfig, frames: u32, overrides: &[String]) -> Result<()> {
    let mut app = open_app(config)?;

    for text in overrides {
        let (name, value) = parse_setting(text)?;
        app.registry_mut()
            .set_from_str(name, value)
            .with_context(|| format!("Cannot set {}", name))?;
        debug!(setting = name, value, "Applied override");
    }

    for _ in 0..frames {
        app.frame()?;
    }

    println!("Settings");
    println!("{}", "-".repeat(60));
    for setting in app.registry().iter().filter(|s| s.is_visible()) {
        println!("  {:<28} {}", setting.label(), setting.display_value());
    }
    println!();

    if let Some(info) = app.handle(AppCommand::CopyTestInfo)? {
        println!("Test Information");
        println!("{}", "-".repeat(60));
        println!("{}", info);
    }

    app.shutdown()?;
    Ok(())
}
