#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::float_cmp)]

//! Benchmark core for GPU memory pool read performance
//!
//! This crate provides:
//! - Capability checks and resource provisioning per heap configuration
//! - Compute job compilation from the live work shape
//! - Per-frame upload paths and the read kernel dispatch
//! - The configuration sweep, its frame-driven state machine and CSV report
//! - Background upload traffic on the copy queue
//! - `MemPoolApp`, the frame loop that ties them together
//!
//! # Example
//!
//! ```no_run
//! use mempool_bench::MemPoolApp;
//! use mempool_config::BenchConfig;
//! use mempool_gpu::{SimDevice, SimDeviceConfig};
//! use std::sync::Arc;
//!
//! let config = BenchConfig::default();
//! let device = Arc::new(SimDevice::new(config.device.sim_config())?);
//! let mut app = MemPoolApp::new(device, &config)?;
//! let report = app.run_benchmark(|current, total| println!("{current}/{total}"))?;
//! println!("{}", report.to_csv());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod app;
pub mod caps;
pub mod driver;
pub mod error;
pub mod hud;
pub mod provision;
pub mod report;
pub mod ring;
pub mod state;
pub mod streaming;
pub mod sweep;
pub mod workload;

pub use app::MemPoolApp;
pub use caps::{DeviceCaps, check_capabilities};
pub use driver::UploadStrategy;
pub use error::{BenchError, Result};
pub use hud::{AppCommand, HudSnapshot};
pub use provision::{BufferSet, InputLayout, ProvisionRequest};
pub use report::{BenchmarkReport, CSV_COLUMNS, ReportRow, effective_bandwidth};
pub use state::{BenchState, BenchmarkResult, BenchmarkRunner, BenchmarkSample, FrameProtocol, TickOutcome};
pub use streaming::BackgroundStreamer;
pub use sweep::{BenchmarkConfig, enumerate};
pub use workload::{COMPUTE_JOB, WorkloadCompiler, compile_options};
