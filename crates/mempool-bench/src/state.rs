//! Benchmark state machine
//!
//! Each configuration runs `warmup + measure` frames. The first tick applies
//! the configuration to the settings registry, warmup frames are discarded,
//! measured frames are stored, and the last measured frame averages them into
//! the configuration's result.

use crate::report::{BenchmarkReport, ReportRow};
use crate::sweep::BenchmarkConfig;
use crate::{BenchError, Result};
use mempool_config::{BenchmarkSection, SettingsRegistry, names, split_input_size};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Timings of one measured frame, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSample {
    pub compute_ms: f64,
    pub update_ms: f64,
    pub read_ms: f64,
}

/// Average of a configuration's measured samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub compute_ms: f64,
    pub update_ms: f64,
    pub read_ms: f64,
}

impl BenchmarkResult {
    pub fn average(samples: &[BenchmarkSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let sum = samples.iter().fold(Self::default(), |acc, s| Self {
            compute_ms: acc.compute_ms + s.compute_ms,
            update_ms: acc.update_ms + s.update_ms,
            read_ms: acc.read_ms + s.read_ms,
        });
        Self {
            compute_ms: sum.compute_ms / n,
            update_ms: sum.update_ms / n,
            read_ms: sum.read_ms / n,
        }
    }
}

/// Warmup and measurement window lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProtocol {
    pub warmup_frames: u32,
    pub measure_frames: u32,
}

impl FrameProtocol {
    pub const fn total_frames(&self) -> u32 {
        self.warmup_frames + self.measure_frames
    }
}

impl Default for FrameProtocol {
    fn default() -> Self {
        Self::from(&BenchmarkSection::default())
    }
}

impl From<&BenchmarkSection> for FrameProtocol {
    fn from(section: &BenchmarkSection) -> Self {
        Self {
            warmup_frames: section.warmup_frames,
            measure_frames: section.measure_frames,
        }
    }
}

/// Where the sweep is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchState {
    Idle,
    WarmingUp { config: usize, frame: u32 },
    Measuring { config: usize, frame: u32 },
    /// The next tick applies configuration `config`
    Applying { config: usize },
}

/// What a tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No sweep in progress
    Idle,
    /// Configuration `index` was written to the registry
    Applied { index: usize },
    /// Warmup frame, sample discarded
    WarmedUp,
    /// Sample stored
    Sampled,
    /// Configuration `index` finished, more remain
    Completed { index: usize },
    /// Every configuration finished; the report is ready
    Finished,
}

/// Drives the sweep one frame at a time
#[derive(Debug)]
pub struct BenchmarkRunner {
    protocol: FrameProtocol,
    configs: Vec<BenchmarkConfig>,
    results: Vec<BenchmarkResult>,
    samples: Vec<BenchmarkSample>,
    config_idx: usize,
    frame_idx: u32,
}

impl BenchmarkRunner {
    pub fn new(protocol: FrameProtocol, configs: Vec<BenchmarkConfig>) -> Self {
        let config_idx = configs.len();
        Self {
            protocol,
            samples: vec![BenchmarkSample::default(); protocol.measure_frames as usize],
            results: Vec::new(),
            configs,
            config_idx,
            frame_idx: protocol.total_frames(),
        }
    }

    /// Restart the sweep at the first configuration
    pub fn start(&mut self) -> Result<()> {
        if self.configs.is_empty() {
            return Err(BenchError::InvalidOperation(
                "no benchmark configuration is valid on this device".into(),
            ));
        }
        if self.protocol.measure_frames == 0 {
            return Err(BenchError::InvalidOperation(
                "benchmark needs at least one measured frame".into(),
            ));
        }

        self.results = vec![BenchmarkResult::default(); self.configs.len()];
        self.config_idx = 0;
        self.frame_idx = self.protocol.total_frames();
        info!("Starting benchmark over {} configurations", self.configs.len());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.config_idx < self.configs.len()
    }

    pub fn state(&self) -> BenchState {
        if !self.is_running() {
            BenchState::Idle
        } else if self.frame_idx >= self.protocol.total_frames() {
            BenchState::Applying {
                config: self.config_idx,
            }
        } else if self.frame_idx < self.protocol.warmup_frames {
            BenchState::WarmingUp {
                config: self.config_idx,
                frame: self.frame_idx,
            }
        } else {
            BenchState::Measuring {
                config: self.config_idx,
                frame: self.frame_idx - self.protocol.warmup_frames,
            }
        }
    }

    /// `(current configuration, total)`, zero-based
    pub fn progress(&self) -> (usize, usize) {
        (self.config_idx, self.configs.len())
    }

    pub fn protocol(&self) -> FrameProtocol {
        self.protocol
    }

    pub fn configs(&self) -> &[BenchmarkConfig] {
        &self.configs
    }

    pub fn current_config(&self) -> Option<&BenchmarkConfig> {
        self.configs.get(self.config_idx)
    }

    /// Advance one frame
    ///
    /// `sample` holds the timings of the frame that just completed; it is
    /// only stored while measuring.
    pub fn tick(
        &mut self,
        registry: &mut SettingsRegistry,
        sample: BenchmarkSample,
    ) -> Result<TickOutcome> {
        if !self.is_running() {
            return Ok(TickOutcome::Idle);
        }

        let total = self.protocol.total_frames();
        if self.frame_idx >= total {
            let index = self.config_idx;
            apply_config(registry, &self.configs[index])?;
            self.frame_idx = 0;
            debug!("Applied benchmark configuration {}: {:?}", index, self.configs[index]);
            return Ok(TickOutcome::Applied { index });
        }

        let warmup = self.protocol.warmup_frames;
        let measuring = self.frame_idx >= warmup;
        if measuring {
            self.samples[(self.frame_idx - warmup) as usize] = sample;
        }
        self.frame_idx += 1;

        if self.frame_idx < total {
            return Ok(if measuring {
                TickOutcome::Sampled
            } else {
                TickOutcome::WarmedUp
            });
        }

        let index = self.config_idx;
        let result = BenchmarkResult::average(&self.samples);
        self.results[index] = result;
        self.config_idx += 1;
        info!(
            "Benchmark {} of {}: compute {:.4} ms, update {:.4} ms, read {:.4} ms",
            index + 1,
            self.configs.len(),
            result.compute_ms,
            result.update_ms,
            result.read_ms
        );

        if self.is_running() {
            Ok(TickOutcome::Completed { index })
        } else {
            Ok(TickOutcome::Finished)
        }
    }

    /// Rows for every configuration finished so far
    pub fn report(&self) -> BenchmarkReport {
        let finished = self.results.len().min(self.config_idx);
        BenchmarkReport::new(
            self.configs
                .iter()
                .zip(&self.results)
                .take(finished)
                .map(|(config, result)| ReportRow::new(*config, *result))
                .collect(),
        )
    }
}

/// Write a configuration into the registry and switch vsync off
fn apply_config(registry: &mut SettingsRegistry, config: &BenchmarkConfig) -> Result<()> {
    use names::*;

    registry.set_enum(HEAP_TYPE, config.heap_type)?;
    registry.set_enum(CPU_PAGE_PROPERTY, config.cpu_page_property)?;
    registry.set_enum(MEMORY_POOL, config.memory_pool)?;
    registry.set_enum(INPUT_BUFFER_TYPE, config.input_buffer_type)?;
    registry.set_int(NUM_THREAD_GROUPS, i64::from(config.num_thread_groups))?;

    let (mb, kb, bytes) = split_input_size(config.input_buffer_size);
    registry.set_int(INPUT_BUFFER_SIZE_MB, mb)?;
    registry.set_int(INPUT_BUFFER_SIZE_KB, kb)?;
    registry.set_int(INPUT_BUFFER_SIZE_BYTES, bytes)?;

    registry.set_int(ELEMS_PER_THREAD, i64::from(config.elems_per_thread))?;
    registry.set_int(THREAD_ELEM_STRIDE, i64::from(config.thread_elem_stride))?;
    registry.set_int(GROUP_ELEM_OFFSET, i64::from(config.group_elem_offset))?;
    registry.set_int(THREAD_ELEM_OFFSET, i64::from(config.thread_elem_offset))?;
    registry.set_bool(ENABLE_VSYNC, false)?;
    Ok(())
}
