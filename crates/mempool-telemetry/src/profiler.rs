//! Named CPU and GPU timing profiler
//!
//! Every scope name owns a rolling window of the last [`FILTER_SIZE`]
//! samples. CPU samples come from [`CpuProfileGuard`]s; GPU samples are
//! pushed in by the frame loop as the device resolves timestamp queries,
//! which happens a render latency after the work was recorded.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Number of samples averaged per scope
pub const FILTER_SIZE: usize = 64;

/// Rolling window of millisecond samples
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: [f64; FILTER_SIZE],
    next: usize,
    filled: usize,
    latest: f64,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self {
            samples: [0.0; FILTER_SIZE],
            next: 0,
            filled: 0,
            latest: 0.0,
        }
    }
}

impl SampleWindow {
    /// Push a sample, evicting the oldest once the window is full
    pub fn record(&mut self, milliseconds: f64) {
        self.samples[self.next] = milliseconds;
        self.next = (self.next + 1) % FILTER_SIZE;
        self.filled = (self.filled + 1).min(FILTER_SIZE);
        self.latest = milliseconds;
    }

    /// Most recent sample
    pub fn latest(&self) -> f64 {
        self.latest
    }

    /// Mean of the samples in the window, 0 when empty
    pub fn average(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        self.window().iter().sum::<f64>() / self.filled as f64
    }

    /// Largest sample in the window
    pub fn max(&self) -> f64 {
        self.window().iter().copied().fold(0.0, f64::max)
    }

    /// Number of samples in the window
    pub fn count(&self) -> usize {
        self.filled
    }

    fn window(&self) -> &[f64] {
        // Until the window wraps, the filled samples are the prefix
        &self.samples[..self.filled]
    }
}

/// Which clock a scope measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// Host wall-clock time
    Cpu,
    /// Device timestamp queries
    Gpu,
}

/// Snapshot of one scope
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    pub name: &'static str,
    pub kind: ProfileKind,
    pub latest_ms: f64,
    pub average_ms: f64,
    pub max_ms: f64,
}

/// Profiler keyed by stable scope names
#[derive(Debug, Default)]
pub struct Profiler {
    cpu: RwLock<HashMap<&'static str, SampleWindow>>,
    gpu: RwLock<HashMap<&'static str, SampleWindow>>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing a CPU scope; the sample is recorded when the guard drops
    pub fn start_cpu(&self, name: &'static str) -> CpuProfileGuard<'_> {
        CpuProfileGuard {
            profiler: self,
            name,
            start: Instant::now(),
            stopped: false,
        }
    }

    pub fn record_cpu(&self, name: &'static str, milliseconds: f64) {
        self.cpu.write().entry(name).or_default().record(milliseconds);
    }

    /// Record a resolved GPU timestamp pair
    pub fn record_gpu(&self, name: &'static str, milliseconds: f64) {
        self.gpu.write().entry(name).or_default().record(milliseconds);
    }

    pub fn avg_cpu_time(&self, name: &str) -> f64 {
        self.cpu.read().get(name).map_or(0.0, SampleWindow::average)
    }

    pub fn avg_gpu_time(&self, name: &str) -> f64 {
        self.gpu.read().get(name).map_or(0.0, SampleWindow::average)
    }

    pub fn latest_cpu_time(&self, name: &str) -> f64 {
        self.cpu.read().get(name).map_or(0.0, SampleWindow::latest)
    }

    pub fn latest_gpu_time(&self, name: &str) -> f64 {
        self.gpu.read().get(name).map_or(0.0, SampleWindow::latest)
    }

    /// Drop every window
    pub fn reset(&self) {
        self.cpu.write().clear();
        self.gpu.write().clear();
    }

    /// All scopes sorted by kind, then name
    pub fn snapshot(&self) -> Vec<ProfileEntry> {
        let collect = |kind: ProfileKind, map: &HashMap<&'static str, SampleWindow>| {
            map.iter()
                .map(|(name, window)| ProfileEntry {
                    name,
                    kind,
                    latest_ms: window.latest(),
                    average_ms: window.average(),
                    max_ms: window.max(),
                })
                .collect::<Vec<_>>()
        };

        let mut entries = collect(ProfileKind::Cpu, &self.cpu.read());
        entries.extend(collect(ProfileKind::Gpu, &self.gpu.read()));
        entries.sort_by(|a, b| {
            (a.kind == ProfileKind::Gpu, a.name).cmp(&(b.kind == ProfileKind::Gpu, b.name))
        });
        entries
    }
}

/// RAII guard for a CPU scope
#[must_use = "the scope is timed until the guard is dropped"]
pub struct CpuProfileGuard<'a> {
    profiler: &'a Profiler,
    name: &'static str,
    start: Instant,
    stopped: bool,
}

impl CpuProfileGuard<'_> {
    /// End the scope now and return its duration
    pub fn stop(mut self) -> Duration {
        self.stopped = true;
        let duration = self.start.elapsed();
        self.profiler
            .record_cpu(self.name, duration.as_secs_f64() * 1000.0);
        duration
    }
}

impl Drop for CpuProfileGuard<'_> {
    fn drop(&mut self) {
        if !self.stopped {
            let duration = self.start.elapsed();
            self.profiler
                .record_cpu(self.name, duration.as_secs_f64() * 1000.0);
        }
    }
}
