//! Test information panel and user commands

use crate::report::effective_bandwidth;
use mempool_gpu::{CpuPageProperty, HeapType, MemoryBudget, MemoryPool};
use std::fmt;

const MIB: f64 = 1024.0 * 1024.0;

/// Requests from the user interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// Restart the sweep at the first configuration
    StartBenchmark,
    /// Text of the last written report
    CopyReport,
    /// Text of the test information panel
    CopyTestInfo,
    /// Change the report file name
    SetReportName(String),
}

/// Everything the test information panel shows for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct HudSnapshot {
    pub adapter: String,
    pub uma: bool,
    pub cache_coherent_uma: bool,
    pub memory: MemoryBudget,
    pub heap_type: HeapType,
    pub cpu_writable: bool,
    /// Page property after platform resolution
    pub cpu_page_property: CpuPageProperty,
    /// Memory pool after platform resolution
    pub memory_pool: MemoryPool,
    pub input_buffer_size: u64,
    pub num_input_elems: u64,
    pub bytes_read: u64,
    pub unique_bytes_read: u64,
    pub total_threads: u64,
    pub frame_ms: f64,
    pub compute_ms: f64,
    pub update_ms: f64,
    /// Present only while reading the mapped input back
    pub read_ms: Option<f64>,
    /// `(current, total)` while a sweep runs
    pub benchmark_progress: Option<(usize, usize)>,
}

impl HudSnapshot {
    pub fn bandwidth(&self) -> f64 {
        effective_bandwidth(self.bytes_read, self.compute_ms)
    }

    pub fn progress_line(&self) -> Option<String> {
        self.benchmark_progress
            .map(|(current, total)| format!("Running benchmark {current} of {total}"))
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

/// Byte count scaled to MB, KB or B
struct Bytes(u64);

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes >= 1024 * 1024 {
            write!(f, "{:.2} MB", bytes as f64 / MIB)
        } else if bytes >= 1024 {
            write!(f, "{:.2} KB", bytes as f64 / 1024.0)
        } else {
            write!(f, "{bytes} B")
        }
    }
}

impl fmt::Display for HudSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.memory;
        writeln!(f, "Adapter: {}", self.adapter)?;
        writeln!(f, "UMA: {}", yes_no(self.uma))?;
        writeln!(f, "Cache-Coherent UMA: {}", yes_no(self.cache_coherent_uma))?;
        writeln!(
            f,
            "Local Memory Usage: {:.2} / {:.2} MB",
            m.local_usage as f64 / MIB,
            m.local_budget as f64 / MIB
        )?;
        writeln!(
            f,
            "Non-Local Memory Usage: {:.2} / {:.2} MB",
            m.non_local_usage as f64 / MIB,
            m.non_local_budget as f64 / MIB
        )?;
        writeln!(f)?;

        writeln!(f, "Heap Type: {}", self.heap_type)?;
        writeln!(f, "CPU-Writable Heap: {}", yes_no(self.cpu_writable))?;
        writeln!(f, "Heap CPUPageProperty: {}", self.cpu_page_property)?;
        writeln!(f, "Heap MemoryPoolPreference: {}", self.memory_pool)?;
        writeln!(f)?;

        writeln!(f, "Input Buffer Size: {}", Bytes(self.input_buffer_size))?;
        writeln!(f, "Input Buffer Elements: {}", self.num_input_elems)?;
        writeln!(f, "Total Bytes Read: {}", Bytes(self.bytes_read))?;
        writeln!(f, "Unique Bytes Read: {}", Bytes(self.unique_bytes_read))?;
        writeln!(f, "Total Num Threads: {}", self.total_threads)?;
        writeln!(f)?;

        writeln!(f, "Total Frame Time: {:.2} ms", self.frame_ms)?;
        writeln!(f, "GPU Time Reading Buffer: {:.2} ms", self.compute_ms)?;
        writeln!(f, "CPU Time Updating Buffer: {:.2} ms", self.update_ms)?;
        if let Some(read_ms) = self.read_ms {
            writeln!(f, "CPU Time Reading Buffer: {:.2} ms", read_ms)?;
        }
        writeln!(f, "Max Effective Bandwidth: {:.2} MB/s", self.bandwidth())?;

        if let Some(line) = self.progress_line() {
            writeln!(f)?;
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> HudSnapshot {
        HudSnapshot {
            adapter: "Test Adapter".into(),
            uma: false,
            cache_coherent_uma: false,
            memory: MemoryBudget {
                local_usage: 512 * 1024 * 1024,
                local_budget: 8192 * 1024 * 1024,
                non_local_usage: 0,
                non_local_budget: 16384 * 1024 * 1024,
            },
            heap_type: HeapType::Upload,
            cpu_writable: true,
            cpu_page_property: CpuPageProperty::WriteCombine,
            memory_pool: MemoryPool::L0,
            input_buffer_size: 16 * 1024 * 1024,
            num_input_elems: 1024 * 1024,
            bytes_read: 16 * 1024 * 1024,
            unique_bytes_read: 16 * 1024 * 1024,
            total_threads: 1024 * 1024,
            frame_ms: 16.6,
            compute_ms: 2.0,
            update_ms: 1.25,
            read_ms: None,
            benchmark_progress: None,
        }
    }

    #[test]
    fn test_panel_lines() {
        let text = snapshot().to_string();
        assert!(text.contains("Adapter: Test Adapter\n"));
        assert!(text.contains("Local Memory Usage: 512.00 / 8192.00 MB\n"));
        assert!(text.contains("Heap Type: Upload\n"));
        assert!(text.contains("CPU-Writable Heap: Yes\n"));
        assert!(text.contains("Heap CPUPageProperty: Write-Combined (Uncached)\n"));
        assert!(text.contains("Input Buffer Size: 16.00 MB\n"));
        assert!(text.contains("CPU Time Updating Buffer: 1.25 ms\n"));
        assert!(text.contains("Max Effective Bandwidth: 8000.00 MB/s\n"));
        assert!(!text.contains("CPU Time Reading Buffer"));
        assert!(!text.contains("Running benchmark"));
    }

    #[test]
    fn test_readback_and_progress_lines() {
        let mut hud = snapshot();
        hud.read_ms = Some(0.5);
        hud.benchmark_progress = Some((3, 12));
        let text = hud.to_string();
        assert!(text.contains("CPU Time Reading Buffer: 0.50 ms\n"));
        assert!(text.ends_with("Running benchmark 3 of 12\n"));
    }

    #[test]
    fn test_byte_scaling() {
        assert_eq!(Bytes(512).to_string(), "512 B");
        assert_eq!(Bytes(1536).to_string(), "1.50 KB");
        assert_eq!(Bytes(3 * 1024 * 1024).to_string(), "3.00 MB");
    }
}
