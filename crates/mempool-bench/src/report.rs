//! CSV report of a finished sweep

use crate::state::BenchmarkResult;
use crate::sweep::BenchmarkConfig;
use crate::Result;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Report columns, in order
pub const CSV_COLUMNS: [&str; 18] = [
    "HeapType",
    "CPUPageProperty",
    "MemoryPool",
    "InputBufferType",
    "NumThreadGroups",
    "InputBufferSize",
    "ElemsPerThread",
    "ThreadElemStride",
    "GroupElemOffset",
    "ThreadElemOffset",
    "Total Num Threads",
    "CPU-Writable Heap",
    "Total Bytes Read",
    "Unique Bytes Read",
    "Compute Job Time (ms)",
    "CPU Time Updating Buffer (ms)",
    "CPU Time Reading Buffer (ms)",
    "Max Effective Bandwidth (MB/s)",
];

const SEPARATOR: &str = ", ";

/// Megabytes per second for `bytes` read in `compute_ms`
///
/// Zero when no compute time was measured.
pub fn effective_bandwidth(bytes: u64, compute_ms: f64) -> f64 {
    if compute_ms <= 0.0 {
        return 0.0;
    }
    (bytes as f64 / (1024.0 * 1024.0)) / (compute_ms / 1000.0)
}

/// One finished configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportRow {
    pub config: BenchmarkConfig,
    pub result: BenchmarkResult,
}

impl ReportRow {
    pub fn new(config: BenchmarkConfig, result: BenchmarkResult) -> Self {
        Self { config, result }
    }

    pub fn bandwidth(&self) -> f64 {
        effective_bandwidth(self.config.bytes_read(), self.result.compute_ms)
    }

    fn write_csv(&self, out: &mut String) {
        let c = &self.config;
        let r = &self.result;
        let fields = [
            c.heap_type.label().to_string(),
            c.cpu_page_property.label().to_string(),
            c.memory_pool.label().to_string(),
            c.input_buffer_type.label().to_string(),
            c.num_thread_groups.to_string(),
            c.input_buffer_size.to_string(),
            c.elems_per_thread.to_string(),
            c.thread_elem_stride.to_string(),
            c.group_elem_offset.to_string(),
            c.thread_elem_offset.to_string(),
            c.total_threads().to_string(),
            if c.is_cpu_writable() { "Yes" } else { "No" }.to_string(),
            c.bytes_read().to_string(),
            c.unique_bytes_read().to_string(),
            format!("{:.6}", r.compute_ms),
            format!("{:.6}", r.update_ms),
            format!("{:.6}", r.read_ms),
            format!("{:.6}", self.bandwidth()),
        ];
        for field in &fields {
            // Infallible for String
            let _ = write!(out, "{field}{SEPARATOR}");
        }
        out.push('\n');
    }
}

/// Configurations and results of a sweep, in enumeration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchmarkReport {
    rows: Vec<ReportRow>,
}

impl BenchmarkReport {
    pub fn new(rows: Vec<ReportRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header line plus one line per row
    pub fn to_csv(&self) -> String {
        let mut out = CSV_COLUMNS.join(SEPARATOR);
        out.push('\n');
        for row in &self.rows {
            row.write_csv(&mut out);
        }
        out
    }

    /// Write the CSV to `path`, returning the text written
    pub fn write_to(&self, path: &Path) -> Result<String> {
        let text = self.to_csv();
        std::fs::write(path, &text)?;
        info!("Wrote {} benchmark results to {}", self.rows.len(), path.display());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempool_gpu::{BufferRepresentation, CpuPageProperty, HeapType, MemoryPool};

    fn row(heap_type: HeapType, compute_ms: f64) -> ReportRow {
        ReportRow::new(
            BenchmarkConfig {
                heap_type,
                cpu_page_property: CpuPageProperty::NotAvailable,
                memory_pool: MemoryPool::L0,
                input_buffer_type: BufferRepresentation::Raw,
                num_thread_groups: 4096,
                input_buffer_size: 16 * 1024 * 1024,
                elems_per_thread: 1,
                thread_elem_stride: 1,
                group_elem_offset: 1,
                thread_elem_offset: 1,
            },
            BenchmarkResult {
                compute_ms,
                update_ms: 0.5,
                read_ms: 0.0,
            },
        )
    }

    #[test]
    fn test_header() {
        let csv = BenchmarkReport::default().to_csv();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.starts_with("HeapType, CPUPageProperty, MemoryPool, InputBufferType,"));
        assert!(csv.ends_with("Max Effective Bandwidth (MB/s)\n"));
    }

    #[test]
    fn test_row_fields() {
        let csv = BenchmarkReport::new(vec![row(HeapType::Upload, 2.0)]).to_csv();
        let line = csv.lines().nth(1).unwrap();
        let fields: Vec<&str> = line.split(", ").collect();

        // Every field carries a trailing separator
        assert_eq!(fields.len(), CSV_COLUMNS.len() + 1);
        assert_eq!(fields[CSV_COLUMNS.len()], "");
        assert_eq!(fields[0], "Upload");
        assert_eq!(fields[1], "Not Available (No CPU Access)");
        assert_eq!(fields[2], "L0 (CPU RAM)");
        assert_eq!(fields[3], "Raw");
        assert_eq!(fields[5], "16777216");
        assert_eq!(fields[10], "1048576");
        assert_eq!(fields[11], "Yes");
        assert_eq!(fields[12], "16777216");
        assert_eq!(fields[13], "16777216");
        assert_eq!(fields[14], "2.000000");
        assert_eq!(fields[15], "0.500000");
        assert_eq!(fields[17], "8000.000000");
    }

    #[test]
    fn test_non_writable_heap_column() {
        let csv = BenchmarkReport::new(vec![row(HeapType::Default, 1.0)]).to_csv();
        let line = csv.lines().nth(1).unwrap();
        assert_eq!(line.split(", ").nth(11), Some("No"));
    }

    #[test]
    fn test_effective_bandwidth() {
        assert_eq!(effective_bandwidth(1024 * 1024, 1000.0), 1.0);
        assert_eq!(effective_bandwidth(64 * 1024 * 1024, 4.0), 16000.0);
        assert_eq!(effective_bandwidth(1024, 0.0), 0.0);
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Benchmark.csv");
        let report = BenchmarkReport::new(vec![row(HeapType::Upload, 1.0), row(HeapType::Default, 1.0)]);

        let text = report.write_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
        assert_eq!(text.lines().count(), 3);
    }
}
