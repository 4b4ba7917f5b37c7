//! Accelerator memory reporting

use crate::trainer::TrainStats;
use afinar_model::Accelerator;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Round to three decimal places
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Convert bytes to gigabytes, rounded to three decimals
pub fn bytes_to_gb(bytes: u64) -> f64 {
    round3(bytes as f64 / BYTES_PER_GB)
}

/// Derived memory utilization figures, all rounded to three decimals
///
/// Purely observational; computed from two reserved-memory snapshots and
/// the device's total memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryReport {
    /// Reserved memory at the pre-training snapshot, GB
    pub start_gb: f64,
    /// Peak reserved memory at the post-training snapshot, GB
    pub used_gb: f64,
    /// Peak reserved memory attributable to training, GB
    pub used_for_lora_gb: f64,
    /// Total device memory, GB
    pub max_gb: f64,
    /// used / max * 100
    pub used_percentage: f64,
    /// used_for_lora / max * 100
    pub lora_percentage: f64,
}

impl MemoryReport {
    /// Compute the report from raw byte counters
    ///
    /// # Arguments
    /// * `start_reserved` - Reserved bytes before training
    /// * `peak_reserved` - Peak reserved bytes after training
    /// * `total_memory` - Total device memory in bytes
    pub fn compute(start_reserved: u64, peak_reserved: u64, total_memory: u64) -> Self {
        let start_gb = bytes_to_gb(start_reserved);
        let used_gb = bytes_to_gb(peak_reserved);
        let max_gb = bytes_to_gb(total_memory);
        let used_for_lora_gb = round3(used_gb - start_gb);

        Self {
            start_gb,
            used_gb,
            used_for_lora_gb,
            max_gb,
            used_percentage: round3(used_gb / max_gb * 100.0),
            lora_percentage: round3(used_for_lora_gb / max_gb * 100.0),
        }
    }
}

/// Print the pre-training device line
pub fn print_device(accelerator: &Accelerator) {
    let max_gb = bytes_to_gb(accelerator.total_memory());
    let start_gb = bytes_to_gb(accelerator.max_memory_reserved());
    println!("GPU = {}. Max memory = {} GB.", accelerator.name(), max_gb);
    println!("{} GB of memory reserved.", start_gb);
}

/// Print training duration and the memory utilization report
pub fn print_report(stats: &TrainStats, report: &MemoryReport) {
    println!("{} seconds used for training.", stats.train_runtime);
    println!(
        "{} minutes used for training.",
        (stats.runtime_minutes() * 100.0).round() / 100.0
    );
    println!("Peak reserved memory = {} GB.", report.used_gb);
    println!(
        "Peak reserved memory for training = {} GB.",
        report.used_for_lora_gb
    );
    println!(
        "Peak reserved memory % of max memory = {} %.",
        report.used_percentage
    );
    println!(
        "Peak reserved memory for training % of max memory = {} %.",
        report.lora_percentage
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_round3() {
        assert_eq!(round3(1.23456), 1.235);
        assert_eq!(round3(1.2344), 1.234);
        assert_eq!(round3(0.0005), 0.001);
    }

    #[test]
    fn test_bytes_to_gb() {
        assert_eq!(bytes_to_gb(GB), 1.0);
        assert_eq!(bytes_to_gb(GB / 2), 0.5);
        assert_eq!(bytes_to_gb(GB + GB / 3), 1.333);
    }

    #[test]
    fn test_used_percentage_formula() {
        let report = MemoryReport::compute(0, 4 * GB, 16 * GB);
        assert_eq!(report.used_percentage, round3(4.0 / 16.0 * 100.0));
        assert_eq!(report.used_percentage, 25.0);
    }

    #[test]
    fn test_lora_percentage_formula() {
        let report = MemoryReport::compute(GB, 4 * GB, 16 * GB);
        assert_eq!(report.used_for_lora_gb, 3.0);
        assert_eq!(report.lora_percentage, round3(3.0 / 16.0 * 100.0));
        assert_eq!(report.lora_percentage, 18.75);
    }

    #[test]
    fn test_percentages_rounded_to_three_decimals() {
        let report = MemoryReport::compute(0, 5 * GB, 12 * GB);
        // 5/12 * 100 = 41.666... -> 41.667
        assert_eq!(report.used_percentage, 41.667);
    }
}
