//! # Progress Tracking and Statistics Module
//!
//! Progress bar `indicatif` per il feedback real-time e statistiche
//! aggregate del batch.
//!
//! ## Statistiche tracciate:
//! - **files_replaced**: File sostituiti con la versione compressa
//! - **files_kept**: File tenuti (guadagno insufficiente)
//! - **files_skipped**: File saltati (sotto soglia, già processati)
//! - **projection_aborts**: Transcodifiche interrotte dalla proiezione,
//!   esito distinto dagli errori
//! - **errors**: Fallimenti reali (file illeggibili, encoder, filesystem)

use crate::file_manager::FileManager;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages the batch progress bar
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Advance by one file with its outcome message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// Statistics tracker for one batch run
#[derive(Debug, Default)]
pub struct BatchStats {
    pub files_replaced: usize,
    pub files_kept: usize,
    pub files_skipped: usize,
    pub projection_aborts: usize,
    pub errors: usize,
    pub total_original_size: u64,
    pub total_bytes_saved: u64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_replaced(&mut self, original_size: u64, final_size: u64) {
        self.files_replaced += 1;
        self.total_original_size += original_size;
        self.total_bytes_saved += original_size.saturating_sub(final_size);
    }

    pub fn add_kept(&mut self, original_size: u64) {
        self.files_kept += 1;
        self.total_original_size += original_size;
    }

    pub fn add_skipped(&mut self) {
        self.files_skipped += 1;
    }

    pub fn add_projection_abort(&mut self) {
        self.projection_aborts += 1;
    }

    pub fn add_error(&mut self) {
        self.errors += 1;
    }

    pub fn files_processed(&self) -> usize {
        self.files_replaced + self.files_kept + self.files_skipped + self.projection_aborts + self.errors
    }

    pub fn overall_reduction_percent(&self) -> f64 {
        if self.total_original_size > 0 {
            (self.total_bytes_saved as f64 / self.total_original_size as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} | Replaced: {} | Kept: {} | Skipped: {} | Aborted: {} | Errors: {} | Saved: {} ({:.2}%)",
            self.files_processed(),
            self.files_replaced,
            self.files_kept,
            self.files_skipped,
            self.projection_aborts,
            self.errors,
            FileManager::format_size(self.total_bytes_saved),
            self.overall_reduction_percent()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulation() {
        let mut stats = BatchStats::new();

        stats.add_replaced(1000, 400);
        stats.add_kept(500);
        stats.add_skipped();
        stats.add_projection_abort();
        stats.add_error();

        assert_eq!(stats.files_processed(), 5);
        assert_eq!(stats.total_bytes_saved, 600);
        assert_eq!(stats.total_original_size, 1500);
        assert_eq!(stats.overall_reduction_percent(), 40.0);
    }

    #[test]
    fn test_summary_contains_categories() {
        let mut stats = BatchStats::new();
        stats.add_replaced(2048, 1024);

        let summary = stats.format_summary();
        assert!(summary.contains("Replaced: 1"));
        assert!(summary.contains("Aborted: 0"));
    }
}
