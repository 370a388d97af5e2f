//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Parametri di configurazione:
//! - `max_size_mb`: Dimensione massima target per le immagini (default: 1.5)
//! - `min_size_mb`: Soglia sotto cui un'immagine viene saltata (default: 1.0)
//! - `video_min_size_mb`: Soglia sotto cui un video viene saltato (default: 5.0)
//! - `quality_min` / `quality_max`: Range di ricerca qualità (default: 30-95)
//! - `min_dimension`: Floor in pixel per il downscaling (default: 200)
//! - `shrink_factor`: Fattore di riduzione per step (default: 0.9)
//! - `video_crf`: CRF per la codifica video (0-51, default: 28)
//! - `video_preset`: Preset dell'encoder (default: "medium")
//! - `acceptance_ratio`: L'output video deve stare sotto questa frazione
//!   dell'originale per essere tenuto (default: 0.98)
//! - `sample_window_secs`: Secondi di media codificati prima di fidarsi
//!   della stima per l'early-abort (default: 5.0)
//! - `workers` / `video_workers`: Parallelismo per tipo (default: 4 / 2)
//! - `image_extensions` / `video_extensions`: Estensioni riconosciute
//!
//! ## Validazione:
//! - quality bounds in 1-100 con min <= max
//! - acceptance_ratio in (0, 1]
//! - shrink_factor in (0, 1)
//! - workers > 0

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Configuration for batch media compression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target size ceiling for images (MB)
    pub max_size_mb: f64,
    /// Images below this size are skipped untouched (MB)
    pub min_size_mb: f64,
    /// Videos below this size are skipped untouched (MB)
    pub video_min_size_mb: f64,
    /// Lowest quality the search will accept
    pub quality_min: u8,
    /// Highest quality the search will try
    pub quality_max: u8,
    /// Downscaling stops when either dimension would fall below this
    pub min_dimension: u32,
    /// Per-step dimension multiplier for the downscaler
    pub shrink_factor: f64,
    /// Video CRF value (0-51, lower = better quality)
    pub video_crf: u8,
    /// ffmpeg encoder preset
    pub video_preset: String,
    /// Keep a transcode only if final size < original * ratio
    pub acceptance_ratio: f64,
    /// Encoded media seconds required before early-abort decisions
    pub sample_window_secs: f64,
    /// Parallel workers for images
    pub workers: usize,
    /// Parallel workers for videos (transcodes are heavyweight)
    pub video_workers: usize,
    /// File extensions treated as images
    pub image_extensions: Vec<String>,
    /// File extensions treated as videos
    pub video_extensions: Vec<String>,
    /// Dry run - compress but never replace files
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_size_mb: 1.5,
            min_size_mb: 1.0,
            video_min_size_mb: 5.0,
            quality_min: 30,
            quality_max: 95,
            min_dimension: 200,
            shrink_factor: 0.9,
            video_crf: 28,
            video_preset: "medium".to_string(),
            acceptance_ratio: 0.98,
            sample_window_secs: 5.0,
            workers: 4,
            video_workers: 2,
            image_extensions: ["jpg", "jpeg", "png", "bmp", "gif", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_extensions: ["mp4", "mkv", "mov", "avi", "flv", "wmv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dry_run: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.quality_min == 0 || self.quality_max > 100 || self.quality_min > self.quality_max {
            return Err(anyhow::anyhow!(
                "Quality bounds must satisfy 1 <= min <= max <= 100"
            ));
        }

        if self.video_crf > 51 {
            return Err(anyhow::anyhow!("Video CRF must be between 0 and 51"));
        }

        if self.acceptance_ratio <= 0.0 || self.acceptance_ratio > 1.0 {
            return Err(anyhow::anyhow!(
                "Acceptance ratio must be between 0.0 and 1.0"
            ));
        }

        if self.shrink_factor <= 0.0 || self.shrink_factor >= 1.0 {
            return Err(anyhow::anyhow!("Shrink factor must be in (0.0, 1.0)"));
        }

        if self.max_size_mb <= 0.0 {
            return Err(anyhow::anyhow!("Target size ceiling must be positive"));
        }

        if self.min_dimension == 0 {
            return Err(anyhow::anyhow!("Minimum dimension must be at least 1"));
        }

        if self.workers == 0 || self.video_workers == 0 {
            return Err(anyhow::anyhow!("Number of workers must be greater than 0"));
        }

        Ok(())
    }

    /// Image target ceiling in bytes
    pub fn max_size_bytes(&self) -> u64 {
        (self.max_size_mb * BYTES_PER_MB) as u64
    }

    /// Image skip floor in bytes
    pub fn min_size_bytes(&self) -> u64 {
        (self.min_size_mb * BYTES_PER_MB) as u64
    }

    /// Video skip floor in bytes
    pub fn video_min_size_bytes(&self) -> u64 {
        (self.video_min_size_mb * BYTES_PER_MB) as u64
    }

    /// Load configuration from a JSON file
    pub async fn from_file(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub async fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.quality_min = 0;
        assert!(config.validate().is_err());

        config.quality_min = 80;
        config.quality_max = 40;
        assert!(config.validate().is_err());

        config.quality_min = 30;
        config.quality_max = 95;
        config.video_crf = 52;
        assert!(config.validate().is_err());

        config.video_crf = 28;
        config.acceptance_ratio = 1.5;
        assert!(config.validate().is_err());

        config.acceptance_ratio = 0.98;
        config.shrink_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.quality_min, 30);
        assert_eq!(config.quality_max, 95);
        assert_eq!(config.video_crf, 28);
        assert_eq!(config.video_preset, "medium");
        assert_eq!(config.workers, 4);
        assert_eq!(config.video_workers, 2);
        assert!(!config.dry_run);
        assert!(config.image_extensions.contains(&"jpeg".to_string()));
        assert!(config.video_extensions.contains(&"mkv".to_string()));
    }

    #[test]
    fn test_size_conversions() {
        let config = Config::default();
        assert_eq!(config.max_size_bytes(), (1.5 * 1024.0 * 1024.0) as u64);
        assert_eq!(config.min_size_bytes(), 1024 * 1024);
        assert_eq!(config.video_min_size_bytes(), 5 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let original_config = Config {
            max_size_mb: 2.0,
            quality_min: 40,
            quality_max: 90,
            video_crf: 24,
            acceptance_ratio: 0.8,
            workers: 8,
            dry_run: true,
            ..Default::default()
        };

        original_config.save_to_file(&config_path).await.unwrap();
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config.max_size_mb, 2.0);
        assert_eq!(loaded_config.quality_min, 40);
        assert_eq!(loaded_config.quality_max, 90);
        assert_eq!(loaded_config.video_crf, 24);
        assert_eq!(loaded_config.acceptance_ratio, 0.8);
        assert_eq!(loaded_config.workers, 8);
        assert!(loaded_config.dry_run);
    }

    #[tokio::test]
    async fn test_config_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nope.json");

        let config = Config::from_file(&config_path).await.unwrap();
        assert_eq!(config.max_size_mb, 1.5);
    }
}
