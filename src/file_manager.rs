//! # File Management Module
//!
//! Questo modulo gestisce la discovery dei file media e le operazioni
//! di supporto sul filesystem.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva dei file candidati per tipo (immagine o video)
//! - Costruzione dei `MediaTask` consumati dai worker
//! - Sweep dei file temporanei orfani di run precedenti interrotti
//! - Utilità per dimensioni e percentuali di riduzione
//!
//! ## Formati supportati:
//! Le estensioni riconosciute arrivano dalla configurazione, non da
//! costanti: default immagini JPG/JPEG/PNG/BMP/GIF/TIFF, default video
//! MP4/MKV/MOV/AVI/FLV/WMV.

use crate::config::Config;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Which pipeline a discovered file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// A single unit of work: one discovered media file.
///
/// Created at discovery time, consumed by exactly one worker, and dropped
/// once the task reaches a terminal outcome.
#[derive(Debug, Clone)]
pub struct MediaTask {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: MediaKind,
    pub extension: String,
}

/// Manages file discovery and filesystem helpers
pub struct FileManager;

impl FileManager {
    /// Get a file's size and modification time (unix seconds)
    pub async fn get_file_info(path: &Path) -> Result<(u64, u64)> {
        let metadata = fs::metadata(path).await?;
        let size = metadata.len();
        let modified = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        Ok((size, modified))
    }

    /// Current size of a file in bytes
    pub fn file_size(path: &Path) -> Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    /// Find all files of the requested kind under a directory tree.
    ///
    /// Files that cannot be stat-ed are logged and skipped; they never
    /// abort the scan.
    pub fn discover(root: &Path, kind: MediaKind, config: &Config) -> Result<Vec<MediaTask>> {
        let extensions = match kind {
            MediaKind::Image => &config.image_extensions,
            MediaKind::Video => &config.video_extensions,
        };

        let mut tasks = Vec::new();

        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let Some(extension) = Self::matching_extension(path, extensions) else {
                continue;
            };

            match std::fs::metadata(path) {
                Ok(metadata) => tasks.push(MediaTask {
                    path: path.to_path_buf(),
                    size_bytes: metadata.len(),
                    kind,
                    extension,
                }),
                Err(e) => warn!("Cannot stat {}: {}", path.display(), e),
            }
        }

        Ok(tasks)
    }

    /// Lowercased extension if it belongs to the supported set
    fn matching_extension(path: &Path, extensions: &[String]) -> Option<String> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        extensions.iter().any(|e| *e == ext).then_some(ext)
    }

    /// Remove temporary artifacts left behind by a previous interrupted run.
    ///
    /// Transactions write deterministic sibling temp files (`name.ext.tmp`
    /// for images, `stem.tmp.mkv` for videos); anything matching those
    /// patterns is stale by definition at the start of a run. Returns the
    /// number of files removed.
    pub fn sweep_stale_temps(root: &Path) -> Result<usize> {
        let mut removed = 0;

        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(".tmp") || name.ends_with(".tmp.mkv") {
                match std::fs::remove_file(path) {
                    Ok(_) => {
                        debug!("Swept stale temp file: {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("Failed to sweep {}: {}", path.display(), e),
                }
            }
        }

        Ok(removed)
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &[u8]) {
        File::create(path).unwrap().write_all(content).unwrap();
    }

    #[test]
    fn test_discover_filters_by_kind() {
        let temp = TempDir::new().unwrap();
        let sub = temp.path().join("nested");
        std::fs::create_dir(&sub).unwrap();

        touch(&temp.path().join("a.JPG"), b"x");
        touch(&sub.join("b.png"), b"x");
        touch(&sub.join("c.mp4"), b"x");
        touch(&temp.path().join("d.txt"), b"x");

        let config = Config::default();
        let images = FileManager::discover(temp.path(), MediaKind::Image, &config).unwrap();
        let videos = FileManager::discover(temp.path(), MediaKind::Video, &config).unwrap();

        assert_eq!(images.len(), 2);
        assert!(images.iter().all(|t| t.kind == MediaKind::Image));
        assert!(images.iter().any(|t| t.extension == "jpg"));
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].extension, "mp4");
    }

    #[test]
    fn test_sweep_stale_temps() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("photo.jpg.tmp"), b"partial");
        touch(&temp.path().join("movie.tmp.mkv"), b"partial");
        touch(&temp.path().join("keep.jpg"), b"real");

        let removed = FileManager::sweep_stale_temps(temp.path()).unwrap();

        assert_eq!(removed, 2);
        assert!(!temp.path().join("photo.jpg.tmp").exists());
        assert!(!temp.path().join("movie.tmp.mkv").exists());
        assert!(temp.path().join("keep.jpg").exists());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(1536), "1.50 KB");
        assert_eq!(FileManager::format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_calculate_reduction() {
        assert_eq!(FileManager::calculate_reduction(100, 50), 50.0);
        assert_eq!(FileManager::calculate_reduction(0, 50), 0.0);
    }

    #[tokio::test]
    async fn test_get_file_info() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f.bin");
        touch(&path, b"12345");

        let (size, modified) = FileManager::get_file_info(&path).await.unwrap();
        assert_eq!(size, 5);
        assert!(modified > 0);
    }
}
