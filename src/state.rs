//! # State Ledger Module
//!
//! Questo modulo tiene traccia dei file già compressi per evitare di
//! ricomprimerli nei run successivi: ricomprimere output lossy degrada la
//! qualità senza guadagno.
//!
//! ## Strategia di persistence:
//! - Un file JSON per directory radice (hash SHA-256 del path)
//! - Salvataggio in `~/.media-compressor/ledger_<hash>.json`
//! - Una entry registra il path **finale** (per i video l'originale
//!   sparisce dopo la sostituzione) con il suo modification time
//! - Entry di file inesistenti vengono ripulite a inizio run

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// One compressed file as recorded in the ledger
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerEntry {
    /// Final path on disk (differs from the source for replaced videos)
    pub path: PathBuf,
    /// Modification time of the final file when it was recorded
    pub modified_time: u64,
    pub original_size: u64,
    pub final_size: u64,
    pub reduction_percent: f64,
    pub compressed_at: u64,
}

impl LedgerEntry {
    pub fn new(path: PathBuf, modified_time: u64, original_size: u64, final_size: u64) -> Self {
        let reduction_percent = if original_size > 0 {
            (1.0 - (final_size as f64 / original_size as f64)) * 100.0
        } else {
            0.0
        };

        let compressed_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            path,
            modified_time,
            original_size,
            final_size,
            reduction_percent,
            compressed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct LedgerFile {
    entries: HashMap<String, LedgerEntry>,
}

/// Per-directory ledger of already compressed files
pub struct StateManager {
    ledger_path: PathBuf,
    ledger: LedgerFile,
}

impl StateManager {
    /// Open (or create) the ledger for a media directory
    pub async fn new(media_dir: &Path) -> Result<Self> {
        let state_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?
            .join(".media-compressor");

        fs::create_dir_all(&state_dir).await?;

        let mut hasher = Sha256::new();
        hasher.update(media_dir.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize())[..16].to_string();

        let ledger_path = state_dir.join(format!("ledger_{}.json", hash));

        let ledger = if ledger_path.exists() {
            let content = fs::read_to_string(&ledger_path).await?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            LedgerFile::default()
        };

        Ok(Self {
            ledger_path,
            ledger,
        })
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.ledger)?;
        fs::write(&self.ledger_path, content).await?;
        Ok(())
    }

    /// Whether a file was already compressed and has not changed since
    pub fn is_processed(&self, file_path: &Path, modified_time: u64) -> bool {
        self.ledger
            .entries
            .get(file_path.to_string_lossy().as_ref())
            .map(|entry| entry.modified_time == modified_time)
            .unwrap_or(false)
    }

    /// Record a freshly compressed file under its final path
    pub async fn mark_processed(&mut self, entry: LedgerEntry) -> Result<()> {
        self.ledger
            .entries
            .insert(entry.path.to_string_lossy().to_string(), entry);
        self.save().await
    }

    /// Lifetime statistics: (files, bytes saved, average reduction %)
    pub fn get_stats(&self) -> (usize, u64, f64) {
        let count = self.ledger.entries.len();
        let total_saved: u64 = self
            .ledger
            .entries
            .values()
            .map(|e| e.original_size.saturating_sub(e.final_size))
            .sum();
        let avg_reduction = if count > 0 {
            self.ledger
                .entries
                .values()
                .map(|e| e.reduction_percent)
                .sum::<f64>()
                / count as f64
        } else {
            0.0
        };

        (count, total_saved, avg_reduction)
    }

    /// Drop entries whose files no longer exist
    pub async fn cleanup(&mut self) -> Result<()> {
        let to_remove: Vec<String> = self
            .ledger
            .entries
            .iter()
            .filter(|(_, entry)| !entry.path.exists())
            .map(|(key, _)| key.clone())
            .collect();

        if to_remove.is_empty() {
            return Ok(());
        }

        for key in to_remove {
            self.ledger.entries.remove(&key);
        }

        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_entry_reduction() {
        let entry = LedgerEntry::new(PathBuf::from("/x.jpg"), 1000, 2000, 500);
        assert_eq!(entry.reduction_percent, 75.0);

        let zero = LedgerEntry::new(PathBuf::from("/y.jpg"), 1000, 0, 0);
        assert_eq!(zero.reduction_percent, 0.0);
    }

    #[test]
    fn test_is_processed_requires_matching_mtime() {
        let mut ledger = LedgerFile::default();
        let entry = LedgerEntry::new(PathBuf::from("/a/b.jpg"), 42, 100, 50);
        ledger
            .entries
            .insert(entry.path.to_string_lossy().to_string(), entry);

        let manager = StateManager {
            ledger_path: PathBuf::from("/dev/null"),
            ledger,
        };

        assert!(manager.is_processed(Path::new("/a/b.jpg"), 42));
        assert!(!manager.is_processed(Path::new("/a/b.jpg"), 43));
        assert!(!manager.is_processed(Path::new("/a/other.jpg"), 42));
    }

    #[test]
    fn test_get_stats() {
        let mut ledger = LedgerFile::default();
        for (i, (orig, fin)) in [(1000u64, 500u64), (2000, 1000)].iter().enumerate() {
            let entry = LedgerEntry::new(PathBuf::from(format!("/f{}.jpg", i)), 1, *orig, *fin);
            ledger
                .entries
                .insert(entry.path.to_string_lossy().to_string(), entry);
        }

        let manager = StateManager {
            ledger_path: PathBuf::from("/dev/null"),
            ledger,
        };

        let (count, saved, avg) = manager.get_stats();
        assert_eq!(count, 2);
        assert_eq!(saved, 1500);
        assert_eq!(avg, 50.0);
    }
}
