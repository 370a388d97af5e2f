//! # Replacement Transaction Module
//!
//! Questo modulo implementa la sostituzione transazionale dei file:
//! scrittura su un path temporaneo adiacente all'originale e rename
//! atomico solo se la policy di accettazione è soddisfatta.
//!
//! ## Garanzie:
//! - L'originale non viene mai cancellato o troncato prima che esista un
//!   sostituto completo e validato sullo stesso filesystem.
//! - Dopo ogni esito esiste esattamente uno tra {originale intatto,
//!   originale sostituito}: mai zero file, mai due.
//! - Su ogni percorso di non-successo il file temporaneo viene rimosso.
//!
//! I path temporanei sono deterministici (`nome.ext.tmp` per immagini,
//! `stem.tmp.mkv` per video): stessa directory dell'originale, quindi
//! stesso filesystem per il rename, e nomi riconoscibili per lo sweep
//! degli artefatti orfani.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Terminal decision of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Replaced,
    KeptOriginal,
    Failed,
}

/// Terminal report of a transaction
#[derive(Debug)]
pub struct TransactionResult {
    pub original: PathBuf,
    pub final_path: PathBuf,
    pub decision: Decision,
    pub final_size: u64,
}

/// When a staged output may replace the original
#[derive(Debug, Clone, Copy)]
pub enum AcceptancePolicy {
    /// Images: the search already enforces the ceiling, the transaction
    /// only guards against a "compressed" result that grew.
    SmallerThanOriginal { original_size: u64 },
    /// Video: a marginal win is not worth replacing the container, the
    /// output must be strictly below `original * ratio`.
    SmallerByRatio { original_size: u64, ratio: f64 },
}

impl AcceptancePolicy {
    pub fn accepts(&self, candidate_size: u64) -> bool {
        match *self {
            Self::SmallerThanOriginal { original_size } => candidate_size < original_size,
            Self::SmallerByRatio {
                original_size,
                ratio,
            } => (candidate_size as f64) < original_size as f64 * ratio,
        }
    }
}

/// Temp-write, validate, atomically swap
pub struct ReplacementTransaction {
    original: PathBuf,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl ReplacementTransaction {
    /// In-place image replacement: the final path is the original itself
    pub fn for_image(original: &Path) -> Self {
        let mut name = original
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");

        Self {
            original: original.to_path_buf(),
            temp_path: original.with_file_name(name),
            final_path: original.to_path_buf(),
        }
    }

    /// Video replacement with container normalization: the final path keeps
    /// the stem but takes the normalized container extension.
    pub fn for_video(original: &Path, container_ext: &str) -> Self {
        let stem = original
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Self {
            original: original.to_path_buf(),
            temp_path: original.with_file_name(format!("{}.tmp.{}", stem, container_ext)),
            final_path: original.with_file_name(format!("{}.{}", stem, container_ext)),
        }
    }

    /// Where the candidate output is staged (same directory, hence same
    /// filesystem, as the original)
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Stage an in-memory candidate
    pub async fn write_candidate(&self, bytes: &[u8]) -> Result<()> {
        fs::write(&self.temp_path, bytes).await?;
        Ok(())
    }

    /// Apply the acceptance policy: accepted output swaps in atomically,
    /// rejected output is discarded and the original stays untouched.
    pub async fn resolve(self, policy: &AcceptancePolicy) -> Result<TransactionResult> {
        let staged_size = match fs::metadata(&self.temp_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                // Nothing staged: the original was never at risk
                return Err(anyhow::anyhow!(
                    "No staged output at {}: {}",
                    self.temp_path.display(),
                    e
                ));
            }
        };

        if policy.accepts(staged_size) {
            self.commit(staged_size).await
        } else {
            debug!(
                "Staged output ({}) rejected by policy, keeping original {}",
                staged_size,
                self.original.display()
            );
            self.reject().await
        }
    }

    async fn commit(self, staged_size: u64) -> Result<TransactionResult> {
        if let Err(e) = fs::rename(&self.temp_path, &self.final_path).await {
            // Rename failed before the original was touched
            self.discard().await?;
            return Err(e.into());
        }

        // Container normalization may move to a new path; only then does
        // the source need removing. A same-path replacement was already
        // completed by the rename and must never be deleted.
        if self.original != self.final_path {
            if let Err(e) = fs::remove_file(&self.original).await {
                // Roll back to "original untouched" by dropping the copy
                let _ = fs::remove_file(&self.final_path).await;
                return Err(e.into());
            }
        }

        info!(
            "Replaced {} -> {} ({} bytes)",
            self.original.display(),
            self.final_path.display(),
            staged_size
        );

        Ok(TransactionResult {
            original: self.original,
            final_path: self.final_path,
            decision: Decision::Replaced,
            final_size: staged_size,
        })
    }

    async fn reject(self) -> Result<TransactionResult> {
        let original_size = fs::metadata(&self.original)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        self.discard().await?;

        Ok(TransactionResult {
            final_path: self.original.clone(),
            original: self.original,
            decision: Decision::KeptOriginal,
            final_size: original_size,
        })
    }

    /// Remove any staged output, leaving the original alone. Idempotent;
    /// safe on every non-success path.
    pub async fn discard(&self) -> Result<()> {
        if self.temp_path.exists() {
            fs::remove_file(&self.temp_path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_policy_boundaries() {
        let smaller = AcceptancePolicy::SmallerThanOriginal { original_size: 100 };
        assert!(smaller.accepts(99));
        assert!(!smaller.accepts(100));

        let ratio = AcceptancePolicy::SmallerByRatio {
            original_size: 100,
            ratio: 0.5,
        };
        assert!(ratio.accepts(49));
        // Strictly smaller: hitting the ratio exactly is not enough
        assert!(!ratio.accepts(50));
        assert!(!ratio.accepts(80));
    }

    #[tokio::test]
    async fn test_image_replace_in_place() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("photo.jpg");
        std::fs::write(&original, b"ORIGINAL IMAGE DATA").unwrap();

        let txn = ReplacementTransaction::for_image(&original);
        txn.write_candidate(b"small").await.unwrap();

        let result = txn
            .resolve(&AcceptancePolicy::SmallerThanOriginal { original_size: 19 })
            .await
            .unwrap();

        assert_eq!(result.decision, Decision::Replaced);
        assert_eq!(result.final_size, 5);
        assert_eq!(std::fs::read(&original).unwrap(), b"small");
        assert_eq!(count_files(temp.path()), 1, "exactly one file must remain");
    }

    #[tokio::test]
    async fn test_image_grown_candidate_keeps_original() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("photo.jpg");
        std::fs::write(&original, b"tiny").unwrap();

        let txn = ReplacementTransaction::for_image(&original);
        txn.write_candidate(b"a candidate that somehow grew")
            .await
            .unwrap();

        let result = txn
            .resolve(&AcceptancePolicy::SmallerThanOriginal { original_size: 4 })
            .await
            .unwrap();

        assert_eq!(result.decision, Decision::KeptOriginal);
        assert_eq!(std::fs::read(&original).unwrap(), b"tiny");
        assert_eq!(count_files(temp.path()), 1);
    }

    #[tokio::test]
    async fn test_video_replace_normalizes_container() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("clip.mp4");
        std::fs::write(&original, vec![0u8; 1000]).unwrap();

        let txn = ReplacementTransaction::for_video(&original, "mkv");
        assert_eq!(txn.temp_path(), temp.path().join("clip.tmp.mkv"));

        std::fs::write(txn.temp_path(), vec![0u8; 400]).unwrap();

        let result = txn
            .resolve(&AcceptancePolicy::SmallerByRatio {
                original_size: 1000,
                ratio: 0.98,
            })
            .await
            .unwrap();

        assert_eq!(result.decision, Decision::Replaced);
        assert_eq!(result.final_path, temp.path().join("clip.mkv"));
        assert!(!original.exists());
        assert!(temp.path().join("clip.mkv").exists());
        assert_eq!(count_files(temp.path()), 1);
    }

    #[tokio::test]
    async fn test_video_same_container_keeps_replacement() {
        // An .mkv input replaces itself: the rename already completed the
        // swap, nothing may be deleted afterwards.
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("clip.mkv");
        std::fs::write(&original, vec![0u8; 1000]).unwrap();

        let txn = ReplacementTransaction::for_video(&original, "mkv");
        std::fs::write(txn.temp_path(), vec![0u8; 300]).unwrap();

        let result = txn
            .resolve(&AcceptancePolicy::SmallerByRatio {
                original_size: 1000,
                ratio: 0.98,
            })
            .await
            .unwrap();

        assert_eq!(result.decision, Decision::Replaced);
        assert!(original.exists());
        assert_eq!(std::fs::metadata(&original).unwrap().len(), 300);
        assert_eq!(count_files(temp.path()), 1);
    }

    #[tokio::test]
    async fn test_video_marginal_win_rejected() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("clip.mp4");
        std::fs::write(&original, vec![0u8; 1000]).unwrap();

        let txn = ReplacementTransaction::for_video(&original, "mkv");
        std::fs::write(txn.temp_path(), vec![0u8; 990]).unwrap();

        let result = txn
            .resolve(&AcceptancePolicy::SmallerByRatio {
                original_size: 1000,
                ratio: 0.98,
            })
            .await
            .unwrap();

        assert_eq!(result.decision, Decision::KeptOriginal);
        assert!(original.exists());
        assert_eq!(std::fs::metadata(&original).unwrap().len(), 1000);
        assert!(!temp.path().join("clip.tmp.mkv").exists());
        assert_eq!(count_files(temp.path()), 1);
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("photo.jpg");
        std::fs::write(&original, b"data").unwrap();

        let txn = ReplacementTransaction::for_image(&original);
        txn.write_candidate(b"candidate").await.unwrap();

        txn.discard().await.unwrap();
        txn.discard().await.unwrap();

        assert!(original.exists());
        assert_eq!(count_files(temp.path()), 1);
    }
}
