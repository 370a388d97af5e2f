//! # Batch Scheduler Module
//!
//! Questo è il modulo che orchestra l'intero processo di compressione.
//!
//! ## Flusso di esecuzione:
//! 1. **Capability check**: ffmpeg/ffprobe disponibili (solo video)
//! 2. **Sweep**: rimozione artefatti temporanei di run interrotti
//! 3. **Discovery**: enumerazione ricorsiva dei file candidati
//! 4. **Fan-out**: worker pool limitato da semaforo (default 4 immagini,
//!    2 video, dato che ogni job video spawna già un processo pesante)
//! 5. **Reporting**: una riga di esito per file + summary finale
//!
//! ## Isolamento dei fallimenti:
//! L'errore di un worker (file illeggibile, encoder fallito, filesystem)
//! viene loggato e conteggiato; il batch continua sempre con i file
//! rimanenti. Nessuno stato mutabile è condiviso tra worker oltre alla
//! coda dei task: ogni worker possiede il proprio clone della config e
//! apre il proprio ledger.
//!
//! ## Pipeline per file:
//! - Immagini: floor check → ledger check → shortcut "già sotto target" →
//!   ricerca qualità / downscale → transazione di sostituzione
//! - Video: probe → floor check → ledger check → transcodifica monitorata
//!   con early-abort → transazione con policy a ratio

use crate::{
    config::Config,
    encoder::FfmpegEncoder,
    file_manager::{FileManager, MediaKind, MediaTask},
    image_processor::{self, SearchParams},
    progress::{BatchStats, ProgressManager},
    state::{LedgerEntry, StateManager},
    transaction::{AcceptancePolicy, Decision, ReplacementTransaction},
    video_processor::{TranscodeMonitor, TranscodeVerdict},
};
use anyhow::Result;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Normalized container for replaced videos
const VIDEO_CONTAINER: &str = "mkv";

/// Terminal outcome of one task, reported per file
#[derive(Debug)]
pub enum TaskOutcome {
    Replaced {
        original_size: u64,
        final_size: u64,
        final_path: PathBuf,
    },
    KeptOriginal {
        original_size: u64,
        reason: String,
    },
    Skipped {
        reason: String,
    },
    /// Early-abort outcome: deliberate optimization, not an error
    ProjectionAborted {
        estimated_bytes: u64,
        original_size: u64,
    },
    Failed {
        message: String,
    },
}

impl TaskOutcome {
    fn progress_line(&self, file_name: &str) -> String {
        match self {
            Self::Replaced {
                original_size,
                final_size,
                ..
            } => format!(
                "✅ {}: {} -> {} ({:.1}% saved)",
                file_name,
                FileManager::format_size(*original_size),
                FileManager::format_size(*final_size),
                FileManager::calculate_reduction(*original_size, *final_size)
            ),
            Self::KeptOriginal { reason, .. } => {
                format!("⚠️ {}: kept original ({})", file_name, reason)
            }
            Self::Skipped { reason } => format!("⏩ {}: skipped ({})", file_name, reason),
            Self::ProjectionAborted {
                estimated_bytes, ..
            } => format!(
                "⚠️ {}: aborted (projected {})",
                file_name,
                FileManager::format_size(*estimated_bytes)
            ),
            Self::Failed { .. } => format!("❌ {}: error", file_name),
        }
    }
}

/// Fans discovered files out to a bounded pool of workers
pub struct BatchScheduler {
    config: Config,
}

impl BatchScheduler {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run a full batch over one directory tree
    pub async fn run(&self, root: &Path, kind: MediaKind) -> Result<BatchStats> {
        let kind_label = match kind {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        };
        info!("Starting {} compression in: {}", kind_label, root.display());

        if kind == MediaKind::Video {
            FfmpegEncoder::check_dependencies().await?;
        }

        if self.config.dry_run {
            info!("🧪 Dry run mode: no files will be modified");
        }

        let swept = FileManager::sweep_stale_temps(root)?;
        if swept > 0 {
            info!("🧹 Swept {} stale temp file(s) from a previous run", swept);
        }

        let mut state = StateManager::new(root).await?;
        state.cleanup().await?;
        drop(state);

        let tasks = FileManager::discover(root, kind, &self.config)?;
        info!("Found {} candidate {} file(s)", tasks.len(), kind_label);

        if tasks.is_empty() {
            return Ok(BatchStats::new());
        }

        let worker_count = match kind {
            MediaKind::Image => self.config.workers,
            MediaKind::Video => self.config.video_workers,
        };
        let semaphore = Arc::new(Semaphore::new(worker_count));
        let progress = ProgressManager::new(tasks.len() as u64);

        let mut handles = Vec::new();
        for task in tasks {
            let permit = semaphore.clone().acquire_owned().await?;
            let worker = TaskWorker {
                config: self.config.clone(),
                base_dir: root.to_path_buf(),
            };
            let progress = progress.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let file_name = task
                    .path
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string();

                // Worker boundary: any error is contained here
                let outcome = match worker.process(&task).await {
                    Ok(outcome) => outcome,
                    Err(e) => TaskOutcome::Failed {
                        message: format!("{:#}", e),
                    },
                };

                if let TaskOutcome::Failed { message } = &outcome {
                    error!("Failed to process {}: {}", task.path.display(), message);
                }

                progress.update(&outcome.progress_line(&file_name));
                outcome
            }));
        }

        let mut stats = BatchStats::new();
        for result in join_all(handles).await {
            match result {
                Ok(TaskOutcome::Replaced {
                    original_size,
                    final_size,
                    ..
                }) => stats.add_replaced(original_size, final_size),
                Ok(TaskOutcome::KeptOriginal { original_size, .. }) => {
                    stats.add_kept(original_size)
                }
                Ok(TaskOutcome::Skipped { .. }) => stats.add_skipped(),
                Ok(TaskOutcome::ProjectionAborted { .. }) => stats.add_projection_abort(),
                Ok(TaskOutcome::Failed { .. }) => stats.add_error(),
                Err(e) => {
                    stats.add_error();
                    error!("Worker panicked: {}", e);
                }
            }
        }

        progress.finish(&stats.format_summary());
        self.print_final_stats(root, &stats).await;

        Ok(stats)
    }

    async fn print_final_stats(&self, root: &Path, stats: &BatchStats) {
        info!("=== Compression Complete ===");
        info!("Replaced: {}", stats.files_replaced);
        info!("Kept: {}", stats.files_kept);
        info!("Skipped: {}", stats.files_skipped);
        info!("Projection aborts: {}", stats.projection_aborts);
        info!("Errors: {}", stats.errors);
        info!(
            "Bytes saved this run: {}",
            FileManager::format_size(stats.total_bytes_saved)
        );

        if let Ok(state) = StateManager::new(root).await {
            let (total_files, total_saved, avg_reduction) = state.get_stats();
            info!("--- Historical ---");
            info!("Files ever compressed here: {}", total_files);
            info!(
                "Bytes saved historically: {}",
                FileManager::format_size(total_saved)
            );
            info!("Average historical reduction: {:.2}%", avg_reduction);
        }
    }
}

/// Per-file worker: owns everything it needs, shares nothing
struct TaskWorker {
    config: Config,
    base_dir: PathBuf,
}

impl TaskWorker {
    async fn process(&self, task: &MediaTask) -> Result<TaskOutcome> {
        match task.kind {
            MediaKind::Image => self.process_image(task).await,
            MediaKind::Video => self.process_video(task).await,
        }
    }

    async fn process_image(&self, task: &MediaTask) -> Result<TaskOutcome> {
        if task.size_bytes < self.config.min_size_bytes() {
            return Ok(TaskOutcome::Skipped {
                reason: format!(
                    "below {} floor",
                    FileManager::format_size(self.config.min_size_bytes())
                ),
            });
        }

        let (_, modified_time) = FileManager::get_file_info(&task.path).await?;
        let state = StateManager::new(&self.base_dir).await?;
        if state.is_processed(&task.path, modified_time) {
            return Ok(TaskOutcome::Skipped {
                reason: "already compressed".to_string(),
            });
        }

        // Monotonic shortcut: an already-compliant file needs no search
        if task.size_bytes <= self.config.max_size_bytes() {
            return Ok(TaskOutcome::Skipped {
                reason: "already within target".to_string(),
            });
        }

        info!(
            "🔧 Compressing image ({}): {}",
            FileManager::format_size(task.size_bytes),
            task.path.display()
        );

        // The search is pure CPU work on in-memory pixels
        let params = SearchParams::from_config(&self.config);
        let path = task.path.clone();
        let outcome =
            tokio::task::spawn_blocking(move || image_processor::compress_to_target(&path, &params))
                .await??;

        if !outcome.met_target {
            warn!(
                "{}: dimension floor reached at {}x{}, accepting best effort ({})",
                task.path.display(),
                outcome.candidate.width,
                outcome.candidate.height,
                FileManager::format_size(outcome.candidate.size_bytes())
            );
        } else if outcome.downscaled {
            info!(
                "📐 {}: no feasible quality at full size, downscaled to {}x{}",
                task.path.display(),
                outcome.candidate.width,
                outcome.candidate.height
            );
        }

        let policy = AcceptancePolicy::SmallerThanOriginal {
            original_size: task.size_bytes,
        };

        if self.config.dry_run {
            let verb = if policy.accepts(outcome.candidate.size_bytes()) {
                "replace"
            } else {
                "keep"
            };
            info!(
                "🧪 Dry run: would {} {} ({} -> {})",
                verb,
                task.path.display(),
                FileManager::format_size(task.size_bytes),
                FileManager::format_size(outcome.candidate.size_bytes())
            );
            return Ok(TaskOutcome::Skipped {
                reason: "dry run".to_string(),
            });
        }

        let txn = ReplacementTransaction::for_image(&task.path);
        txn.write_candidate(&outcome.candidate.bytes).await?;
        let result = txn.resolve(&policy).await?;

        match result.decision {
            Decision::Replaced => {
                let (final_size, final_mtime) =
                    FileManager::get_file_info(&result.final_path).await?;
                let mut state = StateManager::new(&self.base_dir).await?;
                state
                    .mark_processed(LedgerEntry::new(
                        result.final_path.clone(),
                        final_mtime,
                        task.size_bytes,
                        final_size,
                    ))
                    .await?;

                Ok(TaskOutcome::Replaced {
                    original_size: task.size_bytes,
                    final_size,
                    final_path: result.final_path,
                })
            }
            _ => Ok(TaskOutcome::KeptOriginal {
                original_size: task.size_bytes,
                reason: "compressed result not smaller than original".to_string(),
            }),
        }
    }

    async fn process_video(&self, task: &MediaTask) -> Result<TaskOutcome> {
        if task.size_bytes < self.config.video_min_size_bytes() {
            return Ok(TaskOutcome::Skipped {
                reason: format!(
                    "below {} floor",
                    FileManager::format_size(self.config.video_min_size_bytes())
                ),
            });
        }

        let (_, modified_time) = FileManager::get_file_info(&task.path).await?;
        let state = StateManager::new(&self.base_dir).await?;
        if state.is_processed(&task.path, modified_time) {
            return Ok(TaskOutcome::Skipped {
                reason: "already compressed".to_string(),
            });
        }

        let encoder = FfmpegEncoder::new(&self.config);
        let probe = encoder.probe(&task.path).await?;
        if probe.duration_secs <= 0.0 {
            return Ok(TaskOutcome::Failed {
                message: "invalid video: no duration reported".to_string(),
            });
        }

        info!(
            "🔧 Compressing video ({}, {:.1} min): {}",
            FileManager::format_size(task.size_bytes),
            probe.duration_secs / 60.0,
            task.path.display()
        );

        let txn = ReplacementTransaction::for_video(&task.path, VIDEO_CONTAINER);
        txn.discard().await?;

        let process = encoder.start(&task.path, txn.temp_path())?;
        let monitor = TranscodeMonitor::new(&self.config);
        let verdict = monitor.run(process, &probe, txn.temp_path()).await?;

        match verdict {
            TranscodeVerdict::Aborted { estimated_bytes } => {
                txn.discard().await?;
                Ok(TaskOutcome::ProjectionAborted {
                    estimated_bytes,
                    original_size: task.size_bytes,
                })
            }
            TranscodeVerdict::Failed { reason } => {
                txn.discard().await?;
                Ok(TaskOutcome::Failed { message: reason })
            }
            TranscodeVerdict::Finished => {
                let policy = AcceptancePolicy::SmallerByRatio {
                    original_size: task.size_bytes,
                    ratio: self.config.acceptance_ratio,
                };

                if self.config.dry_run {
                    let staged_size = FileManager::file_size(txn.temp_path())?;
                    let verb = if policy.accepts(staged_size) {
                        "replace"
                    } else {
                        "keep"
                    };
                    info!(
                        "🧪 Dry run: would {} {} ({} -> {})",
                        verb,
                        task.path.display(),
                        FileManager::format_size(task.size_bytes),
                        FileManager::format_size(staged_size)
                    );
                    txn.discard().await?;
                    return Ok(TaskOutcome::Skipped {
                        reason: "dry run".to_string(),
                    });
                }

                let result = txn.resolve(&policy).await?;
                match result.decision {
                    Decision::Replaced => {
                        let (final_size, final_mtime) =
                            FileManager::get_file_info(&result.final_path).await?;
                        let mut state = StateManager::new(&self.base_dir).await?;
                        state
                            .mark_processed(LedgerEntry::new(
                                result.final_path.clone(),
                                final_mtime,
                                task.size_bytes,
                                final_size,
                            ))
                            .await?;

                        Ok(TaskOutcome::Replaced {
                            original_size: task.size_bytes,
                            final_size,
                            final_path: result.final_path,
                        })
                    }
                    _ => Ok(TaskOutcome::KeptOriginal {
                        original_size: task.size_bytes,
                        reason: "reduction below acceptance ratio".to_string(),
                    }),
                }
            }
        }
    }
}
