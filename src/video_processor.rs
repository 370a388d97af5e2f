//! # Video Transcode Monitoring Module
//!
//! Questo modulo guida una codifica video esterna e decide in corsa se
//! vale la pena lasciarla finire.
//!
//! ## Funzionamento:
//! - Il progress stream dell'encoder viene letto riga per riga mentre il
//!   processo è vivo (mai bufferizzato fino all'uscita): la decisione di
//!   abort deve arrivare mentre la codifica è ancora in corso.
//! - Da ogni campione (`tempo codificato`, `byte scritti`) si estrapola la
//!   dimensione finale: `bytes / secondi_codificati * durata_totale`.
//! - Se la stima supera `dimensione_originale * acceptance_ratio`, il
//!   processo viene interrotto e l'output parziale rimosso: non è un
//!   errore, è un'ottimizzazione deliberata per non sprecare minuti di CPU.
//!
//! Il tempo codificato arriva dal progress stream (il tempo di parete non
//! coincide con il tempo media per codifiche a velocità variabile); il
//! tempo di parete resta come fallback degradato finché nessun segnale
//! temporale è disponibile.

use crate::config::Config;
use crate::encoder::{EncodeProcess, MediaProbe};
use crate::file_manager::FileManager;
use anyhow::Result;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

/// A single observation of encode progress. Superseded by each newer one.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSample {
    /// Media seconds encoded so far (0.0 when no time signal yet)
    pub encoded_secs: f64,
    /// Bytes written to the output so far
    pub bytes_written: u64,
}

/// Incremental parser for ffmpeg's `-progress` key=value stream.
///
/// Fields accumulate until a `progress=` line closes the block and yields
/// a complete sample.
#[derive(Debug, Default)]
pub struct ProgressParser {
    encoded_secs: Option<f64>,
    bytes_written: Option<u64>,
}

impl ProgressParser {
    /// Feed one line; returns a sample when a progress block completes.
    pub fn push_line(&mut self, line: &str) -> Option<ProgressSample> {
        let line = line.trim();

        if let Some(value) = line.strip_prefix("out_time_us=") {
            if let Ok(us) = value.parse::<i64>() {
                if us >= 0 {
                    self.encoded_secs = Some(us as f64 / 1_000_000.0);
                }
            }
        } else if let Some(value) = line.strip_prefix("out_time=") {
            if let Some(secs) = parse_clock(value) {
                self.encoded_secs = Some(secs);
            }
        } else if let Some(value) = line.strip_prefix("total_size=") {
            if let Ok(bytes) = value.parse::<u64>() {
                self.bytes_written = Some(bytes);
            }
        } else if line.starts_with("progress=") {
            return Some(ProgressSample {
                encoded_secs: self.encoded_secs.unwrap_or(0.0),
                bytes_written: self.bytes_written?,
            });
        }

        None
    }
}

/// Parse an `HH:MM:SS.micros` clock value. ffmpeg emits `N/A` before the
/// first frame, which parses to `None`.
fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Extrapolate the final output size from the observed bitrate
pub fn estimate_final_size(bytes_written: u64, encoded_secs: f64, duration_secs: f64) -> u64 {
    let rate = bytes_written as f64 / encoded_secs.max(0.1);
    (rate * duration_secs) as u64
}

/// Terminal outcome of a monitored transcode
#[derive(Debug)]
pub enum TranscodeVerdict {
    /// Process ran to completion and the output file exists
    Finished,
    /// Projection exceeded the budget; process interrupted, partial removed
    Aborted { estimated_bytes: u64 },
    /// Encoder failed or produced nothing; partial removed
    Failed { reason: String },
}

/// Drives one external encode and applies the early-abort protocol
pub struct TranscodeMonitor {
    acceptance_ratio: f64,
    sample_window_secs: f64,
}

impl TranscodeMonitor {
    pub fn new(config: &Config) -> Self {
        Self {
            acceptance_ratio: config.acceptance_ratio,
            sample_window_secs: config.sample_window_secs,
        }
    }

    /// Monitor a started encode until it finishes or gets aborted.
    ///
    /// The abort check runs on the same blocking read loop that consumes
    /// the progress stream, so no extra synchronization is involved.
    pub async fn run<P: EncodeProcess>(
        &self,
        mut process: P,
        probe: &MediaProbe,
        output: &Path,
    ) -> Result<TranscodeVerdict> {
        let budget = (probe.size_bytes as f64 * self.acceptance_ratio) as u64;
        let started = Instant::now();
        let mut parser = ProgressParser::default();

        while let Some(line) = process.next_progress().await? {
            let Some(sample) = parser.push_line(&line) else {
                continue;
            };

            // Encoded media time drives the projection; wall clock is the
            // degraded fallback until the first time signal arrives.
            let encoded_secs = if sample.encoded_secs > 0.0 {
                sample.encoded_secs
            } else {
                started.elapsed().as_secs_f64()
            };

            if encoded_secs < self.sample_window_secs {
                continue;
            }

            let estimated = estimate_final_size(sample.bytes_written, encoded_secs, probe.duration_secs);

            debug!(
                "Progress {:.1}s/{:.1}s, {} written, projected {}",
                encoded_secs,
                probe.duration_secs,
                FileManager::format_size(sample.bytes_written),
                FileManager::format_size(estimated)
            );

            if estimated > budget {
                warn!(
                    "Projected size {} exceeds budget {}, aborting encode",
                    FileManager::format_size(estimated),
                    FileManager::format_size(budget)
                );
                process.interrupt().await?;
                remove_partial(output).await;
                return Ok(TranscodeVerdict::Aborted {
                    estimated_bytes: estimated,
                });
            }
        }

        let exit = process.wait().await?;

        if !exit.success {
            remove_partial(output).await;
            let reason = if exit.detail.is_empty() {
                "encoder exited with an error".to_string()
            } else {
                exit.detail
            };
            return Ok(TranscodeVerdict::Failed { reason });
        }

        if !output.exists() {
            return Ok(TranscodeVerdict::Failed {
                reason: "encoder produced no output file".to_string(),
            });
        }

        Ok(TranscodeVerdict::Finished)
    }
}

async fn remove_partial(output: &Path) {
    if output.exists() {
        if let Err(e) = tokio::fs::remove_file(output).await {
            warn!(
                "Failed to remove partial output {}: {}",
                output.display(),
                e
            );
        }
    }
}
