//! # External Encoder Capability Module
//!
//! Questo modulo astrae il processo di codifica esterno (ffmpeg) dietro
//! un'interfaccia minimale: avvio, lettura incrementale del progress
//! stream, interruzione pulita, attesa dell'esito.
//!
//! ## Responsabilità:
//! - Probe di durata e dimensione con ffprobe (output JSON)
//! - Avvio della codifica CRF libx265 con `-progress pipe:1`
//! - Cattura delle ultime righe di stderr per diagnostica
//! - Interruzione graceful (`q` su stdin) con escalation a kill
//!
//! Il trait [`EncodeProcess`] esiste perché la logica di abort del monitor
//! deve essere testabile contro un'implementazione fittizia deterministica
//! invece che contro un binario ffmpeg reale.

use crate::config::Config;
use crate::error::CompressError;
use crate::platform::PlatformCommands;
use crate::utils::to_string_vec;
use anyhow::Result;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a graceful interrupt may take before escalating to a kill
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// Duration and container size of a source media file
#[derive(Debug, Clone, Copy)]
pub struct MediaProbe {
    pub duration_secs: f64,
    pub size_bytes: u64,
}

/// Terminal state of an encode process
#[derive(Debug, Clone)]
pub struct EncodeExit {
    pub success: bool,
    /// Tail of the encoder's stderr, for error reporting
    pub detail: String,
}

/// Capability interface over a running external encode.
///
/// The monitor only ever needs three operations: pull the next progress
/// line as it is emitted, interrupt the encode, and wait for the exit.
#[allow(async_fn_in_trait)]
pub trait EncodeProcess {
    /// Next line of the progress stream, or `None` once it closes.
    async fn next_progress(&mut self) -> Result<Option<String>>;

    /// Stop the encode: graceful signal first, forceful after a grace
    /// period. Returns once the process is gone.
    async fn interrupt(&mut self) -> Result<()>;

    /// Wait for the process to finish on its own.
    async fn wait(&mut self) -> Result<EncodeExit>;
}

/// ffmpeg-backed encoder capability
pub struct FfmpegEncoder {
    crf: u8,
    preset: String,
}

impl FfmpegEncoder {
    pub fn new(config: &Config) -> Self {
        Self {
            crf: config.video_crf,
            preset: config.video_preset.clone(),
        }
    }

    /// Check that ffmpeg and ffprobe are available, failing fast with a
    /// clear diagnostic otherwise.
    pub async fn check_dependencies() -> Result<()> {
        let platform = PlatformCommands::instance();

        for tool in ["ffmpeg", "ffprobe"] {
            if !platform.is_command_available(tool).await {
                return Err(CompressError::MissingDependency(format!(
                    "{} is required for video compression",
                    tool
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Query duration and size of a media file via ffprobe
    pub async fn probe(&self, path: &Path) -> Result<MediaProbe> {
        let platform = PlatformCommands::instance();
        let ffprobe = platform.get_command("ffprobe");
        let input = path.to_string_lossy();

        let args = to_string_vec([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
            input.as_ref(),
        ]);

        let output = Command::new(ffprobe)
            .args(&args)
            .output()
            .await
            .map_err(|e| CompressError::Probe(format!("Failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(CompressError::Probe(
                String::from_utf8_lossy(&output.stderr).to_string(),
            )
            .into());
        }

        let info: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| CompressError::Probe(format!("Unparseable ffprobe output: {}", e)))?;

        let duration_secs = info["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let size_bytes = tokio::fs::metadata(path).await?.len();

        Ok(MediaProbe {
            duration_secs,
            size_bytes,
        })
    }

    /// Start a constant-quality encode writing to `output`, with the
    /// machine-readable progress stream on stdout.
    pub fn start(&self, input: &Path, output: &Path) -> Result<FfmpegProcess> {
        let platform = PlatformCommands::instance();
        let ffmpeg = platform.get_command("ffmpeg");
        let args = build_encode_args(input, output, self.crf, &self.preset);

        debug!("Starting ffmpeg with args: {:?}", args);

        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CompressError::Encoder(format!("Failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CompressError::Encoder("ffmpeg stdout not captured".to_string()))?;
        let progress = BufReader::new(stdout).lines();

        // Keep only the tail of stderr: enough for diagnostics without
        // holding a long encode's full log in memory.
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                const MAX_LINES: usize = 10;
                let mut recent: VecDeque<String> = VecDeque::with_capacity(MAX_LINES);
                let mut lines = BufReader::new(stderr).lines();

                while let Ok(Some(line)) = lines.next_line().await {
                    if recent.len() >= MAX_LINES {
                        recent.pop_front();
                    }
                    recent.push_back(line);
                }

                recent.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        Ok(FfmpegProcess {
            child,
            progress,
            stderr_task,
        })
    }
}

fn build_encode_args(input: &Path, output: &Path, crf: u8, preset: &str) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let crf = crf.to_string();

    to_string_vec([
        "-y",
        "-i",
        input.as_ref(),
        "-c:v",
        "libx265",
        "-vtag",
        "hvc1",
        "-crf",
        crf.as_str(),
        "-preset",
        preset,
        "-c:a",
        "copy",
        "-progress",
        "pipe:1",
        "-nostats",
        "-loglevel",
        "error",
        output.as_ref(),
    ])
}

/// A live ffmpeg encode
pub struct FfmpegProcess {
    child: Child,
    progress: Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<String>>,
}

impl EncodeProcess for FfmpegProcess {
    async fn next_progress(&mut self) -> Result<Option<String>> {
        Ok(self.progress.next_line().await?)
    }

    async fn interrupt(&mut self) -> Result<()> {
        // ffmpeg exits cleanly on 'q' from stdin
        if let Some(mut stdin) = self.child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(INTERRUPT_GRACE, self.child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                warn!("Encoder ignored graceful interrupt, killing process");
                self.child.start_kill()?;
                let _ = self.child.wait().await;
            }
        }

        Ok(())
    }

    async fn wait(&mut self) -> Result<EncodeExit> {
        let status = self.child.wait().await?;

        let detail = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        Ok(EncodeExit {
            success: status.success(),
            detail,
        })
    }
}
