//! # Media Compressor - Main Entry Point
//!
//! Punto di ingresso dell'applicazione.
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (subcommand, directory, overrides)
//! 2. Configura il logging (INFO o DEBUG a seconda del flag verbose)
//! 3. Carica l'eventuale file di configurazione e applica gli overrides
//! 4. Valida la directory di input
//! 5. Avvia il BatchScheduler per il tipo di media richiesto
//!
//! ## Esempi di utilizzo:
//! ```bash
//! media-compress compress /path/to/photos --max-size-mb 1.5
//! media-compress compress-video /path/to/clips --crf 28 --ratio 0.9
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use media_compressor::{BatchScheduler, Config, MediaKind};

#[derive(Parser)]
#[command(name = "media-compress")]
#[command(about = "Adaptive batch media compression with transactional replacement")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Load defaults from a JSON config file (CLI flags override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dry run - compress but never replace files
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Recursively compress images in a directory toward a size ceiling
    Compress {
        /// Directory containing images
        directory: PathBuf,

        /// Target size ceiling in MB
        #[arg(long)]
        max_size_mb: Option<f64>,

        /// Skip images below this size (MB)
        #[arg(long)]
        min_size_mb: Option<f64>,

        /// Lower bound of the quality search
        #[arg(long)]
        quality_min: Option<u8>,

        /// Upper bound of the quality search
        #[arg(long)]
        quality_max: Option<u8>,

        /// Number of parallel workers
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Recursively transcode videos, aborting encodes that will not pay off
    CompressVideo {
        /// Directory containing videos
        directory: PathBuf,

        /// CRF value (0-51, lower = better quality)
        #[arg(long)]
        crf: Option<u8>,

        /// ffmpeg encoder preset
        #[arg(long)]
        preset: Option<String>,

        /// Keep output only if below this fraction of the original size
        #[arg(long)]
        ratio: Option<f64>,

        /// Skip videos below this size (MB)
        #[arg(long)]
        min_size_mb: Option<f64>,

        /// Number of parallel workers
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    config.dry_run = args.dry_run || config.dry_run;

    let (directory, kind) = match args.command {
        Command::Compress {
            directory,
            max_size_mb,
            min_size_mb,
            quality_min,
            quality_max,
            workers,
        } => {
            if let Some(v) = max_size_mb {
                config.max_size_mb = v;
            }
            if let Some(v) = min_size_mb {
                config.min_size_mb = v;
            }
            if let Some(v) = quality_min {
                config.quality_min = v;
            }
            if let Some(v) = quality_max {
                config.quality_max = v;
            }
            if let Some(v) = workers {
                config.workers = v;
            }
            (directory, MediaKind::Image)
        }
        Command::CompressVideo {
            directory,
            crf,
            preset,
            ratio,
            min_size_mb,
            workers,
        } => {
            if let Some(v) = crf {
                config.video_crf = v;
            }
            if let Some(v) = preset {
                config.video_preset = v;
            }
            if let Some(v) = ratio {
                config.acceptance_ratio = v;
            }
            if let Some(v) = min_size_mb {
                config.video_min_size_mb = v;
            }
            if let Some(v) = workers {
                config.video_workers = v;
            }
            (directory, MediaKind::Video)
        }
    };

    if !directory.is_dir() {
        return Err(anyhow::anyhow!(
            "Invalid directory: {}",
            directory.display()
        ));
    }

    let scheduler = BatchScheduler::new(config)?;
    scheduler.run(&directory, kind).await?;

    Ok(())
}
