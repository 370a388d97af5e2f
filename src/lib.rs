//! # Media Compressor Library
//!
//! Questo è il modulo principale della libreria che espone le API pubbliche.
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom per le diverse operazioni
//! - `file_manager`: Discovery media, sweep temp, utilità filesystem
//! - `image_processor`: Ricerca qualità e downscaling immagini
//! - `encoder`: Capability sull'encoder esterno (ffmpeg/ffprobe)
//! - `video_processor`: Monitor della transcodifica con early-abort
//! - `transaction`: Sostituzione transazionale dei file
//! - `scheduler`: Orchestratore del batch con worker pool
//! - `state`: Ledger dei file già compressi
//! - `progress`: Progress bar e statistiche
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use media_compressor::{BatchScheduler, Config, MediaKind};
//! # async fn run() -> anyhow::Result<()> {
//! let scheduler = BatchScheduler::new(Config::default())?;
//! scheduler.run(std::path::Path::new("/media"), MediaKind::Image).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod file_manager;
pub mod image_processor;
pub mod platform;
pub mod progress;
pub mod scheduler;
pub mod state;
pub mod transaction;
pub mod utils;
pub mod video_processor;

pub use config::Config;
pub use error::CompressError;
pub use file_manager::{MediaKind, MediaTask};
pub use scheduler::{BatchScheduler, TaskOutcome};
pub use transaction::{Decision, TransactionResult};
